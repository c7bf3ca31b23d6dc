//! A sender and a receiver wired together over two unreliable links.

use std::sync::Arc;

use anyhow::{Context, Result};
use rdt_lab_abstract::{ChannelConfig, DeliverySink, Endpoint, Segment, SessionConfig};
use rdt_lab_core::{Policy, RdtSender, ReceiverAssembler, TimerService, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use crate::channel::UnreliableChannel;
use crate::trace::SessionReport;

pub struct Session {
    session_config: SessionConfig,
    channel_config: ChannelConfig,
    started: Instant,
    sender: Arc<RdtSender>,
    data_link: Arc<UnreliableChannel>,
    ack_link: Arc<UnreliableChannel>,
    receiver_task: JoinHandle<Result<ReceiverAssembler, TransportError>>,
    ack_task: JoinHandle<()>,
    next_block: i32,
}

impl Session {
    /// Build both endpoints and start the tasks that drain each link into
    /// its endpoint. Must be called inside a tokio runtime.
    pub fn start(
        session_config: SessionConfig,
        channel_config: ChannelConfig,
        sink: Box<dyn DeliverySink>,
    ) -> Result<Self> {
        let policy = Policy::for_session(&session_config).context("Invalid session config")?;
        let started = Instant::now();

        let (data_link, data_rx) = UnreliableChannel::new(Endpoint::Sender, &channel_config, started)
            .context("Invalid channel config")?;
        let (ack_link, ack_rx) =
            UnreliableChannel::new(Endpoint::Receiver, &channel_config, started)
                .context("Invalid channel config")?;

        let sender = Arc::new(RdtSender::with_policy(
            policy.clone(),
            data_link.clone(),
            TimerService::new(),
        ));
        let assembler = ReceiverAssembler::new(policy, ack_link.clone(), sink);

        let receiver_task = tokio::spawn(run_receiver(assembler, data_rx, Arc::clone(&sender)));
        let ack_task = tokio::spawn(run_ack_path(Arc::clone(&sender), ack_rx));

        info!(
            "Session started: {} over loss={} corrupt={} latency={}..={}ms seed={}",
            session_config.variant,
            channel_config.loss_rate,
            channel_config.corrupt_rate,
            channel_config.min_latency,
            channel_config.max_latency,
            channel_config.seed
        );

        Ok(Self {
            session_config,
            channel_config,
            started,
            sender,
            data_link,
            ack_link,
            receiver_task,
            ack_task,
            next_block: 0,
        })
    }

    pub fn sender(&self) -> &RdtSender {
        &self.sender
    }

    /// Sender-to-receiver link.
    pub fn data_link(&self) -> &UnreliableChannel {
        &self.data_link
    }

    /// Receiver-to-sender link.
    pub fn ack_link(&self) -> &UnreliableChannel {
        &self.ack_link
    }

    /// Send one block under an explicit index.
    pub async fn send(&self, block: i32, payload: Vec<i32>) -> Result<(), TransportError> {
        self.sender.send(block, payload).await
    }

    /// Send `blocks` in order, numbering them after whatever was sent before.
    pub async fn transfer(&mut self, blocks: Vec<Vec<i32>>) -> Result<(), TransportError> {
        for payload in blocks {
            self.sender.send(self.next_block, payload).await?;
            self.next_block += 1;
        }
        Ok(())
    }

    /// Wait for every block to be acknowledged, then tear the session down
    /// and report. A receiver failure takes precedence over sender errors.
    pub async fn finish(self) -> Result<SessionReport> {
        let flushed = self.sender.flush().await;
        let duration_ms = self.started.elapsed().as_millis() as u64;

        self.sender.shutdown();
        self.data_link.close();
        self.ack_link.close();

        let mut assembler = self
            .receiver_task
            .await
            .context("Receiver task panicked")?
            .context("Receiver failed")?;
        self.ack_task.await.context("ACK task panicked")?;
        flushed.context("Sender did not drain its window")?;
        assembler.finish().context("Final delivery failed")?;

        let mut link_events = self.data_link.events();
        link_events.extend(self.ack_link.events());
        link_events.sort_by_key(|e| e.time_ms);

        let report = SessionReport {
            session: self.session_config,
            channel: self.channel_config,
            duration_ms,
            blocks_sent: self.sender.stats().blocks,
            sender: self.sender.stats(),
            receiver: assembler.stats(),
            data_link: self.data_link.stats(),
            ack_link: self.ack_link.stats(),
            link_events,
        };
        info!(
            "Session finished in {} ms: {} block(s), {} transmission(s), {} delivered",
            report.duration_ms,
            report.blocks_sent,
            report.sender.transmissions,
            report.receiver.delivered
        );
        Ok(report)
    }

    /// Tear down without waiting for outstanding blocks.
    pub fn abort(self) {
        self.sender.shutdown();
        self.data_link.close();
        self.ack_link.close();
        self.receiver_task.abort();
        self.ack_task.abort();
    }
}

async fn run_receiver(
    mut assembler: ReceiverAssembler,
    mut inbound: mpsc::UnboundedReceiver<Segment>,
    sender: Arc<RdtSender>,
) -> Result<ReceiverAssembler, TransportError> {
    while let Some(segment) = inbound.recv().await {
        if let Err(err) = assembler.on_segment(segment) {
            error!("Receiver failed: {}", err);
            sender.shutdown();
            return Err(err);
        }
    }
    Ok(assembler)
}

async fn run_ack_path(sender: Arc<RdtSender>, mut inbound: mpsc::UnboundedReceiver<Segment>) {
    while let Some(segment) = inbound.recv().await {
        sender.on_segment(segment);
    }
}
