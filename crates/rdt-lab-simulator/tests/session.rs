use std::io;

use rdt_lab_abstract::{ChannelConfig, DeliverySink, ErrorFlag, SessionConfig, Variant};
use rdt_lab_core::MemorySink;
use rdt_lab_simulator::{Session, SessionReport, workload};

const BLOCK: usize = 100;

fn lossy(seed: u64) -> ChannelConfig {
    ChannelConfig {
        loss_rate: 0.2,
        corrupt_rate: 0.2,
        seed,
        ..Default::default()
    }
}

async fn transfer(
    session_config: SessionConfig,
    channel_config: ChannelConfig,
    blocks: usize,
) -> (SessionReport, MemorySink) {
    let sink = MemorySink::new();
    let mut session =
        Session::start(session_config, channel_config, Box::new(sink.clone())).unwrap();
    session
        .transfer(workload::generate(blocks, BLOCK))
        .await
        .unwrap();
    let report = session.finish().await.unwrap();
    (report, sink)
}

fn assert_delivered_in_order(sink: &MemorySink, blocks: usize) {
    assert_eq!(sink.payloads(), workload::generate(blocks, BLOCK));
}

#[tokio::test(start_paused = true)]
async fn every_variant_delivers_over_a_clean_channel() {
    for variant in Variant::ALL {
        let (report, sink) = transfer(
            SessionConfig::for_variant(variant),
            ChannelConfig::default(),
            45,
        )
        .await;
        assert_delivered_in_order(&sink, 45);
        assert_eq!(report.blocks_sent, 45, "{variant}");
        assert!(report.all_delivered(), "{variant}");
        // 20 + 20 in full batches, the last 5 flushed at finish
        assert_eq!(sink.flush_count(), 3, "{variant}");
    }
}

#[tokio::test(start_paused = true)]
async fn windowed_recovers_from_loss_and_corruption() {
    let (report, sink) = transfer(
        SessionConfig::for_variant(Variant::Windowed),
        lossy(7),
        120,
    )
    .await;
    assert_delivered_in_order(&sink, 120);
    assert!(report.sender_packet_count() > 120);
    assert!(report.sender.window.timeouts > 0);
    assert!(report.data_link.dropped > 0);
}

#[tokio::test(start_paused = true)]
async fn go_back_n_recovers_from_loss_and_corruption() {
    let cfg = SessionConfig {
        window_size: 8,
        ..SessionConfig::for_variant(Variant::GoBackN)
    };
    let (report, sink) = transfer(cfg, lossy(11), 80).await;
    assert_delivered_in_order(&sink, 80);
    assert!(report.sender.window.retransmissions > 0);
}

#[tokio::test(start_paused = true)]
async fn nack_variant_recovers_from_corruption() {
    let channel = ChannelConfig {
        corrupt_rate: 0.3,
        seed: 3,
        ..Default::default()
    };
    let (report, sink) = transfer(SessionConfig::for_variant(Variant::Nack), channel, 60).await;
    assert_delivered_in_order(&sink, 60);
    assert!(report.sender.nacks + report.sender.corrupt_replies > 0);
    assert_eq!(report.sender.window.timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn timer_variant_recovers_from_loss() {
    let (report, sink) = transfer(SessionConfig::for_variant(Variant::Timer), lossy(5), 40).await;
    assert_delivered_in_order(&sink, 40);
    assert!(report.sender.window.timeouts > 0);
    assert_eq!(report.sender.window.admitted, 40);
}

#[tokio::test(start_paused = true)]
async fn lossless_transfer_sends_each_block_once() {
    let cfg = SessionConfig {
        data_eflag: Some(ErrorFlag::None),
        ack_eflag: Some(ErrorFlag::None),
        ..SessionConfig::for_variant(Variant::Windowed)
    };
    let (report, _sink) = transfer(cfg, lossy(1), 64).await;
    assert_eq!(report.sender_packet_count(), 64);
    assert_eq!(report.sender.window.retransmissions, 0);
    assert_eq!(report.data_link.dropped, 0);
    assert_eq!(report.receiver.delivered, 64);
}

#[tokio::test(start_paused = true)]
async fn deterministic_drop_costs_one_timeout() {
    let cfg = SessionConfig {
        data_eflag: Some(ErrorFlag::None),
        ack_eflag: Some(ErrorFlag::None),
        ..SessionConfig::for_variant(Variant::Windowed)
    };
    let sink = MemorySink::new();
    let mut session = Session::start(cfg, ChannelConfig::default(), Box::new(sink.clone())).unwrap();
    session.data_link().add_drop_seq_once(301);
    session.transfer(workload::generate(10, BLOCK)).await.unwrap();
    let report = session.finish().await.unwrap();

    assert_delivered_in_order(&sink, 10);
    assert_eq!(report.data_link.deterministic_drops, 1);
    assert!(report.duration_ms >= 3000);
    assert!(report.link_events.iter().any(|e| e.description.contains("seq=301")));
}

struct BrokenSink;

impl DeliverySink for BrokenSink {
    fn deliver(&mut self, _batch: &[Vec<i32>]) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}

#[tokio::test(start_paused = true)]
async fn sink_failure_surfaces_from_finish() {
    let cfg = SessionConfig {
        delivery_batch: 2,
        data_eflag: Some(ErrorFlag::None),
        ack_eflag: Some(ErrorFlag::None),
        ..SessionConfig::for_variant(Variant::Windowed)
    };
    let mut session = Session::start(cfg, ChannelConfig::default(), Box::new(BrokenSink)).unwrap();
    let _ = session.transfer(workload::generate(5, BLOCK)).await;
    let err = session.finish().await.unwrap_err();
    assert!(format!("{err:#}").contains("disk full"));
}

#[tokio::test(start_paused = true)]
async fn invalid_channel_config_is_rejected() {
    let channel = ChannelConfig {
        loss_rate: 1.5,
        ..Default::default()
    };
    let result = Session::start(SessionConfig::default(), channel, Box::new(MemorySink::new()));
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn report_serializes_to_json() {
    let (report, _sink) = transfer(
        SessionConfig::for_variant(Variant::StopAndWait),
        ChannelConfig::default(),
        3,
    )
    .await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["session"]["variant"], "stop-and-wait");
    assert_eq!(json["blocks_sent"], 3);
    assert_eq!(json["receiver"]["delivered"], 3);
    // Stop-and-wait holds one segment in flight.
    assert_eq!(json["sender"]["window"]["cwnd"], 1);
    assert!(json["link_events"].is_array());
}
