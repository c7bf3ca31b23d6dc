use rdt_lab_abstract::{ChannelConfig, SessionConfig};
use rdt_lab_core::{ReceiverStats, SenderStats};
use serde::Serialize;

use crate::channel::{LinkEvent, LinkStats};

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: SessionConfig,
    pub channel: ChannelConfig,
    pub duration_ms: u64,
    pub blocks_sent: u64,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    pub data_link: LinkStats,
    pub ack_link: LinkStats,
    /// Both directions merged in time order.
    pub link_events: Vec<LinkEvent>,
}

impl SessionReport {
    /// Data segments the sender put on the link, first sends and retransmissions.
    pub fn sender_packet_count(&self) -> u64 {
        self.sender.transmissions
    }

    pub fn all_delivered(&self) -> bool {
        self.receiver.delivered == self.blocks_sent
    }
}
