use crate::config::{ChannelConfigOverride, SessionConfigOverride};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub session: SessionConfigOverride,
    #[serde(default)]
    pub channel: ChannelConfigOverride,
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application sends the next `blocks` generated blocks, in order
    AppSend { blocks: usize },
    /// Deterministically drop the first data segment carrying this seq number
    DropNextFromSenderSeq { seq: i32 },
    /// Deterministically drop the first reply carrying this ack number
    DropNextFromReceiverAck { ack: i32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Every block the application sent reached the sink, in order
    AllDelivered,
    /// Total data segments put on the channel (first sends + retransmissions)
    SenderPacketCount { min: u64, max: Option<u64> },
    /// Assert that the transfer finishes within time
    MaxDuration { ms: u64 },
}

impl TestScenario {
    /// Total blocks the scenario's `app_send` actions ask for.
    pub fn total_blocks(&self) -> usize {
        self.actions
            .iter()
            .map(|action| match action {
                TestAction::AppSend { blocks } => *blocks,
                _ => 0,
            })
            .sum()
    }

    pub fn max_duration_ms(&self) -> Option<u64> {
        self.assertions.iter().find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;

    #[test]
    fn parses_scenario_toml() {
        let scenario: TestScenario = toml::from_str(
            r#"
            name = "gbn-drop"
            description = "lose block 2 once"

            [session]
            variant = "go-back-n"
            window_size = 4

            [channel]
            seed = 7

            [[actions]]
            type = "drop_next_from_sender_seq"
            seq = 201

            [[actions]]
            type = "app_send"
            blocks = 10

            [[assertions]]
            type = "all_delivered"

            [[assertions]]
            type = "sender_packet_count"
            min = 11

            [[assertions]]
            type = "max_duration"
            ms = 60000
            "#,
        )
        .unwrap();

        assert_eq!(scenario.session.variant, Some(Variant::GoBackN));
        assert_eq!(scenario.channel.seed, Some(7));
        assert_eq!(scenario.total_blocks(), 10);
        assert_eq!(scenario.max_duration_ms(), Some(60000));
        assert!(matches!(
            scenario.assertions[1],
            TestAssertion::SenderPacketCount { min: 11, max: None }
        ));
    }
}
