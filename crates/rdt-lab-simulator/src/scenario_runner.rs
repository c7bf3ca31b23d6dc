use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use rdt_lab_abstract::{ChannelConfig, SessionConfig, TestAction, TestAssertion, TestScenario};
use rdt_lab_core::{MemorySink, TransportError};
use tracing::info;

use crate::session::Session;
use crate::trace::SessionReport;
use crate::workload;

/// Limit applied when a scenario has no `max_duration` assertion.
pub const DEFAULT_MAX_DURATION_MS: u64 = 600_000;

pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

/// Run `scenario` on top of the default configs.
pub async fn run_scenario(scenario: &TestScenario) -> Result<SessionReport> {
    let mut session_config = SessionConfig::default();
    scenario.session.apply_to(&mut session_config);
    let mut channel_config = ChannelConfig::default();
    scenario.channel.apply_to(&mut channel_config);
    run_scenario_with(scenario, session_config, channel_config).await
}

/// Run `scenario` with fully resolved configs; its own overrides are not
/// applied again.
pub async fn run_scenario_with(
    scenario: &TestScenario,
    session_config: SessionConfig,
    channel_config: ChannelConfig,
) -> Result<SessionReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let block_size = session_config.block_size;
    let sink = MemorySink::new();
    let mut session = Session::start(session_config, channel_config, Box::new(sink.clone()))?;

    // Deterministic faults are armed before any traffic
    for action in &scenario.actions {
        match action {
            TestAction::DropNextFromSenderSeq { seq } => session.data_link().add_drop_seq_once(*seq),
            TestAction::DropNextFromReceiverAck { ack } => {
                session.ack_link().add_drop_ack_once(*ack)
            }
            TestAction::AppSend { .. } => {}
        }
    }

    let limit = scenario
        .max_duration_ms()
        .unwrap_or(DEFAULT_MAX_DURATION_MS);
    let mut expected: Vec<Vec<i32>> = Vec::new();
    let outcome = tokio::time::timeout(
        Duration::from_millis(limit),
        drive(&mut session, scenario, block_size, &mut expected),
    )
    .await;

    let sent = match outcome {
        Ok(sent) => sent,
        Err(_) => {
            session.abort();
            bail!("Test timed out after {} ms", limit);
        }
    };
    let report = session.finish().await?;
    sent.context("Transfer failed")?;

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::AllDelivered => {
                let delivered = sink.payloads();
                if delivered.len() != expected.len() {
                    return Err(anyhow!(
                        "Assertion Failed: {} of {} blocks delivered",
                        delivered.len(),
                        expected.len()
                    ));
                }
                if let Some(idx) = delivered.iter().zip(&expected).position(|(d, e)| d != e) {
                    return Err(anyhow!(
                        "Assertion Failed: block {} delivered out of order or altered",
                        idx
                    ));
                }
            }
            TestAssertion::SenderPacketCount { min, max } => {
                let count = report.sender_packet_count();
                if count < *min {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected min {}",
                        count,
                        min
                    ));
                }
                if let Some(max) = max
                    && count > *max
                {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected max {}",
                        count,
                        max
                    ));
                }
            }
            TestAssertion::MaxDuration { ms } => {
                if report.duration_ms > *ms {
                    return Err(anyhow!(
                        "Assertion Failed: transfer took {} ms, expected at most {}",
                        report.duration_ms,
                        ms
                    ));
                }
            }
        }
    }

    info!("Test Scenario Passed!");
    Ok(report)
}

/// Issue the scenario's `app_send` actions in order, recording every payload
/// in `expected`, then wait for the window to drain.
async fn drive(
    session: &mut Session,
    scenario: &TestScenario,
    block_size: usize,
    expected: &mut Vec<Vec<i32>>,
) -> Result<(), TransportError> {
    for action in &scenario.actions {
        if let TestAction::AppSend { blocks } = action {
            let payloads = workload::generate_from(expected.len(), *blocks, block_size);
            expected.extend(payloads.iter().cloned());
            session.transfer(payloads).await?;
        }
    }
    session.sender().flush().await
}
