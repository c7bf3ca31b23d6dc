use std::fs;
use std::path::{Path, PathBuf};

use rdt_lab_abstract::TestScenario;
use rdt_lab_simulator::scenario_runner::{load_scenario, run_scenario};

fn scenario_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

fn inline(toml_text: &str) -> TestScenario {
    toml::from_str(toml_text).unwrap()
}

#[tokio::test(start_paused = true)]
async fn bundled_scenarios_pass() {
    let mut paths: Vec<PathBuf> = fs::read_dir(scenario_dir())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();
    assert!(!paths.is_empty());

    for path in paths {
        let scenario = load_scenario(&path).unwrap();
        let report = run_scenario(&scenario)
            .await
            .unwrap_or_else(|err| panic!("{}: {err:#}", path.display()));
        assert!(report.all_delivered(), "{}", scenario.name);
    }
}

#[tokio::test(start_paused = true)]
async fn packet_count_assertion_reports_failure() {
    let scenario = inline(
        r#"
        name = "too-strict"

        [session]
        variant = "stop-and-wait"

        [[actions]]
        type = "app_send"
        blocks = 10

        [[assertions]]
        type = "sender_packet_count"
        min = 1
        max = 5
        "#,
    );
    let err = run_scenario(&scenario).await.unwrap_err();
    assert!(err.to_string().contains("expected max 5"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn stalled_transfer_times_out() {
    // Positive-only ACKs with every segment corrupted never make progress.
    let scenario = inline(
        r#"
        name = "stalled"

        [session]
        variant = "checksum"
        data_eflag = "error"

        [channel]
        corrupt_rate = 1.0

        [[actions]]
        type = "app_send"
        blocks = 2

        [[assertions]]
        type = "max_duration"
        ms = 5000
        "#,
    );
    let err = run_scenario(&scenario).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn app_sends_continue_the_stream() {
    let scenario = inline(
        r#"
        name = "two-bursts"

        [session]
        variant = "go-back-n"
        window_size = 4
        block_size = 10

        [[actions]]
        type = "app_send"
        blocks = 5

        [[actions]]
        type = "app_send"
        blocks = 7

        [[assertions]]
        type = "all_delivered"
        "#,
    );
    let report = run_scenario(&scenario).await.unwrap();
    assert_eq!(report.blocks_sent, 12);
    assert_eq!(report.receiver.delivered, 12);
}

#[test]
fn missing_scenario_file_is_an_error() {
    let err = load_scenario(&scenario_dir().join("does-not-exist.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read scenario file"));
}
