use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdt_lab_abstract::{
    ChannelConfig, ChannelConfigOverride, ErrorFlag, SessionConfig, SessionConfigOverride, Variant,
};
use rdt_lab_core::{DEFAULT_OUTPUT, FileSink};
use rdt_lab_simulator::scenario_runner::{load_scenario, run_scenario_with};
use rdt_lab_simulator::{Session, SessionReport, workload};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reliable data transfer lab simulator")]
struct Args {
    /// TOML file with [session] and [channel] tables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a scenario from disk instead of a plain transfer.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Protocol variant (stop-and-wait, checksum, nack, timer, go-back-n, windowed).
    #[arg(long)]
    variant: Option<Variant>,
    #[arg(long)]
    window_size: Option<usize>,
    #[arg(long)]
    block_size: Option<usize>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    delivery_batch: Option<usize>,
    /// Error flag code (0-7) for data segments.
    #[arg(long)]
    data_eflag: Option<u8>,
    /// Error flag code (0-7) for ACK/NACK replies.
    #[arg(long)]
    ack_eflag: Option<u8>,

    #[arg(long)]
    loss_rate: Option<f64>,
    #[arg(long)]
    corrupt_rate: Option<f64>,
    #[arg(long)]
    min_latency: Option<u64>,
    #[arg(long)]
    max_latency: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,

    /// Number of blocks the application sends.
    #[arg(long, default_value_t = 1000)]
    blocks: usize,

    /// File receiving delivered data, one integer per line.
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Start the output file empty instead of appending to it.
    #[arg(long, default_value_t = false)]
    truncate: bool,

    /// Write a JSON trace of the finished session.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigFile {
    session: SessionConfig,
    channel: ChannelConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("rdt-lab-sim starting…");

    let base = match &args.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::default(),
    };

    let report = if let Some(path) = &args.scenario {
        let scenario = load_scenario(path)?;
        let mut session_config = base.session;
        scenario.session.apply_to(&mut session_config);
        let mut channel_config = base.channel;
        scenario.channel.apply_to(&mut channel_config);
        args.session_override()?.apply_to(&mut session_config);
        args.channel_override().apply_to(&mut channel_config);
        run_scenario_with(&scenario, session_config, channel_config).await?
    } else {
        let mut session_config = base.session;
        args.session_override()?.apply_to(&mut session_config);
        let mut channel_config = base.channel;
        args.channel_override().apply_to(&mut channel_config);
        run_transfer(&args, session_config, channel_config).await?
    };

    info!(
        "{} block(s) sent with {} transmission(s) in {} ms; {} delivered",
        report.blocks_sent,
        report.sender_packet_count(),
        report.duration_ms,
        report.receiver.delivered
    );

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

impl Args {
    fn session_override(&self) -> Result<SessionConfigOverride> {
        Ok(SessionConfigOverride {
            variant: self.variant,
            window_size: self.window_size,
            block_size: self.block_size,
            timeout_ms: self.timeout_ms,
            delivery_batch: self.delivery_batch,
            data_eflag: self.data_eflag.map(parse_eflag).transpose()?,
            ack_eflag: self.ack_eflag.map(parse_eflag).transpose()?,
        })
    }

    fn channel_override(&self) -> ChannelConfigOverride {
        ChannelConfigOverride {
            loss_rate: self.loss_rate,
            corrupt_rate: self.corrupt_rate,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            seed: self.seed,
        }
    }
}

fn parse_eflag(code: u8) -> Result<ErrorFlag> {
    ErrorFlag::from_code(code).with_context(|| format!("Error flag {code} is not in 0..=7"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_transfer(
    args: &Args,
    session_config: SessionConfig,
    channel_config: ChannelConfig,
) -> Result<SessionReport> {
    let sink = if args.truncate {
        FileSink::create(&args.output)
    } else {
        FileSink::append(&args.output)
    }
    .with_context(|| format!("Failed to open output file {}", args.output.display()))?;

    let block_size = session_config.block_size;
    let mut session = Session::start(session_config, channel_config, Box::new(sink))?;
    info!(
        "Sending {} block(s) of {} to {}",
        args.blocks,
        block_size,
        args.output.display()
    );
    let sent = session
        .transfer(workload::generate(args.blocks, block_size))
        .await;
    let report = session.finish().await?;
    sent.context("Transfer failed")?;
    Ok(report)
}

fn load_config(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

fn write_trace(path: &Path, report: &SessionReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize session trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
