use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::packet::ErrorFlag;

/// Protocol refinement to run. Every variant is a configuration of the same
/// engine; see `rdt_lab_core::policy` for what each one turns on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// RDT 1.0: ideal channel, no error handling.
    StopAndWait,
    /// RDT 2.0: checksum, positive ACKs, sender blocks until a match.
    Checksum,
    /// RDT 2.1/2.2: NACKs (or stale ACKs) trigger retransmission.
    Nack,
    /// RDT 3.0: one outstanding segment guarded by a retransmission timer.
    Timer,
    /// Go-Back-N with a single window-wide timer.
    GoBackN,
    /// Fixed-window TCP-like transport with per-segment timers.
    #[default]
    Windowed,
}

impl Variant {
    pub const ALL: [Variant; 6] = [
        Variant::StopAndWait,
        Variant::Checksum,
        Variant::Nack,
        Variant::Timer,
        Variant::GoBackN,
        Variant::Windowed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Variant::StopAndWait => "stop-and-wait",
            Variant::Checksum => "checksum",
            Variant::Nack => "nack",
            Variant::Timer => "timer",
            Variant::GoBackN => "go-back-n",
            Variant::Windowed => "windowed",
        }
    }

    /// Error flag the lab tags data segments with for this variant.
    pub fn default_data_eflag(&self) -> ErrorFlag {
        match self {
            Variant::StopAndWait | Variant::Checksum => ErrorFlag::None,
            Variant::Nack => ErrorFlag::Error,
            Variant::Timer => ErrorFlag::ErrorLoss,
            Variant::GoBackN | Variant::Windowed => ErrorFlag::All,
        }
    }

    /// Error flag the lab tags ACK/NACK replies with for this variant.
    pub fn default_ack_eflag(&self) -> ErrorFlag {
        self.default_data_eflag()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "stop-and-wait" | "rdt1" | "rdt1.0" => Ok(Variant::StopAndWait),
            "checksum" | "rdt2" | "rdt2.0" => Ok(Variant::Checksum),
            "nack" | "rdt2.1" | "rdt2.2" => Ok(Variant::Nack),
            "timer" | "rdt3" | "rdt3.0" => Ok(Variant::Timer),
            "go-back-n" | "gbn" => Ok(Variant::GoBackN),
            "windowed" | "tcp" | "tahoe" | "reno" => Ok(Variant::Windowed),
            other => Err(format!(
                "unknown variant '{other}' (expected one of: {})",
                Variant::ALL.map(|v| v.name()).join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub variant: Variant,
    /// Window capacity for the windowed variants. Stop-and-wait variants use 1.
    pub window_size: usize,
    /// Payload elements per block.
    pub block_size: usize,
    /// Retransmission timer interval.
    pub timeout_ms: u64,
    /// Payloads buffered before the receiver flushes to the sink.
    pub delivery_batch: usize,
    /// Overrides [`Variant::default_data_eflag`].
    pub data_eflag: Option<ErrorFlag>,
    /// Overrides [`Variant::default_ack_eflag`].
    pub ack_eflag: Option<ErrorFlag>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            window_size: 16,
            block_size: 100,
            timeout_ms: 3000,
            delivery_batch: 20,
            data_eflag: None,
            ack_eflag: None,
        }
    }
}

impl SessionConfig {
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            ..Default::default()
        }
    }

    pub fn data_eflag(&self) -> ErrorFlag {
        self.data_eflag
            .unwrap_or_else(|| self.variant.default_data_eflag())
    }

    pub fn ack_eflag(&self) -> ErrorFlag {
        self.ack_eflag
            .unwrap_or_else(|| self.variant.default_ack_eflag())
    }
}

/// Fault-injection parameters of the simulated channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SessionConfigOverride {
    pub variant: Option<Variant>,
    pub window_size: Option<usize>,
    pub block_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub delivery_batch: Option<usize>,
    pub data_eflag: Option<ErrorFlag>,
    pub ack_eflag: Option<ErrorFlag>,
}

impl SessionConfigOverride {
    pub fn apply_to(&self, config: &mut SessionConfig) {
        if let Some(v) = self.variant {
            config.variant = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.block_size {
            config.block_size = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.delivery_batch {
            config.delivery_batch = v;
        }
        if let Some(v) = self.data_eflag {
            config.data_eflag = Some(v);
        }
        if let Some(v) = self.ack_eflag {
            config.ack_eflag = Some(v);
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChannelConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl ChannelConfigOverride {
    pub fn apply_to(&self, config: &mut ChannelConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}
