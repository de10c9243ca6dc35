use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default cutoff factor for the download spike filter.
pub const DEFAULT_THRESHOLD_FACTOR: f64 = 2.2;

/// Upper bound on measured passes exposed through the CLI.
pub const MAX_PASSES: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub passes: u32,
    pub warmup: bool,
    pub filter: bool,
    pub threshold_factor: f64,
    pub force_cli: bool,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl RunConfig {
    /// Total provider calls for this configuration, warm-up included.
    pub fn total_runs(&self) -> u32 {
        self.passes + u32::from(self.warmup)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            passes: 3,
            warmup: false,
            filter: true,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
            force_cli: false,
            cooldown: Duration::ZERO,
        }
    }
}

/// Which backend produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Ookla's native `speedtest` binary.
    NativeCli,
    /// The `speedtest-cli` library entry point.
    Library,
}

impl ProviderKind {
    /// Executable name probed on `PATH`.
    pub fn program(self) -> &'static str {
        match self {
            ProviderKind::NativeCli => "speedtest",
            ProviderKind::Library => "speedtest-cli",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// One completed measurement, normalised to Mbps and milliseconds.
///
/// Fields are private; a sample is built once by a provider and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    download_mbps: f64,
    upload_mbps: f64,
    ping_ms: f64,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    source: ProviderKind,
    elapsed_s: f64,
}

impl Sample {
    pub fn new(
        source: ProviderKind,
        download_mbps: f64,
        upload_mbps: f64,
        ping_ms: f64,
        server: Option<String>,
        isp: Option<String>,
        elapsed_s: f64,
    ) -> Self {
        debug_assert!(
            download_mbps >= 0.0 && upload_mbps >= 0.0 && ping_ms >= 0.0,
            "providers reject negative readings"
        );
        Self {
            download_mbps,
            upload_mbps,
            ping_ms,
            server,
            isp,
            source,
            elapsed_s,
        }
    }

    /// Same sample with the wall-clock duration of the call that produced it.
    pub fn with_elapsed(self, elapsed_s: f64) -> Self {
        Self { elapsed_s, ..self }
    }

    pub fn download_mbps(&self) -> f64 {
        self.download_mbps
    }

    pub fn upload_mbps(&self) -> f64 {
        self.upload_mbps
    }

    pub fn ping_ms(&self) -> f64 {
        self.ping_ms
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn isp(&self) -> Option<&str> {
        self.isp.as_deref()
    }

    pub fn source(&self) -> ProviderKind {
        self.source
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_s
    }
}

/// Megabytes per second for display.
pub fn mbps_to_mb_per_s(mbps: f64) -> f64 {
    mbps / 8.0
}

/// Non-fatal observations attached to a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// The spike filter dropped some samples.
    OutliersRemoved { removed: usize, cutoff_mbps: f64 },
    /// Download looks implausibly high and asymmetric.
    SuspiciousSpeed {
        avg_download_mbps: f64,
        avg_upload_mbps: f64,
    },
}

impl Advisory {
    pub fn to_message(&self) -> String {
        match self {
            Advisory::OutliersRemoved {
                removed,
                cutoff_mbps,
            } => format!(
                "Filtered {} outlier pass(es) above {:.2} Mbps",
                removed, cutoff_mbps
            ),
            Advisory::SuspiciousSpeed {
                avg_download_mbps,
                avg_upload_mbps,
            } => format!(
                "Unusually high download ({:.2} Mbps vs {:.2} Mbps upload); verify with an independent test",
                avg_download_mbps, avg_upload_mbps
            ),
        }
    }
}

/// Which call of a run an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassLabel {
    WarmUp,
    /// 1-based index of a measured pass out of the configured total.
    Measured { index: u32, of: u32 },
}

impl fmt::Display for PassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassLabel::WarmUp => f.write_str("warm-up"),
            PassLabel::Measured { index, of } => write!(f, "pass {}/{}", index, of),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestEvent {
    ProviderSelected {
        kind: ProviderKind,
    },
    PassStarted {
        label: PassLabel,
    },
    PassCompleted {
        label: PassLabel,
        sample: Sample,
    },
    PassFailed {
        label: PassLabel,
        message: String,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the engine and consumed by CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Cooldown { duration: Duration },
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Cooldown { duration } => {
                format!("Cooling down for {}", humantime::format_duration(*duration))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub timestamp_utc: String,
    pub run_id: String,
    pub config: RunConfig,
    pub raw_results: Vec<Sample>,
    pub filtered_results: Vec<Sample>,
    pub avg_download_mbps: f64,
    pub avg_upload_mbps: f64,
    pub avg_ping_ms: f64,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    pub source: ProviderKind,
    pub passes_used: usize,
    #[serde(default)]
    pub advisories: Vec<Advisory>,
    /// Set when a provider failure cut the run short after some samples were collected.
    #[serde(default)]
    pub aborted: Option<String>,
}

impl RunResult {
    pub fn outliers_removed(&self) -> usize {
        self.raw_results.len() - self.filtered_results.len()
    }

    pub fn is_suspicious(&self) -> bool {
        self.advisories
            .iter()
            .any(|a| matches!(a, Advisory::SuspiciousSpeed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_runs_counts_warmup() {
        for passes in 1..=MAX_PASSES {
            let mut cfg = RunConfig {
                passes,
                ..RunConfig::default()
            };
            assert_eq!(cfg.total_runs(), passes);
            cfg.warmup = true;
            assert_eq!(cfg.total_runs(), passes + 1);
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "providers reject negative readings")]
    fn sample_refuses_negative_values_in_debug() {
        Sample::new(ProviderKind::Library, -1.0, 2.0, 0.5, None, None, 1.0);
    }

    #[test]
    fn pass_labels_are_distinguishable() {
        assert_eq!(PassLabel::WarmUp.to_string(), "warm-up");
        assert_eq!(PassLabel::Measured { index: 2, of: 3 }.to_string(), "pass 2/3");
    }

    #[test]
    fn mb_per_s_is_an_eighth() {
        assert_eq!(mbps_to_mb_per_s(80.0), 10.0);
    }

    #[test]
    fn config_serializes_cooldown_as_humantime() {
        let cfg = RunConfig {
            cooldown: Duration::from_millis(1500),
            ..RunConfig::default()
        };
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["cooldown"], "1s 500ms");
    }
}
