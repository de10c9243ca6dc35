//! Ookla `speedtest` native CLI backend.
//!
//! Invoked with `--format=json`; bandwidth is reported in bytes per second.

use crate::engine::provider::{
    display_name, non_negative, run_backend, Provider, BITS_PER_MEGABIT,
};
use crate::error::ProviderError;
use crate::model::{ProviderKind, Sample};
use serde::Deserialize;
use std::path::PathBuf;

const ARGS: [&str; 3] = ["--format=json", "--accept-license", "--accept-gdpr"];

pub struct OoklaCli {
    program: PathBuf,
}

impl OoklaCli {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl Provider for OoklaCli {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NativeCli
    }

    fn measure_once(&self) -> Result<Sample, ProviderError> {
        let out = run_backend(ProviderKind::NativeCli, &self.program, ARGS)?;
        Ok(parse_payload(&out.stdout)?.with_elapsed(out.elapsed_s))
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "type")]
    kind: Option<String>,
    ping: Option<Ping>,
    download: Option<Bandwidth>,
    upload: Option<Bandwidth>,
    isp: Option<String>,
    server: Option<Server>,
}

#[derive(Debug, Deserialize)]
struct Ping {
    latency: f64,
}

#[derive(Debug, Deserialize)]
struct Bandwidth {
    /// Bytes per second.
    bandwidth: f64,
}

#[derive(Debug, Deserialize)]
struct Server {
    name: Option<String>,
    location: Option<String>,
}

/// Parse the `speedtest --format=json` output into a sample.
///
/// The CLI may print log records as separate JSON lines; the `result` record is used.
pub(crate) fn parse_payload(stdout: &[u8]) -> Result<Sample, ProviderError> {
    let text = String::from_utf8_lossy(stdout);
    let mut last_err = None;
    let mut typed = None;
    let mut untyped = None;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Payload>(line) {
            Ok(p) => match p.kind.as_deref() {
                Some("result") => typed = Some(p),
                None => untyped = untyped.or(Some(p)),
                Some(other) => log::debug!("skipping speedtest record of type {other:?}"),
            },
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    // A record tagged `result` always wins over untagged output.
    let Some(payload) = typed.or(untyped) else {
        return Err(ProviderError::malformed(
            ProviderKind::NativeCli,
            last_err.unwrap_or_else(|| "no result record in output".into()),
        ));
    };

    let missing =
        |field: &str| ProviderError::malformed(ProviderKind::NativeCli, format!("missing `{field}`"));
    let download = payload.download.ok_or_else(|| missing("download"))?;
    let upload = payload.upload.ok_or_else(|| missing("upload"))?;
    let ping = payload.ping.ok_or_else(|| missing("ping"))?;

    let kind = ProviderKind::NativeCli;
    let download = non_negative(kind, "download", download.bandwidth)?;
    let upload = non_negative(kind, "upload", upload.bandwidth)?;
    let ping = non_negative(kind, "ping", ping.latency)?;

    let server = payload
        .server
        .and_then(|s| display_name(s.name, s.location));

    Ok(Sample::new(
        kind,
        download * 8.0 / BITS_PER_MEGABIT,
        upload * 8.0 / BITS_PER_MEGABIT,
        ping,
        server,
        payload.isp,
        0.0,
    ))
}
