//! `speedtest-cli` backend, the command-line entry point of the `speedtest` library.
//!
//! Used when the native CLI is not installed. Bandwidth is reported in bits per second.

use crate::engine::provider::{
    display_name, non_negative, run_backend, Provider, BITS_PER_MEGABIT,
};
use crate::error::ProviderError;
use crate::model::{ProviderKind, Sample};
use serde::Deserialize;
use std::path::PathBuf;

const ARGS: [&str; 2] = ["--json", "--secure"];

pub struct SpeedtestCli {
    program: PathBuf,
}

impl SpeedtestCli {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl Provider for SpeedtestCli {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Library
    }

    fn measure_once(&self) -> Result<Sample, ProviderError> {
        let out = run_backend(ProviderKind::Library, &self.program, ARGS)?;
        Ok(parse_payload(&out.stdout)?.with_elapsed(out.elapsed_s))
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    /// Bits per second.
    download: f64,
    /// Bits per second.
    upload: f64,
    ping: f64,
    server: Option<Server>,
    client: Option<Client>,
}

#[derive(Debug, Deserialize)]
struct Server {
    sponsor: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Client {
    isp: Option<String>,
}

pub(crate) fn parse_payload(stdout: &[u8]) -> Result<Sample, ProviderError> {
    let payload: Payload = serde_json::from_slice(stdout)
        .map_err(|e| ProviderError::malformed(ProviderKind::Library, e.to_string()))?;
    let download = non_negative(ProviderKind::Library, "download", payload.download)?;
    let upload = non_negative(ProviderKind::Library, "upload", payload.upload)?;
    let ping = non_negative(ProviderKind::Library, "ping", payload.ping)?;

    let server = payload
        .server
        .and_then(|s| display_name(s.sponsor, s.name));
    let isp = payload
        .client
        .and_then(|c| c.isp)
        .filter(|isp| !isp.trim().is_empty());

    Ok(Sample::new(
        ProviderKind::Library,
        download / BITS_PER_MEGABIT,
        upload / BITS_PER_MEGABIT,
        ping,
        server,
        isp,
        0.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_bits_per_second_to_mbps() {
        let json = r#"{"download": 93500000.0, "upload": 11250000.0, "ping": 17.804,
            "server": {"url": "http://speedtest.example.net:8080/speedtest/upload.php", "name": "Frankfurt", "country": "Germany", "sponsor": "Example Hosting", "id": "1746", "d": 12.4, "latency": 17.804},
            "timestamp": "2024-05-01T10:00:00.000000Z", "bytes_sent": 14000000, "bytes_received": 117000000, "share": null,
            "client": {"ip": "203.0.113.7", "isp": "Acme Fiber", "country": "DE"}}"#;
        let s = parse_payload(json.as_bytes()).unwrap();
        assert_eq!(s.download_mbps(), 93.5);
        assert_eq!(s.upload_mbps(), 11.25);
        assert_eq!(s.ping_ms(), 17.804);
        assert_eq!(s.server(), Some("Example Hosting (Frankfurt)"));
        assert_eq!(s.isp(), Some("Acme Fiber"));
        assert_eq!(s.source(), ProviderKind::Library);
    }

    #[test]
    fn server_and_client_are_optional() {
        let s = parse_payload(br#"{"download": 1000000, "upload": 500000, "ping": 9}"#).unwrap();
        assert_eq!(s.download_mbps(), 1.0);
        assert_eq!(s.server(), None);
        assert_eq!(s.isp(), None);
    }

    #[test]
    fn rejects_negative_readings() {
        let err = parse_payload(br#"{"download": -50000000, "upload": 10000000, "ping": -3}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedPayload { .. }));
        assert!(err.to_string().contains("negative download"));

        let err = parse_payload(br#"{"download": 50000000, "upload": -1, "ping": 3}"#).unwrap_err();
        assert!(err.to_string().contains("negative upload"));
    }

    #[test]
    fn rejects_traceback() {
        let err = parse_payload(b"Traceback (most recent call last):\n  ...").unwrap_err();
        assert!(matches!(
            err,
            ProviderError::MalformedPayload {
                kind: ProviderKind::Library,
                ..
            }
        ));
    }
}
