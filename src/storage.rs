//! Run history and exports.
//!
//! Runs are saved as one pretty-printed JSON file each under the platform data directory.

use crate::model::RunResult;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const APP_DIR: &str = "netspeed-cli";
const CSV_HEADER: &str =
    "timestamp_utc,run_id,pass,download_mbps,upload_mbps,ping_ms,elapsed_s,kept,source,server,isp";

/// Directory holding saved runs.
pub fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("could not determine local data directory")?;
    Ok(base.join(APP_DIR).join("runs"))
}

/// Save a run into the default history directory.
pub fn save_run(result: &RunResult) -> Result<PathBuf> {
    save_run_in(&runs_dir()?, result)
}

/// Load up to `limit` saved runs, newest first.
pub fn load_recent(limit: usize) -> Result<Vec<RunResult>> {
    load_recent_in(&runs_dir()?, limit)
}

pub(crate) fn save_run_in(dir: &Path, result: &RunResult) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let name = format!(
        "run-{}-{}.json",
        result.timestamp_utc.replace(':', "-"),
        result.run_id
    );
    let path = dir.join(name);
    export_json(&path, result)?;
    Ok(path)
}

pub(crate) fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<RunResult>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();

    // RFC 3339 fractions vary in width, so order on the parsed timestamp, not the file name.
    let mut runs = Vec::new();
    for path in paths {
        let data = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let run = match serde_json::from_slice::<RunResult>(&data) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping unreadable history file {}: {e}", path.display());
                continue;
            }
        };
        match OffsetDateTime::parse(&run.timestamp_utc, &Rfc3339) {
            Ok(ts) => runs.push((ts, run)),
            Err(e) => log::warn!("skipping history file {} with bad timestamp: {e}", path.display()),
        }
    }
    runs.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(runs.into_iter().take(limit).map(|(_, r)| r).collect())
}

pub fn export_json(path: &Path, result: &RunResult) -> Result<()> {
    let data = serde_json::to_vec_pretty(result).context("serialize run result")?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))
}

/// Write one CSV row per raw sample, marking which ones survived the filter.
pub fn export_csv(path: &Path, result: &RunResult) -> Result<()> {
    fs::write(path, to_csv(result)).with_context(|| format!("write {}", path.display()))
}

fn to_csv(result: &RunResult) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for (i, s) in result.raw_results.iter().enumerate() {
        let kept = result.filtered_results.contains(s);
        out.push_str(&format!(
            "{},{},{},{:.3},{:.3},{:.3},{:.3},{},{},{},{}\n",
            csv_field(&result.timestamp_utc),
            csv_field(&result.run_id),
            i + 1,
            s.download_mbps(),
            s.upload_mbps(),
            s.ping_ms(),
            s.elapsed_s(),
            kept,
            s.source(),
            csv_field(s.server().unwrap_or("")),
            csv_field(s.isp().unwrap_or("")),
        ));
    }
    out
}

fn csv_field(v: &str) -> String {
    if v.contains([',', '"', '\n']) {
        format!("\"{}\"", v.replace('"', "\"\""))
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderKind, RunConfig, Sample};

    fn run(ts: &str, id: &str) -> RunResult {
        let s = Sample::new(
            ProviderKind::Library,
            40.0,
            8.0,
            14.0,
            Some("Acme, Inc (Berlin)".into()),
            None,
            21.0,
        );
        RunResult {
            timestamp_utc: ts.into(),
            run_id: id.into(),
            config: RunConfig::default(),
            raw_results: vec![s.clone()],
            filtered_results: vec![s],
            avg_download_mbps: 40.0,
            avg_upload_mbps: 8.0,
            avg_ping_ms: 14.0,
            server: None,
            isp: None,
            source: ProviderKind::Library,
            passes_used: 1,
            advisories: Vec::new(),
            aborted: None,
        }
    }

    #[test]
    fn save_and_load_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        save_run_in(dir.path(), &run("2024-05-01T10:00:00Z", "a")).unwrap();
        save_run_in(dir.path(), &run("2024-05-02T10:00:00Z", "b")).unwrap();
        save_run_in(dir.path(), &run("2024-05-03T10:00:00Z", "c")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = load_recent_in(dir.path(), 2).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(loaded[0].raw_results[0].download_mbps(), 40.0);
    }

    #[test]
    fn whole_second_run_orders_before_fractions_of_that_second() {
        let dir = tempfile::tempdir().unwrap();
        save_run_in(dir.path(), &run("2024-05-01T10:00:00.5Z", "late")).unwrap();
        save_run_in(dir.path(), &run("2024-05-01T10:00:00Z", "whole")).unwrap();
        save_run_in(dir.path(), &run("2024-05-01T10:00:00.25Z", "early")).unwrap();
        save_run_in(dir.path(), &run("2024-05-01T09:59:59.999Z", "before")).unwrap();

        let loaded = load_recent_in(dir.path(), 10).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["late", "early", "whole", "before"]);
    }

    #[test]
    fn load_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        save_run_in(dir.path(), &run("2024-05-01T10:00:00Z", "a")).unwrap();
        fs::write(dir.path().join("run-9999.json"), "{not json").unwrap();
        let loaded = load_recent_in(dir.path(), 10).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn load_from_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_recent_in(&dir.path().join("nope"), 5).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn csv_quotes_commas() {
        let csv = to_csv(&run("2024-05-01T10:00:00Z", "a"));
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("2024-05-01T10:00:00Z,a,1,40.000,8.000,14.000,21.000,true,speedtest-cli,\"Acme, Inc (Berlin)\",")
        );
    }
}
