//! Text summary builder for CLI output.
//!
//! This module formats per-pass lines and the averages block for text mode.

use crate::metrics;
use crate::model::{mbps_to_mb_per_s, PassLabel, RunResult, Sample};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One progress line for a finished call.
pub(crate) fn pass_line(label: PassLabel, sample: &Sample) -> String {
    let suffix = if label == PassLabel::WarmUp {
        " (discarded)"
    } else {
        ""
    };
    format!(
        "{label}: down {:.2} Mbps, up {:.2} Mbps, ping {:.1} ms [{:.1}s]{suffix}",
        sample.download_mbps(),
        sample.upload_mbps(),
        sample.ping_ms(),
        sample.elapsed_s()
    )
}

/// Build a text summary from a finished run.
pub(crate) fn build_text_summary(result: &RunResult, show_raw: bool) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Backend: {}", result.source));
    if let Some(server) = result.server.as_deref() {
        lines.push(format!("Server: {server}"));
    }
    if let Some(isp) = result.isp.as_deref() {
        lines.push(format!("ISP: {isp}"));
    }
    lines.push(format!(
        "Passes used: {} of {} collected ({} filtered)",
        result.passes_used,
        result.raw_results.len(),
        result.outliers_removed()
    ));

    lines.push(format!(
        "Download: {:.2} Mbps ({:.2} MB/s)",
        result.avg_download_mbps,
        mbps_to_mb_per_s(result.avg_download_mbps)
    ));
    lines.push(format!(
        "Upload:   {:.2} Mbps ({:.2} MB/s)",
        result.avg_upload_mbps,
        mbps_to_mb_per_s(result.avg_upload_mbps)
    ));
    lines.push(format!("Ping:     {:.1} ms", result.avg_ping_ms));

    let downloads: Vec<f64> = result
        .filtered_results
        .iter()
        .map(Sample::download_mbps)
        .collect();
    if downloads.len() > 1 {
        if let Some((_, median, min, max)) = metrics::compute_metrics(&downloads) {
            lines.push(format!(
                "Download spread: med {:.2} min {:.2} max {:.2} Mbps",
                median, min, max
            ));
        }
    }

    if let Some(reason) = result.aborted.as_deref() {
        lines.push(format!("Run stopped early: {reason}"));
    }
    for advisory in &result.advisories {
        lines.push(format!("Note: {}", advisory.to_message()));
    }

    if show_raw {
        lines.push("Raw samples:".to_string());
        for (i, s) in result.raw_results.iter().enumerate() {
            let kept = result.filtered_results.contains(s);
            lines.push(format!(
                "  #{}: down {:.2} up {:.2} ping {:.1}{}",
                i + 1,
                s.download_mbps(),
                s.upload_mbps(),
                s.ping_ms(),
                if kept { "" } else { " (filtered)" }
            ));
        }
    }

    TextSummary { lines }
}
