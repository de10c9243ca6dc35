//! Multi-pass sampling and spike filtering.
//!
//! Runs the provider a fixed number of times in sequence, drops the optional warm-up,
//! removes download spikes relative to the median and averages what is left.

use crate::error::{ProviderError, SamplerError};
use crate::metrics;
use crate::model::{Advisory, PassLabel, RunConfig, RunResult, Sample, TestEvent};

/// Fewer samples than this are never filtered.
const MIN_SAMPLES_FOR_FILTER: usize = 3;

/// Average download above which the asymmetry check applies (Mbps).
const SUSPICIOUS_DOWNLOAD_MBPS: f64 = 1000.0;

/// Download-to-upload ratio above which a fast result is flagged.
const SUSPICIOUS_RATIO: f64 = 2.0;

/// Download cutoff (`median * factor`), or `None` when there are too few samples to judge.
pub fn spike_cutoff(samples: &[Sample], threshold_factor: f64) -> Option<f64> {
    if samples.len() < MIN_SAMPLES_FOR_FILTER {
        return None;
    }
    let downloads: Vec<f64> = samples.iter().map(Sample::download_mbps).collect();
    metrics::median(&downloads).map(|m| m * threshold_factor)
}

/// Drop samples whose download exceeds `median * threshold_factor`.
///
/// Returns the input unchanged when there are fewer than three samples or when every
/// sample would be removed. Upload, ping and low downloads are never filtered.
pub fn sanitize(samples: &[Sample], threshold_factor: f64) -> Vec<Sample> {
    let Some(cutoff) = spike_cutoff(samples, threshold_factor) else {
        return samples.to_vec();
    };
    let kept: Vec<Sample> = samples
        .iter()
        .filter(|s| s.download_mbps() <= cutoff)
        .cloned()
        .collect();
    if kept.is_empty() {
        log::warn!("spike filter would remove every sample; keeping unfiltered set");
        return samples.to_vec();
    }
    kept
}

/// Flag results that are both very fast and strongly download-heavy.
pub fn speed_advisory(avg_download_mbps: f64, avg_upload_mbps: f64) -> Option<Advisory> {
    if avg_download_mbps > SUSPICIOUS_DOWNLOAD_MBPS
        && avg_download_mbps > SUSPICIOUS_RATIO * avg_upload_mbps
    {
        Some(Advisory::SuspiciousSpeed {
            avg_download_mbps,
            avg_upload_mbps,
        })
    } else {
        None
    }
}

/// Run `measure` `cfg.total_runs()` times and aggregate the samples.
///
/// The first call is a discarded warm-up when `cfg.warmup` is set. The first failing call
/// ends collection; samples gathered before it are still aggregated and the failure is
/// recorded in [`RunResult::aborted`]. `observe` receives progress events only.
pub fn execute<F, O>(
    cfg: &RunConfig,
    mut measure: F,
    mut observe: O,
) -> Result<RunResult, SamplerError>
where
    F: FnMut() -> Result<Sample, ProviderError>,
    O: FnMut(TestEvent),
{
    if cfg.passes == 0 {
        return Err(SamplerError::InvalidPasses(cfg.passes));
    }

    let total_runs = cfg.total_runs();
    let mut raw_results: Vec<Sample> = Vec::with_capacity(cfg.passes as usize);
    let mut failure: Option<ProviderError> = None;

    for call in 0..total_runs {
        let label = if cfg.warmup && call == 0 {
            PassLabel::WarmUp
        } else {
            let index = if cfg.warmup { call } else { call + 1 };
            PassLabel::Measured {
                index,
                of: cfg.passes,
            }
        };

        observe(TestEvent::PassStarted { label });
        match measure() {
            Ok(sample) => {
                log::debug!(
                    "{label}: down {:.2} Mbps, up {:.2} Mbps, ping {:.1} ms",
                    sample.download_mbps(),
                    sample.upload_mbps(),
                    sample.ping_ms()
                );
                observe(TestEvent::PassCompleted {
                    label,
                    sample: sample.clone(),
                });
                if label != PassLabel::WarmUp {
                    raw_results.push(sample);
                }
            }
            Err(e) => {
                log::warn!("{label} failed, stopping run: {e}");
                observe(TestEvent::PassFailed {
                    label,
                    message: e.to_string(),
                });
                failure = Some(e);
                break;
            }
        }
    }

    if raw_results.is_empty() {
        return Err(SamplerError::NoSuccessfulSamples { cause: failure });
    }

    let mut advisories = Vec::new();
    let filtered_results = if cfg.filter {
        let filtered = sanitize(&raw_results, cfg.threshold_factor);
        let removed = raw_results.len() - filtered.len();
        if removed > 0 {
            if let Some(cutoff_mbps) = spike_cutoff(&raw_results, cfg.threshold_factor) {
                advisories.push(Advisory::OutliersRemoved {
                    removed,
                    cutoff_mbps,
                });
            }
        }
        filtered
    } else {
        raw_results.clone()
    };

    let avg = |f: fn(&Sample) -> f64| -> f64 {
        let values: Vec<f64> = filtered_results.iter().map(f).collect();
        metrics::mean(&values).unwrap_or(0.0)
    };
    let avg_download_mbps = avg(Sample::download_mbps);
    let avg_upload_mbps = avg(Sample::upload_mbps);
    let avg_ping_ms = avg(Sample::ping_ms);

    if let Some(a) = speed_advisory(avg_download_mbps, avg_upload_mbps) {
        advisories.push(a);
    }

    // filtered_results is never empty here: sanitize falls back to the raw set.
    let first = &filtered_results[0];
    let server = first.server().map(str::to_owned);
    let isp = first.isp().map(str::to_owned);
    let source = first.source();
    let passes_used = filtered_results.len();

    Ok(RunResult {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        run_id: cfg.run_id.clone(),
        config: cfg.clone(),
        raw_results,
        filtered_results,
        avg_download_mbps,
        avg_upload_mbps,
        avg_ping_ms,
        server,
        isp,
        source,
        passes_used,
        advisories,
        aborted: failure.map(|e| e.to_string()),
    })
}
