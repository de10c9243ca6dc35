mod ookla;
pub mod provider;
pub mod sampler;
mod speedtest_cli;

use crate::model::{InfoEvent, RunConfig, RunResult, TestEvent};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc;

pub struct TestEngine {
    cfg: RunConfig,
    probe: fn(&str) -> Option<PathBuf>,
}

impl TestEngine {
    pub fn new(cfg: RunConfig) -> Self {
        Self::with_probe(cfg, provider::find_on_path)
    }

    /// Build an engine that discovers backends through `probe` instead of `PATH`.
    pub fn with_probe(cfg: RunConfig, probe: fn(&str) -> Option<PathBuf>) -> Self {
        Self { cfg, probe }
    }

    /// Select a backend and run all passes on a blocking worker, streaming progress events.
    pub async fn run(self, event_tx: mpsc::UnboundedSender<TestEvent>) -> Result<RunResult> {
        tokio::task::spawn_blocking(move || self.run_blocking(&event_tx))
            .await
            .context("sampler task failed")?
    }

    fn run_blocking(&self, event_tx: &mpsc::UnboundedSender<TestEvent>) -> Result<RunResult> {
        let provider = provider::select_provider(self.cfg.force_cli, &self.probe)
            .context("no usable speed test backend")?;
        let _ = event_tx.send(TestEvent::ProviderSelected {
            kind: provider.kind(),
        });
        log::info!(
            "run {}: {} pass(es), warm-up {}, filter {}",
            self.cfg.run_id,
            self.cfg.passes,
            self.cfg.warmup,
            self.cfg.filter
        );

        let cooldown = self.cfg.cooldown;
        let mut calls = 0u32;
        let measure = || {
            if calls > 0 && !cooldown.is_zero() {
                let _ = event_tx.send(TestEvent::Info(InfoEvent::Cooldown { duration: cooldown }));
                std::thread::sleep(cooldown);
            }
            calls += 1;
            provider.measure_once()
        };

        let result = sampler::execute(&self.cfg, measure, |ev| {
            let _ = event_tx.send(ev);
        })
        .context("speed test failed")?;
        if result.aborted.is_some() {
            let _ = event_tx.send(TestEvent::Info(InfoEvent::Message(format!(
                "Continuing with {} collected sample(s)",
                result.raw_results.len()
            ))));
        }
        Ok(result)
    }
}
