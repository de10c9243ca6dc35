//! Measurement backends and selection.
//!
//! A provider performs exactly one blocking measurement per call. Which one runs is
//! decided once per run by probing for the backend executables; the probe is passed in so
//! selection can be exercised without touching `PATH`.

use crate::engine::ookla::OoklaCli;
use crate::engine::speedtest_cli::SpeedtestCli;
use crate::error::ProviderError;
use crate::model::{ProviderKind, Sample};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Conversion divisor from bits/s to Mbps.
pub(crate) const BITS_PER_MEGABIT: f64 = 1_000_000.0;

pub trait Provider: Send {
    fn kind(&self) -> ProviderKind;

    /// Run a single measurement.
    fn measure_once(&self) -> Result<Sample, ProviderError>;
}

/// Capability probe: resolve an executable name to a path if it is installed.
pub type Probe<'a> = &'a dyn Fn(&str) -> Option<PathBuf>;

/// Pick the backend for this run. The native CLI wins over the library entry point.
pub fn select_provider(
    force_cli: bool,
    probe: Probe<'_>,
) -> Result<Box<dyn Provider>, ProviderError> {
    if let Some(path) = probe(ProviderKind::NativeCli.program()) {
        log::info!("using native speedtest CLI at {}", path.display());
        return Ok(Box::new(OoklaCli::new(path)));
    }
    if force_cli {
        return Err(ProviderError::unavailable(format!(
            "`{}` not found on PATH and --force-cli is set",
            ProviderKind::NativeCli.program()
        )));
    }
    if let Some(path) = probe(ProviderKind::Library.program()) {
        log::info!("native CLI missing, falling back to {}", path.display());
        return Ok(Box::new(SpeedtestCli::new(path)));
    }
    Err(ProviderError::unavailable(format!(
        "neither `{}` nor `{}` found on PATH",
        ProviderKind::NativeCli.program(),
        ProviderKind::Library.program()
    )))
}

/// Default probe: search `PATH` for an executable file.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| candidates(&dir, name))
        .find(|p| is_executable(p))
}

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(name)];
    if cfg!(windows) {
        out.push(dir.join(format!("{name}.exe")));
    }
    out
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Output of one backend invocation.
pub(crate) struct CommandOutput {
    pub stdout: Vec<u8>,
    pub elapsed_s: f64,
}

/// Run a backend to completion and return its stdout, or a typed failure.
pub(crate) fn run_backend<I, S>(
    kind: ProviderKind,
    program: &Path,
    args: I,
) -> Result<CommandOutput, ProviderError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    log::debug!("running {}", program.display());
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ProviderError::Launch { kind, source })?;
    let elapsed_s = start.elapsed().as_secs_f64();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        return Err(ProviderError::NonZeroExit {
            kind,
            code: output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into()),
            stderr: detail,
        });
    }

    log::debug!("{} finished in {:.1}s", kind, elapsed_s);
    Ok(CommandOutput {
        stdout: output.stdout,
        elapsed_s,
    })
}

/// Reject a negative reading reported by a backend.
pub(crate) fn non_negative(
    kind: ProviderKind,
    field: &str,
    value: f64,
) -> Result<f64, ProviderError> {
    if value < 0.0 {
        return Err(ProviderError::malformed(
            kind,
            format!("negative {field}: {value}"),
        ));
    }
    Ok(value)
}

/// Join two optional name parts as `"a (b)"`, `"a"` or `"b"`.
pub(crate) fn display_name(primary: Option<String>, secondary: Option<String>) -> Option<String> {
    let clean = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    match (clean(primary), clean(secondary)) {
        (Some(a), Some(b)) => Some(format!("{a} ({b})")),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
