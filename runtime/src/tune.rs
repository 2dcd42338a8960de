//! Parameter tuning by measurement.
//!
//! Times a workload under candidate values of one cached parameter and keeps the fastest.

use std::time::{Duration, Instant};

use kiln_device::DeviceInfo;

use crate::error::Result;
use crate::runtime::ComputeRuntime;

/// How many times each candidate runs.
#[derive(Debug, Clone)]
pub struct TuneConfig {
    /// Untimed runs; the first also pays for compilation.
    pub warmup_runs: usize,
    pub timing_runs: usize,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self { warmup_runs: 1, timing_runs: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub min: Duration,
    pub mean: Duration,
    pub runs: Vec<Duration>,
}

/// Run `workload` `warmup_runs` times untimed, then `timing_runs` times timed.
pub fn measure(config: &TuneConfig, mut workload: impl FnMut() -> Result<()>) -> Result<Measurement> {
    for _ in 0..config.warmup_runs {
        workload()?;
    }

    let mut runs = Vec::with_capacity(config.timing_runs);
    for _ in 0..config.timing_runs.max(1) {
        let start = Instant::now();
        workload()?;
        runs.push(start.elapsed());
    }

    let min = runs.iter().copied().min().unwrap_or(Duration::ZERO);
    let total: Duration = runs.iter().sum();
    let mean = total / runs.len().max(1) as u32;
    Ok(Measurement { min, mean, runs })
}

#[derive(Debug, Clone)]
pub struct TuneResult {
    /// Fastest candidate, now stored in the parameter cache.
    pub best: usize,
    pub timings: Vec<(usize, Duration)>,
}

/// Time `workload` with `key`/`name` set to each candidate and store the fastest.
///
/// `workload` must be complete when it returns (wait on its events). The workload is expected
/// to read the parameter through the runtime. If a candidate fails the previous value is
/// restored and the error returned.
pub fn tune_parameter(
    rt: &ComputeRuntime,
    device: &DeviceInfo,
    key: &str,
    name: &str,
    candidates: &[usize],
    config: &TuneConfig,
    mut workload: impl FnMut() -> Result<()>,
) -> Result<Option<TuneResult>> {
    let Some(&first) = candidates.first() else {
        return Ok(None);
    };
    let params = rt.parameters();
    let previous = params.set(device, key, name, first);

    let mut timings = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        params.set(device, key, name, candidate);
        match measure(config, &mut workload) {
            Ok(measurement) => {
                tracing::debug!(param.key = key, param.name = name, candidate, min = ?measurement.min, "tuning candidate");
                timings.push((candidate, measurement.min));
            }
            Err(e) => {
                params.restore(device, key, name, previous);
                return Err(e);
            }
        }
    }

    let best = timings.iter().min_by_key(|(_, time)| *time).map_or(first, |(value, _)| *value);
    params.set(device, key, name, best);
    tracing::info!(device = %device.name, param.key = key, param.name = name, best, "parameter tuned");
    Ok(Some(TuneResult { best, timings }))
}
