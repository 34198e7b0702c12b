//! Heal config merging.
//!
//! Applies benchmark-wide overrides to the base heal configuration.

use anyhow::Result;
use healer::io::config::HealConfig;

use crate::benchmark::BenchmarkConfig;

/// Apply benchmark overrides to `base`.
///
/// Benchmarks inspect test output unless `[config] inspect_test_output = false`.
pub fn apply_benchmark_config(
    mut base: HealConfig,
    overrides: &BenchmarkConfig,
) -> Result<HealConfig> {
    if let Some(max_attempts) = overrides.max_attempts {
        base.max_attempts = max_attempts;
    }
    base.inspect_test_output = overrides.inspect_test_output.unwrap_or(true);
    base.validate()?;
    Ok(base)
}
