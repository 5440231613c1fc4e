use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Timing and retry budgets for all hardware exchanges.
///
/// Defaults match the firmware handshake latencies observed on Zen parts. Every
/// field can be overridden through a `ZEN_SMU_*` environment variable, see
/// [`SmuConfig::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmuConfig {
    /// Maximum wait for the hardware bus mutex before an exchange reports `Busy`.
    pub bus_lock_timeout: Duration,
    /// Number of status register reads before an exchange reports `Timeout`.
    pub poll_budget: u32,
    /// Attempts of the table transfer command while the firmware reports busy.
    pub transfer_attempts: u32,
    pub transfer_retry_delay: Duration,
    /// Attempts of a single PSM margin read during core layout probing.
    pub psm_probe_attempts: u32,
    pub psm_probe_delay: Duration,
    /// Upper bound on layout probes across the whole core layout correction pass.
    pub layout_probe_limit: u32,
}

impl Default for SmuConfig {
    fn default() -> Self {
        Self {
            bus_lock_timeout: Duration::from_millis(10),
            poll_budget: 8192,
            transfer_attempts: 10,
            transfer_retry_delay: Duration::from_millis(10),
            psm_probe_attempts: 10,
            psm_probe_delay: Duration::from_millis(10),
            layout_probe_limit: 64,
        }
    }
}

pub const ENV_BUS_TIMEOUT_MS: &str = "ZEN_SMU_BUS_TIMEOUT_MS";
pub const ENV_POLL_BUDGET: &str = "ZEN_SMU_POLL_BUDGET";
pub const ENV_TRANSFER_ATTEMPTS: &str = "ZEN_SMU_TRANSFER_ATTEMPTS";
pub const ENV_TRANSFER_DELAY_MS: &str = "ZEN_SMU_TRANSFER_DELAY_MS";
pub const ENV_PSM_PROBE_ATTEMPTS: &str = "ZEN_SMU_PSM_PROBE_ATTEMPTS";
pub const ENV_PSM_PROBE_DELAY_MS: &str = "ZEN_SMU_PSM_PROBE_DELAY_MS";
pub const ENV_PROBE_LIMIT: &str = "ZEN_SMU_PROBE_LIMIT";

impl SmuConfig {
    /// Builds a configuration from the defaults plus any `ZEN_SMU_*` overrides in the
    /// process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SmuConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_override::<u64, _>(&lookup, ENV_BUS_TIMEOUT_MS) {
            config.bus_lock_timeout = Duration::from_millis(ms);
        }
        if let Some(budget) = parse_override(&lookup, ENV_POLL_BUDGET) {
            config.poll_budget = budget;
        }
        if let Some(attempts) = parse_override(&lookup, ENV_TRANSFER_ATTEMPTS) {
            config.transfer_attempts = attempts;
        }
        if let Some(ms) = parse_override::<u64, _>(&lookup, ENV_TRANSFER_DELAY_MS) {
            config.transfer_retry_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_override(&lookup, ENV_PSM_PROBE_ATTEMPTS) {
            config.psm_probe_attempts = attempts;
        }
        if let Some(ms) = parse_override::<u64, _>(&lookup, ENV_PSM_PROBE_DELAY_MS) {
            config.psm_probe_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_override(&lookup, ENV_PROBE_LIMIT) {
            config.layout_probe_limit = limit;
        }

        config
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {key}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_are_applied() {
        let vars: HashMap<&str, &str> = [
            (ENV_BUS_TIMEOUT_MS, "25"),
            (ENV_POLL_BUDGET, " 100 "),
            (ENV_PROBE_LIMIT, "8"),
        ]
        .into_iter()
        .collect();

        let config = SmuConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.bus_lock_timeout, Duration::from_millis(25));
        assert_eq!(config.poll_budget, 100);
        assert_eq!(config.layout_probe_limit, 8);
        assert_eq!(config.transfer_attempts, 10);
    }

    #[test]
    fn psm_probe_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_PSM_PROBE_ATTEMPTS, "3"),
            (ENV_PSM_PROBE_DELAY_MS, "0"),
        ]
        .into_iter()
        .collect();

        let config = SmuConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.psm_probe_attempts, 3);
        assert_eq!(config.psm_probe_delay, Duration::ZERO);
        assert_eq!(config.layout_probe_limit, 64);
    }

    #[test]
    fn malformed_override_keeps_default() {
        let config = SmuConfig::from_lookup(|k| {
            (k == ENV_TRANSFER_ATTEMPTS).then(|| "ten".to_string())
        });
        assert_eq!(config, SmuConfig::default());
    }
}
