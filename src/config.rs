use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{HOUR_MS, Money, Ms};

/// Business rules the engine applies to every booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// How long a host has to answer a request.
    pub approval_window_ms: Ms,
    /// How long an instant-booking request may wait for payment confirmation.
    pub payment_timeout_ms: Ms,
    /// Service fee in basis points of the subtotal.
    pub service_fee_bps: u32,
    /// Daily price when neither settings nor the listing carry one.
    pub default_daily_price: Money,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            approval_window_ms: 24 * HOUR_MS,
            payment_timeout_ms: 30 * 60_000,
            service_fee_bps: 1_000,
            default_daily_price: 8_500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub policy: Policy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparseable values use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Policy::default();
        let policy = Policy {
            approval_window_ms: parsed::<i64>(&lookup, "DAYBOOK_APPROVAL_WINDOW_HOURS")
                .filter(|h| *h > 0)
                .map_or(defaults.approval_window_ms, |h| h * HOUR_MS),
            payment_timeout_ms: parsed::<i64>(&lookup, "DAYBOOK_PAYMENT_TIMEOUT_MINS")
                .filter(|m| *m > 0)
                .map_or(defaults.payment_timeout_ms, |m| m * 60_000),
            service_fee_bps: parsed(&lookup, "DAYBOOK_SERVICE_FEE_BPS")
                .filter(|bps| *bps <= 10_000)
                .unwrap_or(defaults.service_fee_bps),
            default_daily_price: parsed(&lookup, "DAYBOOK_DEFAULT_DAILY_PRICE")
                .filter(|p: &Money| *p > 0)
                .unwrap_or(defaults.default_daily_price),
        };

        Self {
            data_dir: lookup("DAYBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: parsed(&lookup, "DAYBOOK_METRICS_PORT"),
            sweep_interval: Duration::from_secs(
                parsed(&lookup, "DAYBOOK_SWEEP_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .unwrap_or(30),
            ),
            compact_threshold: parsed(&lookup, "DAYBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            policy,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("daybook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.policy, Policy::default());
        assert_eq!(config.policy.approval_window_ms, 86_400_000);
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DAYBOOK_DATA_DIR", "/var/lib/daybook"),
            ("DAYBOOK_METRICS_PORT", "9100"),
            ("DAYBOOK_APPROVAL_WINDOW_HOURS", "48"),
            ("DAYBOOK_SERVICE_FEE_BPS", "1250"),
            ("DAYBOOK_DEFAULT_DAILY_PRICE", "9900"),
        ]));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/daybook/daybook.wal"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.policy.approval_window_ms, 48 * HOUR_MS);
        assert_eq!(config.policy.service_fee_bps, 1250);
        assert_eq!(config.policy.default_daily_price, 9900);
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("DAYBOOK_SWEEP_INTERVAL_SECS", "soon"),
            ("DAYBOOK_APPROVAL_WINDOW_HOURS", "-3"),
            ("DAYBOOK_SERVICE_FEE_BPS", "20000"),
        ]));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.policy.approval_window_ms, 24 * HOUR_MS);
        assert_eq!(config.policy.service_fee_bps, 1_000);
    }
}
