//! Governor configuration: rate tables, credit parameters, pacing, alerts.
//!
//! All fields carry serde defaults so a host can deserialize a partial
//! config and get sensible behavior for everything it leaves out.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The concrete per-scope limits the window checks run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsTable {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
}

/// Calendar limits for one subscription tier.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TierLimits {
    #[serde(default = "default_free_day")]
    pub day: u32,
    #[serde(default = "default_free_month")]
    pub month: u32,
}

/// Day/month tables for the two tiers. The PRO table applies while the
/// primary credit balance is positive.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TierTables {
    #[serde(default = "default_free_tier")]
    pub free: TierLimits,
    #[serde(default = "default_pro_tier")]
    pub pro: TierLimits,
}

/// Global minute/hour ceilings, applied identically to every tier.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct GlobalCeilings {
    #[serde(default = "default_minute_limit")]
    pub minute: u32,
    #[serde(default = "default_hour_limit")]
    pub hour: u32,
}

/// Credit balance parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CreditParams {
    /// Balance the daily top-up refills the primary credits to.
    #[serde(default = "default_free_daily_allowance")]
    pub free_daily_allowance: u32,
    /// Ceiling a top-up may raise the balance to.
    #[serde(default = "default_max_daily_cap")]
    pub max_daily_cap: u32,
    /// At or below this primary balance the one-shot low-credit alert fires.
    #[serde(default = "default_low_credit_threshold")]
    pub low_credit_threshold: u32,
}

/// Pacing parameters for the serial request queue.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PacingConfig {
    /// Minimum gap between the starts of consecutive outbound calls.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Extra backoff applied after the upstream provider throttles a call.
    #[serde(default = "default_throttle_penalty_ms")]
    pub throttle_penalty_ms: u64,
    /// Bound on a single call so a hung request cannot jam the queue.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl PacingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn throttle_penalty(&self) -> Duration {
        Duration::from_millis(self.throttle_penalty_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Fractions of a limit at which the warning and limit alerts fire.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AlertFractions {
    #[serde(default = "default_warn_fraction")]
    pub warn: f64,
    #[serde(default = "default_limit_fraction")]
    pub limit: f64,
}

/// Full governor configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default)]
pub struct GovernorConfig {
    #[serde(default)]
    pub tiers: TierTables,
    #[serde(default)]
    pub global: GlobalCeilings,
    #[serde(default)]
    pub credits: CreditParams,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub alerts: AlertFractions,
}

impl GovernorConfig {
    /// Combines the global minute/hour ceilings with one tier's calendar
    /// limits into a concrete limits table.
    pub fn limits_for(&self, tier: TierLimits) -> LimitsTable {
        LimitsTable {
            minute: self.global.minute,
            hour: self.global.hour,
            day: tier.day,
            month: tier.month,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        default_free_tier()
    }
}

impl Default for TierTables {
    fn default() -> Self {
        Self {
            free: default_free_tier(),
            pro: default_pro_tier(),
        }
    }
}

impl Default for GlobalCeilings {
    fn default() -> Self {
        Self {
            minute: default_minute_limit(),
            hour: default_hour_limit(),
        }
    }
}

impl Default for CreditParams {
    fn default() -> Self {
        Self {
            free_daily_allowance: default_free_daily_allowance(),
            max_daily_cap: default_max_daily_cap(),
            low_credit_threshold: default_low_credit_threshold(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            throttle_penalty_ms: default_throttle_penalty_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for AlertFractions {
    fn default() -> Self {
        Self {
            warn: default_warn_fraction(),
            limit: default_limit_fraction(),
        }
    }
}

fn default_free_tier() -> TierLimits {
    TierLimits {
        day: default_free_day(),
        month: default_free_month(),
    }
}

fn default_pro_tier() -> TierLimits {
    TierLimits {
        day: 500,
        month: 5000,
    }
}

fn default_free_day() -> u32 {
    50
}

fn default_free_month() -> u32 {
    500
}

fn default_minute_limit() -> u32 {
    10
}

fn default_hour_limit() -> u32 {
    150
}

fn default_free_daily_allowance() -> u32 {
    5
}

fn default_max_daily_cap() -> u32 {
    50
}

fn default_low_credit_threshold() -> u32 {
    3
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_throttle_penalty_ms() -> u64 {
    5000
}

fn default_call_timeout_ms() -> u64 {
    15_000
}

fn default_warn_fraction() -> f64 {
    0.8
}

fn default_limit_fraction() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_gets_defaults() {
        let config: GovernorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pacing.min_interval_ms, 1000);
        assert_eq!(config.global.minute, 10);
        assert_eq!(config.credits.free_daily_allowance, 5);
        assert!((config.alerts.warn - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_config_overrides_only_named_fields() {
        let json = r#"{"pacing": {"min_interval_ms": 250}, "global": {"minute": 3}}"#;
        let config: GovernorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pacing.min_interval_ms, 250);
        // Sibling fields inside a partially-specified section keep defaults.
        assert_eq!(config.pacing.call_timeout_ms, 15_000);
        assert_eq!(config.global.minute, 3);
        assert_eq!(config.global.hour, 150);
    }

    #[test]
    fn test_limits_for_combines_global_and_tier() {
        let config = GovernorConfig::default();
        let limits = config.limits_for(config.tiers.pro);
        assert_eq!(limits.minute, config.global.minute);
        assert_eq!(limits.hour, config.global.hour);
        assert_eq!(limits.day, 500);
        assert_eq!(limits.month, 5000);
    }
}
