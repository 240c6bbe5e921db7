/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated bot configuration
[POS]:    Configuration layer - run setup
[UPDATE]: When adding new configuration options
*/

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the maker-farming bot.
///
/// The configuration is an immutable snapshot for the run; live edits go
/// through a restart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    /// Account credentials
    pub credentials: CredentialsConfig,
    /// Venue endpoints
    #[serde(default)]
    pub venue: VenueConfig,
    /// Quoting parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Safety gate thresholds
    #[serde(default)]
    pub safety: SafetyConfig,
}

/// Account credentials configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// JWT token for authentication
    pub jwt_token: String,
    /// Ed25519 private key for body signing (base64 encoded)
    pub signing_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VenueConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,
    #[serde(default = "defaults::ws_url")]
    pub ws_url: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            ws_url: defaults::ws_url(),
        }
    }
}

/// Quoting parameters. Defaults reproduce the documented 2+2 ladder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    #[serde(default = "defaults::symbols")]
    pub symbols: Vec<String>,
    /// Notional per quote, in quote currency.
    #[serde(default = "defaults::order_size_usd")]
    pub order_size_usd: Decimal,
    /// Offsets of the ladder slots from the reference price.
    #[serde(default = "defaults::order_distances_bps")]
    pub order_distances_bps: Vec<Decimal>,
    /// Fallback single distance when `order_distances_bps` is empty.
    #[serde(default = "defaults::target_distance_bps")]
    pub target_distance_bps: Decimal,
    #[serde(default = "defaults::min_distance_bps")]
    pub min_distance_bps: Decimal,
    /// Band-exit threshold for resting quotes.
    #[serde(default = "defaults::max_distance_bps")]
    pub max_distance_bps: Decimal,
    /// Reference drift that forces a ladder replace.
    #[serde(default = "defaults::drift_threshold_bps")]
    pub drift_threshold_bps: Decimal,
    /// Dwell window during which a fresh order may not be cancelled.
    #[serde(default = "defaults::order_lock_seconds")]
    pub order_lock_seconds: f64,
    #[serde(default = "defaults::rebalance_cooldown_seconds")]
    pub rebalance_cooldown_seconds: f64,
    /// Tick period of the control loop.
    #[serde(default = "defaults::check_interval_seconds")]
    pub check_interval_seconds: f64,
    /// Reconcile cadence against the exchange.
    #[serde(default = "defaults::sync_interval_seconds")]
    pub sync_interval_seconds: f64,
    /// Age below which reconciliation will not judge a missing order.
    #[serde(default = "defaults::order_grace_period_seconds")]
    pub order_grace_period_seconds: f64,
    /// Age beyond which a persistent 404 means the order is gone.
    #[serde(default = "defaults::order_404_timeout_seconds")]
    pub order_404_timeout_seconds: f64,
    /// Push silence after which the reference is refreshed over REST.
    #[serde(default = "defaults::rest_fallback_interval_seconds")]
    pub rest_fallback_interval_seconds: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbols: defaults::symbols(),
            order_size_usd: defaults::order_size_usd(),
            order_distances_bps: defaults::order_distances_bps(),
            target_distance_bps: defaults::target_distance_bps(),
            min_distance_bps: defaults::min_distance_bps(),
            max_distance_bps: defaults::max_distance_bps(),
            drift_threshold_bps: defaults::drift_threshold_bps(),
            order_lock_seconds: defaults::order_lock_seconds(),
            rebalance_cooldown_seconds: defaults::rebalance_cooldown_seconds(),
            check_interval_seconds: defaults::check_interval_seconds(),
            sync_interval_seconds: defaults::sync_interval_seconds(),
            order_grace_period_seconds: defaults::order_grace_period_seconds(),
            order_404_timeout_seconds: defaults::order_404_timeout_seconds(),
            rest_fallback_interval_seconds: defaults::rest_fallback_interval_seconds(),
        }
    }
}

impl StrategyConfig {
    /// Effective ladder offsets: the explicit list when present, otherwise
    /// the single target distance.
    pub fn distances(&self) -> Vec<Decimal> {
        if self.order_distances_bps.is_empty() {
            vec![self.target_distance_bps]
        } else {
            self.order_distances_bps.clone()
        }
    }

    pub fn order_lock(&self) -> Duration {
        Duration::from_secs_f64(self.order_lock_seconds)
    }

    pub fn rebalance_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.rebalance_cooldown_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_seconds)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sync_interval_seconds)
    }

    pub fn order_grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.order_grace_period_seconds)
    }

    pub fn order_not_found_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.order_404_timeout_seconds)
    }

    pub fn rest_fallback_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rest_fallback_interval_seconds)
    }
}

/// Safety gate thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    /// Position notional at which the engine kills and latches.
    #[serde(default = "defaults::max_position_usd")]
    pub max_position_usd: Decimal,
    #[serde(default)]
    pub pre_kill: PreKillConfig,
    #[serde(default)]
    pub hard_kill: HardKillConfig,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_position_usd: defaults::max_position_usd(),
            pre_kill: PreKillConfig::default(),
            hard_kill: HardKillConfig::default(),
        }
    }
}

/// Pre-kill thresholds: suspend new placements, keep resting orders.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreKillConfig {
    #[serde(default = "defaults::pre_kill_volatility_threshold_bps")]
    pub volatility_threshold_bps: Decimal,
    #[serde(default = "defaults::pre_kill_mark_mid_divergence_bps")]
    pub mark_mid_divergence_bps: Decimal,
    #[serde(default = "defaults::pre_kill_pause_duration_seconds")]
    pub pause_duration_seconds: f64,
}

impl Default for PreKillConfig {
    fn default() -> Self {
        Self {
            volatility_threshold_bps: defaults::pre_kill_volatility_threshold_bps(),
            mark_mid_divergence_bps: defaults::pre_kill_mark_mid_divergence_bps(),
            pause_duration_seconds: defaults::pre_kill_pause_duration_seconds(),
        }
    }
}

impl PreKillConfig {
    pub fn pause_duration(&self) -> Duration {
        Duration::from_secs_f64(self.pause_duration_seconds)
    }
}

/// Hard-kill thresholds: cancel everything, locks ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardKillConfig {
    #[serde(default = "defaults::hard_kill_max_volatility_bps")]
    pub max_volatility_bps: Decimal,
    #[serde(default = "defaults::hard_kill_stale_threshold_seconds")]
    pub stale_threshold_seconds: f64,
}

impl Default for HardKillConfig {
    fn default() -> Self {
        Self {
            max_volatility_bps: defaults::hard_kill_max_volatility_bps(),
            stale_threshold_seconds: defaults::hard_kill_stale_threshold_seconds(),
        }
    }
}

impl HardKillConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.stale_threshold_seconds)
    }
}

impl BotConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content).context("parse config yaml")?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.jwt_token.trim().is_empty() {
            return Err(anyhow!("credentials.jwt_token cannot be empty"));
        }
        if self.credentials.signing_key.trim().is_empty() {
            return Err(anyhow!("credentials.signing_key cannot be empty"));
        }

        let strategy = &self.strategy;
        if strategy.symbols.is_empty() {
            return Err(anyhow!("strategy.symbols cannot be empty"));
        }
        for symbol in &strategy.symbols {
            if symbol.trim().is_empty() {
                return Err(anyhow!("strategy.symbols contains an empty symbol"));
            }
        }
        if strategy.order_size_usd <= Decimal::ZERO {
            return Err(anyhow!("strategy.order_size_usd must be positive"));
        }
        if strategy.min_distance_bps >= strategy.max_distance_bps {
            return Err(anyhow!(
                "strategy.min_distance_bps must be below max_distance_bps"
            ));
        }
        for distance in strategy.distances() {
            if distance < strategy.min_distance_bps || distance > strategy.max_distance_bps {
                return Err(anyhow!(
                    "quote distance {distance} bps outside [{}, {}]",
                    strategy.min_distance_bps,
                    strategy.max_distance_bps
                ));
            }
        }
        if strategy.order_lock_seconds <= 0.0 {
            return Err(anyhow!("strategy.order_lock_seconds must be positive"));
        }
        if strategy.check_interval_seconds <= 0.0 {
            return Err(anyhow!("strategy.check_interval_seconds must be positive"));
        }

        if self.safety.max_position_usd <= Decimal::ZERO {
            return Err(anyhow!("safety.max_position_usd must be positive"));
        }

        Ok(())
    }
}

mod defaults {
    use rust_decimal::Decimal;

    pub fn base_url() -> String {
        "https://api.perpx.exchange".to_string()
    }

    pub fn ws_url() -> String {
        "wss://stream.perpx.exchange/ws/v1".to_string()
    }

    pub fn symbols() -> Vec<String> {
        vec!["BTC-USD".to_string()]
    }

    pub fn order_size_usd() -> Decimal {
        Decimal::from(5)
    }

    pub fn order_distances_bps() -> Vec<Decimal> {
        vec![Decimal::from(6), Decimal::from(8)]
    }

    pub fn target_distance_bps() -> Decimal {
        Decimal::from(8)
    }

    pub fn min_distance_bps() -> Decimal {
        Decimal::from(5)
    }

    pub fn max_distance_bps() -> Decimal {
        Decimal::from(10)
    }

    pub fn drift_threshold_bps() -> Decimal {
        Decimal::from(15)
    }

    pub fn order_lock_seconds() -> f64 {
        0.7
    }

    pub fn rebalance_cooldown_seconds() -> f64 {
        3.0
    }

    pub fn check_interval_seconds() -> f64 {
        1.0
    }

    pub fn sync_interval_seconds() -> f64 {
        2.0
    }

    pub fn order_grace_period_seconds() -> f64 {
        3.0
    }

    pub fn order_404_timeout_seconds() -> f64 {
        10.0
    }

    pub fn rest_fallback_interval_seconds() -> f64 {
        5.0
    }

    pub fn max_position_usd() -> Decimal {
        Decimal::from(50)
    }

    pub fn pre_kill_volatility_threshold_bps() -> Decimal {
        Decimal::from(15)
    }

    pub fn pre_kill_mark_mid_divergence_bps() -> Decimal {
        Decimal::from(3)
    }

    pub fn pre_kill_pause_duration_seconds() -> f64 {
        5.0
    }

    pub fn hard_kill_max_volatility_bps() -> Decimal {
        Decimal::from(30)
    }

    pub fn hard_kill_stale_threshold_seconds() -> f64 {
        30.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn minimal_yaml() -> &'static str {
        r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
"#
    }

    #[test]
    fn minimal_config_gets_documented_defaults() {
        let config: BotConfig = serde_yaml::from_str(minimal_yaml()).unwrap();

        assert_eq!(config.strategy.symbols, vec!["BTC-USD".to_string()]);
        assert_eq!(config.strategy.order_size_usd, Decimal::from(5));
        assert_eq!(
            config.strategy.distances(),
            vec![Decimal::from(6), Decimal::from(8)]
        );
        assert_eq!(config.strategy.drift_threshold_bps, Decimal::from(15));
        assert_eq!(config.strategy.order_lock_seconds, 0.7);
        assert_eq!(config.strategy.sync_interval_seconds, 2.0);
        assert_eq!(config.strategy.order_grace_period_seconds, 3.0);
        assert_eq!(config.strategy.order_404_timeout_seconds, 10.0);
        assert_eq!(config.safety.max_position_usd, Decimal::from(50));
        assert_eq!(
            config.safety.pre_kill.volatility_threshold_bps,
            Decimal::from(15)
        );
        assert_eq!(
            config.safety.hard_kill.max_volatility_bps,
            Decimal::from(30)
        );
        assert_eq!(config.safety.hard_kill.stale_threshold_seconds, 30.0);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn empty_distance_list_falls_back_to_target_distance() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
strategy:
  order_distances_bps: []
  target_distance_bps: 8
"#;
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy.distances(), vec![Decimal::from(8)]);
    }

    #[test]
    fn validate_rejects_out_of_band_distances() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
strategy:
  order_distances_bps: [6, 12]
"#;
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_credentials() {
        let yaml = r#"
credentials:
  jwt_token: ""
  signing_key: "a2V5"
"#;
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
strategy:
  symbols: ["ETH-USD", "BTC-USD"]
  order_size_usd: "12.5"
  drift_threshold_bps: 20
safety:
  max_position_usd: 75
  hard_kill:
    stale_threshold_seconds: 10
"#;
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy.symbols.len(), 2);
        assert_eq!(
            config.strategy.order_size_usd,
            Decimal::from_str("12.5").unwrap()
        );
        assert_eq!(config.strategy.drift_threshold_bps, Decimal::from(20));
        assert_eq!(config.safety.max_position_usd, Decimal::from(75));
        assert_eq!(config.safety.hard_kill.stale_threshold_seconds, 10.0);
    }
}
