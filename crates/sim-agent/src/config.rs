use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use market_clock::ClockMode;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_SIM_START: &str = "2024-01-02T14:30:00Z";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Database
    pub database_url: String,

    // Clock
    pub clock_mode: ClockMode,
    pub clock_speed: f64,          // simulated seconds per wall second
    pub clock_tick_ms: u64,        // driver tick
    pub clock_persist_every: u32,  // ticks between clock saves
    pub clock_autostart: bool,     // only applies to a fresh clock
    pub sim_start: DateTime<Utc>,

    // Scenario
    pub scenario_preset: Option<String>,

    // Reporting
    pub watchlist: Vec<String>,
    pub report_timeframe_minutes: u32,
    pub report_interval_seconds: u64,
    pub report_bars: usize,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            database_url: get("DATABASE_URL", "sqlite:sim.db"),

            clock_mode: get("CLOCK_MODE", "simulated")
                .parse()
                .context("CLOCK_MODE must be 'real' or 'simulated'")?,
            clock_speed: get("CLOCK_SPEED", "1.0")
                .parse()
                .context("CLOCK_SPEED must be a number")?,
            clock_tick_ms: get("CLOCK_TICK_MS", "1000")
                .parse()
                .context("CLOCK_TICK_MS must be a whole number of milliseconds")?,
            clock_persist_every: get("CLOCK_PERSIST_EVERY", "5")
                .parse()
                .context("CLOCK_PERSIST_EVERY must be a whole number")?,
            clock_autostart: get("CLOCK_AUTOSTART", "true")
                .parse()
                .context("CLOCK_AUTOSTART must be true or false")?,
            sim_start: DateTime::parse_from_rfc3339(&get("SIM_START", DEFAULT_SIM_START))
                .context("SIM_START must be an RFC 3339 timestamp")?
                .with_timezone(&Utc),

            scenario_preset: var("SCENARIO_PRESET")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),

            watchlist: get("WATCHLIST", "SPY,AAPL,MSFT,NVDA,TSLA")
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            report_timeframe_minutes: get("REPORT_TIMEFRAME_MINUTES", "5")
                .parse()
                .context("REPORT_TIMEFRAME_MINUTES must be a whole number")?,
            report_interval_seconds: get("REPORT_INTERVAL_SECONDS", "30")
                .parse()
                .context("REPORT_INTERVAL_SECONDS must be a whole number")?,
            report_bars: get("REPORT_BARS", "20")
                .parse()
                .context("REPORT_BARS must be a whole number")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.clock_speed.is_finite() || self.clock_speed <= 0.0 {
            bail!("CLOCK_SPEED must be > 0, got {}", self.clock_speed);
        }
        if self.clock_tick_ms == 0 {
            bail!("CLOCK_TICK_MS must be > 0");
        }
        if self.sim_start.timestamp() < 0 {
            bail!("SIM_START must not be before 1970-01-01");
        }
        if self.watchlist.is_empty() {
            bail!("WATCHLIST must name at least one symbol");
        }
        if self.report_timeframe_minutes == 0 {
            bail!("REPORT_TIMEFRAME_MINUTES must be > 0");
        }
        if self.report_interval_seconds == 0 {
            bail!("REPORT_INTERVAL_SECONDS must be > 0");
        }
        if self.report_bars == 0 {
            bail!("REPORT_BARS must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite:sim.db");
        assert_eq!(config.clock_mode, ClockMode::Simulated);
        assert_eq!(config.clock_speed, 1.0);
        assert_eq!(config.clock_tick_ms, 1000);
        assert!(config.clock_autostart);
        assert_eq!(config.sim_start.to_rfc3339(), "2024-01-02T14:30:00+00:00");
        assert!(config.scenario_preset.is_none());
        assert_eq!(config.watchlist.len(), 5);
        assert_eq!(config.report_timeframe_minutes, 5);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CLOCK_MODE", "real"),
            ("CLOCK_SPEED", "60"),
            ("SIM_START", "2023-06-01T13:30:00Z"),
            ("SCENARIO_PRESET", " flash-crash "),
            ("WATCHLIST", "aapl, msft,,"),
            ("REPORT_BARS", "3"),
        ])
        .unwrap();
        assert_eq!(config.clock_mode, ClockMode::Real);
        assert_eq!(config.clock_speed, 60.0);
        assert_eq!(config.scenario_preset.as_deref(), Some("flash-crash"));
        assert_eq!(config.watchlist, vec!["AAPL", "MSFT"]);
        assert_eq!(config.report_bars, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("CLOCK_MODE", "warp")]).is_err());
        assert!(load(&[("CLOCK_SPEED", "0")]).is_err());
        assert!(load(&[("CLOCK_SPEED", "fast")]).is_err());
        assert!(load(&[("CLOCK_TICK_MS", "0")]).is_err());
        assert!(load(&[("SIM_START", "yesterday")]).is_err());
        assert!(load(&[("WATCHLIST", " , ")]).is_err());
        assert!(load(&[("REPORT_INTERVAL_SECONDS", "0")]).is_err());
    }
}
