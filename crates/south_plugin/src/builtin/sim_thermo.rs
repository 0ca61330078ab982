//! Simulated thermometer (poll plugin)

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::{
    ConfigCategory, IngestMode, PluginError, PluginInfo, PluginResult, Reading, ReconfigureMode,
    SouthPlugin,
};

pub(super) const NAME: &str = "sim-thermo";

#[derive(Debug, Clone, PartialEq)]
struct ThermoSettings {
    interval: Duration,
    asset: String,
    base: f64,
    jitter: f64,
}

impl ThermoSettings {
    fn from_category(config: &ConfigCategory) -> PluginResult<Self> {
        let interval = config
            .get_duration_ms("interval")
            .ok_or_else(|| PluginError::InvalidConfig("'interval' must be milliseconds".into()))?;
        if interval.is_zero() {
            return Err(PluginError::InvalidConfig("'interval' must be greater than zero".into()));
        }

        let asset = config.get("asset").unwrap_or("temperature").to_string();
        if asset.is_empty() {
            return Err(PluginError::InvalidConfig("'asset' must not be empty".into()));
        }

        let base = config.get_f64("base").unwrap_or(20.0);
        if !base.is_finite() {
            return Err(PluginError::InvalidConfig("'base' must be a finite number".into()));
        }

        let jitter = config.get_f64("jitter").unwrap_or(0.0);
        if !jitter.is_finite() || jitter < 0.0 {
            return Err(PluginError::InvalidConfig("'jitter' must be a finite, non-negative number".into()));
        }
        // The sampled range and every reading built from it must stay finite
        if !(2.0 * jitter).is_finite() || !(base + jitter).is_finite() || !(base - jitter).is_finite() {
            return Err(PluginError::InvalidConfig("'jitter' is too large for the configured 'base'".into()));
        }

        Ok(Self {
            interval,
            asset,
            base,
            jitter,
        })
    }
}

/// Poll plugin producing a temperature around a configurable base value
#[derive(Debug, Default)]
pub struct SimThermo {
    settings: Option<ThermoSettings>,
    polls: u64,
}

impl SimThermo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SouthPlugin for SimThermo {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(NAME, env!("CARGO_PKG_VERSION"), IngestMode::Poll)
            .with_reconfigure(ReconfigureMode::Live)
            .with_default_config(serde_json::json!({
                "interval": {
                    "description": "Milliseconds between readings",
                    "type": "integer",
                    "default": "1000"
                },
                "asset": {
                    "description": "Asset name for produced readings",
                    "type": "string",
                    "default": "temperature"
                },
                "base": {
                    "description": "Mean temperature in degrees Celsius",
                    "type": "float",
                    "default": "20.0"
                },
                "jitter": {
                    "description": "Maximum random deviation from the base value",
                    "type": "float",
                    "default": "0.5"
                }
            }))
    }

    async fn init(&mut self, config: &ConfigCategory) -> PluginResult<()> {
        let settings = ThermoSettings::from_category(config)?;
        tracing::debug!(plugin = NAME, interval_ms = settings.interval.as_millis() as u64, "Initialized");
        self.settings = Some(settings);
        Ok(())
    }

    async fn poll(&mut self) -> PluginResult<Option<Reading>> {
        let settings = self.settings.as_ref().ok_or(PluginError::NotInitialized)?;
        self.polls += 1;

        let offset = if settings.jitter > 0.0 {
            rand::thread_rng().gen_range(-settings.jitter..=settings.jitter)
        } else {
            0.0
        };

        Ok(Some(
            Reading::new(settings.asset.clone())
                .with_datapoint("celsius", settings.base + offset)
                .with_datapoint("sequence", self.polls as i64),
        ))
    }

    fn poll_interval(&self) -> Duration {
        self.settings
            .as_ref()
            .map(|s| s.interval)
            .unwrap_or(crate::DEFAULT_POLL_INTERVAL)
    }

    async fn reconfigure(&mut self, config: &ConfigCategory) -> PluginResult<()> {
        // Validate fully before replacing anything
        let settings = ThermoSettings::from_category(config)?;
        self.settings = Some(settings);
        Ok(())
    }

    async fn shutdown(&mut self) -> PluginResult<()> {
        self.settings = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interval: &str) -> ConfigCategory {
        SimThermo::new()
            .info()
            .default_category(NAME)
            .unwrap()
            .apply(&ConfigCategory::new(NAME).with_item("interval", interval).with_item("jitter", "0"))
    }

    #[tokio::test]
    async fn test_poll_produces_readings() {
        let mut plugin = SimThermo::new();
        assert!(matches!(plugin.poll().await, Err(PluginError::NotInitialized)));

        plugin.init(&config("1000")).await.unwrap();
        assert_eq!(plugin.poll_interval(), Duration::from_millis(1000));

        let reading = plugin.poll().await.unwrap().unwrap();
        assert_eq!(reading.asset, "temperature");
        assert_eq!(reading.get("celsius").and_then(|v| v.as_f64()), Some(20.0));
        assert_eq!(reading.get("sequence").and_then(|v| v.as_f64()), Some(1.0));
    }

    #[tokio::test]
    async fn test_reconfigure_changes_interval() {
        let mut plugin = SimThermo::new();
        plugin.init(&config("1000")).await.unwrap();

        plugin.reconfigure(&config("500")).await.unwrap();
        assert_eq!(plugin.poll_interval(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_rejected_reconfigure_keeps_settings() {
        let mut plugin = SimThermo::new();
        plugin.init(&config("1000")).await.unwrap();

        assert!(plugin.reconfigure(&config("0")).await.is_err());
        assert!(plugin.reconfigure(&config("fast")).await.is_err());
        assert_eq!(plugin.poll_interval(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_unbounded_jitter_is_rejected() {
        let mut plugin = SimThermo::new();
        plugin.init(&config("1000")).await.unwrap();

        for jitter in ["inf", "NaN", "1e308", "-1"] {
            let update = config("500").apply(&ConfigCategory::new(NAME).with_item("jitter", jitter));
            assert!(
                matches!(plugin.reconfigure(&update).await, Err(PluginError::InvalidConfig(_))),
                "jitter {jitter} accepted"
            );
        }
        assert_eq!(plugin.poll_interval(), Duration::from_millis(1000));

        // Wide but finite still samples cleanly
        let wide = config("1000").apply(&ConfigCategory::new(NAME).with_item("jitter", "1e300"));
        plugin.reconfigure(&wide).await.unwrap();
        let celsius = plugin.poll().await.unwrap().unwrap().get("celsius").and_then(|v| v.as_f64());
        assert!(celsius.is_some_and(f64::is_finite));
    }
}
