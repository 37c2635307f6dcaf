//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::{from_f64, MoneyAction, TallyError, TallyResult};
use tally_state::{check_unique_names, LedgerConfig};

use crate::{Applicator, EffectSource};

/// One configured currency
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub name: String,
    pub default_value: f64,
    pub persistence: bool,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        CurrencyConfig {
            name: "points".into(),
            default_value: 0.0,
            persistence: true,
        }
    }
}

impl CurrencyConfig {
    pub fn new(name: impl Into<String>, default_value: f64) -> Self {
        CurrencyConfig {
            name: name.into(),
            default_value,
            persistence: true,
        }
    }

    pub fn without_persistence(mut self) -> Self {
        self.persistence = false;
        self
    }

    pub fn to_ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            name: self.name.clone(),
            default_value: from_f64(self.default_value),
            persistence: self.persistence,
        }
    }
}

/// When a configured applicator fires
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Negative cooldowns fall back to the default
    Trigger {
        #[serde(default)]
        cooldown_secs: f64,
    },
    Timer { period_secs: f64 },
    Scripted,
    Direct,
}

/// One applicator loaded with the session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicatorConfig {
    pub source: SourceConfig,
    pub action: MoneyAction,
    pub amount: f64,
    pub targets: Vec<String>,
    #[serde(default)]
    pub deny_if_not_enough: bool,
}

impl ApplicatorConfig {
    pub fn to_applicator(&self) -> TallyResult<Applicator> {
        let source = match self.source {
            SourceConfig::Trigger { cooldown_secs } => EffectSource::trigger(cooldown_secs),
            SourceConfig::Timer { period_secs } => {
                if !period_secs.is_finite() || period_secs <= 0.0 {
                    return Err(TallyError::Configuration(format!(
                        "timer period must be a finite value > 0, got {}",
                        period_secs
                    )));
                }
                EffectSource::timer(Duration::from_secs_f64(period_secs))
            }
            SourceConfig::Scripted => EffectSource::Scripted,
            SourceConfig::Direct => EffectSource::Direct,
        };
        let applicator = Applicator::new(
            source,
            self.action,
            from_f64(self.amount),
            self.targets.iter().cloned(),
        );
        Ok(if self.deny_if_not_enough {
            applicator.deny_if_not_enough()
        } else {
            applicator
        })
    }
}

/// Logging bootstrap settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            json: false,
        }
    }
}

/// Session configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub currencies: Vec<CurrencyConfig>,
    /// Number of replication slots; must cover the session's peer count
    pub pool_size: usize,
    /// Minimum change of a transport value that triggers a rebroadcast
    pub sync_tolerance: f64,
    pub tick_interval_ms: u64,
    /// Bound on queued outbound requests
    pub max_outbound: usize,
    /// Registered in order, so the n-th entry gets `ApplicatorId(n)`
    pub applicators: Vec<ApplicatorConfig>,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            currencies: vec![CurrencyConfig::default()],
            pool_size: 16,
            sync_tolerance: 0.001,
            tick_interval_ms: 16,
            max_outbound: 1024,
            applicators: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> TallyResult<Self> {
        let config: SessionConfig =
            serde_json::from_str(json).map_err(|e| TallyError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TallyResult<()> {
        if self.pool_size == 0 {
            return Err(TallyError::Configuration("pool_size must be at least 1".into()));
        }
        if self.pool_size > u16::MAX as usize + 1 {
            return Err(TallyError::Configuration(format!(
                "pool_size {} exceeds the slot index range",
                self.pool_size
            )));
        }
        if !self.sync_tolerance.is_finite() || self.sync_tolerance < 0.0 {
            return Err(TallyError::Configuration(format!(
                "sync_tolerance must be a finite value >= 0, got {}",
                self.sync_tolerance
            )));
        }
        if self.max_outbound == 0 {
            return Err(TallyError::Configuration("max_outbound must be at least 1".into()));
        }
        check_unique_names(self.currencies.iter().map(|c| c.name.as_str()))?;
        for applicator in &self.applicators {
            if let Some(target) = applicator
                .targets
                .iter()
                .find(|t| !self.currencies.iter().any(|c| &c.name == *t))
            {
                return Err(TallyError::UnknownCurrency(target.clone()));
            }
            applicator.to_applicator()?;
        }
        Ok(())
    }

    pub fn build_applicators(&self) -> TallyResult<Vec<Applicator>> {
        self.applicators.iter().map(|a| a.to_applicator()).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn ledger_configs(&self) -> Vec<LedgerConfig> {
        self.currencies.iter().map(|c| c.to_ledger_config()).collect()
    }
}
