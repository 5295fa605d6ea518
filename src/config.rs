//! Environment-driven configuration for the server binary
//!
//! Variables (all optional):
//! - BUDGETWATCH_HOST / BUDGETWATCH_PORT: bind address (default 0.0.0.0:8080)
//! - BUDGETWATCH_LOW_TRAFFIC: collect every 5 minutes instead of every minute
//! - BUDGETWATCH_COLLECT_INTERVAL_SECS: explicit collection interval
//! - BUDGETWATCH_EVALUATE_INTERVAL_SECS: alert evaluation interval (default 60)
//! - BUDGETWATCH_PROBE_TIMEOUT_SECS: per-probe timeout (default 10)
//! - BUDGETWATCH_ALERT_RECIPIENTS: comma-separated email addresses
//! - BUDGETWATCH_EMAIL_API_URL / _EMAIL_API_KEY / _EMAIL_FROM: email API;
//!   without all three, notifications are only logged
//! - BUDGETWATCH_INTEGRATIONS: `name=url,name=url`; an empty url marks the
//!   integration as not configured
//! - BUDGETWATCH_DATA_DIR / BUDGETWATCH_STORAGE_QUOTA_MB: directory whose
//!   size is reported by the storage probe (quota default 10240)
//! - BUDGETWATCH_SNAPSHOT_RETENTION_HOURS: snapshot retention (default 24)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::EvaluatorConfig;
use crate::clock::HOUR_MS;
use crate::collector::CollectorConfig;
use crate::store::RetentionConfig;

const PREFIX: &str = "BUDGETWATCH_";

/// Credentials for the HTTP email API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

/// An integration to health-check; `url` is `None` when not configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationConfig {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub collector: CollectorConfig,
    pub evaluator: EvaluatorConfig,
    pub retention: RetentionConfig,
    pub email: Option<EmailConfig>,
    pub integrations: Vec<IntegrationConfig>,
    pub data_dir: Option<PathBuf>,
    pub storage_quota_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            collector: CollectorConfig::default(),
            evaluator: EvaluatorConfig::default(),
            retention: RetentionConfig::default(),
            email: None,
            integrations: Vec::new(),
            data_dir: None,
            storage_quota_bytes: 10_240 * 1024 * 1024,
        }
    }
}

impl MonitorConfig {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; keys are full variable names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(&format!("{}{}", PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse = |name: &str| -> Result<Option<u64>, ConfigError> { parse_var(name, var(name)) };

        let mut config = MonitorConfig::default();

        if let Some(host) = var("HOST") {
            config.host = host;
        }
        if let Some(port) = var("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                name: format!("{}PORT", PREFIX),
                value: port,
            })?;
        }

        if let Some(low) = var("LOW_TRAFFIC") {
            if parse_bool(&format!("{}LOW_TRAFFIC", PREFIX), &low)? {
                config.collector = CollectorConfig::low_traffic();
            }
        }
        if let Some(secs) = parse("COLLECT_INTERVAL_SECS")? {
            config.collector.interval = positive_secs("COLLECT_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = parse("EVALUATE_INTERVAL_SECS")? {
            config.evaluator.interval = positive_secs("EVALUATE_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = parse("PROBE_TIMEOUT_SECS")? {
            config.collector.probe_timeout = positive_secs("PROBE_TIMEOUT_SECS", secs)?;
        }

        config.evaluator.recipients = var("ALERT_RECIPIENTS")
            .map(|list| split_list(&list).map(String::from).collect())
            .unwrap_or_default();

        config.email = match (var("EMAIL_API_URL"), var("EMAIL_API_KEY"), var("EMAIL_FROM")) {
            (Some(api_url), Some(api_key), Some(from)) => Some(EmailConfig {
                api_url,
                api_key,
                from,
            }),
            _ => None,
        };

        if let Some(list) = var("INTEGRATIONS") {
            config.integrations = parse_integrations(&list)?;
        }

        config.data_dir = var("DATA_DIR").map(PathBuf::from);
        if let Some(mb) = parse("STORAGE_QUOTA_MB")? {
            config.storage_quota_bytes = mb
                .checked_mul(1024 * 1024)
                .ok_or_else(|| invalid("STORAGE_QUOTA_MB", mb))?;
        }
        if let Some(hours) = parse("SNAPSHOT_RETENTION_HOURS")? {
            config.retention.snapshot_retention_ms = i64::try_from(hours)
                .ok()
                .filter(|&h| h > 0)
                .and_then(|h| h.checked_mul(HOUR_MS))
                .ok_or_else(|| invalid("SNAPSHOT_RETENTION_HOURS", hours))?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.parse().map_err(|_| ConfigError::Invalid {
                name: format!("{}{}", PREFIX, name),
                value: v,
            })
        })
        .transpose()
}

fn invalid(name: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name: format!("{}{}", PREFIX, name),
        value: value.to_string(),
    }
}

fn positive_secs(name: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(name, secs));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// `name=url,name=url`; `name=` or a bare `name` is not configured
fn parse_integrations(list: &str) -> Result<Vec<IntegrationConfig>, ConfigError> {
    split_list(list)
        .map(|entry| {
            let (name, url) = entry.split_once('=').unwrap_or((entry, ""));
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid {
                    name: format!("{}INTEGRATIONS", PREFIX),
                    value: entry.to_string(),
                });
            }
            let url = url.trim();
            Ok(IntegrationConfig {
                name: name.to_string(),
                url: (!url.is_empty()).then(|| url.to_string()),
            })
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<MonitorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}{}", PREFIX, k), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.collector.interval, Duration::from_secs(60));
        assert_eq!(config.evaluator.interval, Duration::from_secs(60));
        assert_eq!(config.collector.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.retention.snapshot_retention_ms, 24 * HOUR_MS);
        assert_eq!(config.storage_quota_bytes, 10_240 * 1024 * 1024);
        assert!(config.email.is_none());
        assert!(config.evaluator.recipients.is_empty());
    }

    #[test]
    fn test_low_traffic_and_override() {
        let config = config_from(&[("LOW_TRAFFIC", "true")]).unwrap();
        assert_eq!(config.collector.interval, Duration::from_secs(300));

        let config = config_from(&[("LOW_TRAFFIC", "true"), ("COLLECT_INTERVAL_SECS", "30")]).unwrap();
        assert_eq!(config.collector.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_email_needs_all_fields() {
        let partial = config_from(&[("EMAIL_API_URL", "https://mail.example.com/emails")]).unwrap();
        assert!(partial.email.is_none());

        let full = config_from(&[
            ("EMAIL_API_URL", "https://mail.example.com/emails"),
            ("EMAIL_API_KEY", "key"),
            ("EMAIL_FROM", "alerts@example.com"),
            ("ALERT_RECIPIENTS", "a@example.com, b@example.com,"),
        ])
        .unwrap();
        assert_eq!(full.email.unwrap().from, "alerts@example.com");
        assert_eq!(full.evaluator.recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_integrations() {
        let config = config_from(&[("INTEGRATIONS", "payments=https://pay.example.com/health, crm=,sms")]).unwrap();
        assert_eq!(
            config.integrations,
            vec![
                IntegrationConfig {
                    name: "payments".to_string(),
                    url: Some("https://pay.example.com/health".to_string()),
                },
                IntegrationConfig {
                    name: "crm".to_string(),
                    url: None,
                },
                IntegrationConfig {
                    name: "sms".to_string(),
                    url: None,
                },
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(config_from(&[("EVALUATE_INTERVAL_SECS", "0")]).is_err());
        assert!(config_from(&[("LOW_TRAFFIC", "maybe")]).is_err());
        assert!(config_from(&[("INTEGRATIONS", "=https://x")]).is_err());

        assert!(config_from(&[("SNAPSHOT_RETENTION_HOURS", "0")]).is_err());

        let err = config_from(&[("STORAGE_QUOTA_MB", "-5")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for BUDGETWATCH_STORAGE_QUOTA_MB: '-5'"
        );
    }

    #[test]
    fn test_oversized_values_rejected() {
        let err = config_from(&[("STORAGE_QUOTA_MB", "18446744073709551615")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for BUDGETWATCH_STORAGE_QUOTA_MB: '18446744073709551615'"
        );
        assert!(config_from(&[("SNAPSHOT_RETENTION_HOURS", "18446744073709551615")]).is_err());
        assert!(config_from(&[("SNAPSHOT_RETENTION_HOURS", "9223372036854775807")]).is_err());

        let config = config_from(&[("SNAPSHOT_RETENTION_HOURS", "48")]).unwrap();
        assert_eq!(config.retention.snapshot_retention_ms, 48 * HOUR_MS);
    }
}
