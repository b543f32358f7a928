//! Runtime configuration, read from the environment once at startup.
//!
//! A `ConfigError` is the only error that stops the process.

pub mod keywords;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cycle::RunMode;
use crate::feed::types::SourceRef;
use crate::notify::Endpoint;

pub const ENV_WEBHOOK_URLS: &str = "WEBHOOK_URLS";
pub const ENV_FEED_SOURCES: &str = "FEED_SOURCES";
pub const ENV_POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
pub const ENV_CACHE_PATH: &str = "CACHE_PATH";
pub const ENV_RUN_MODE: &str = "RUN_MODE";
pub const ENV_KEYWORDS: &str = "KEYWORDS";
pub const ENV_KEYWORDS_PATH: &str = "KEYWORDS_PATH";
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "SHUTDOWN_GRACE_SECS";
pub const ENV_METRICS_ADDR: &str = "METRICS_ADDR";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("loading keywords: {0:#}")]
    Keywords(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub endpoints: Vec<Endpoint>,
    pub sources: Vec<SourceRef>,
    pub poll_interval: Duration,
    pub cache_path: Option<PathBuf>,
    pub run_mode: RunMode,
    pub keywords: Vec<String>,
    pub shutdown_grace: Duration,
    pub metrics_addr: Option<SocketAddr>,
    pub log_format: LogFormat,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` is the production caller.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoints = parse_endpoints(
            &get(ENV_WEBHOOK_URLS).ok_or(ConfigError::Missing(ENV_WEBHOOK_URLS))?,
        )?;
        let sources =
            parse_sources(&get(ENV_FEED_SOURCES).ok_or(ConfigError::Missing(ENV_FEED_SOURCES))?)?;

        let poll_secs = parse_secs(get(ENV_POLL_INTERVAL_SECS), ENV_POLL_INTERVAL_SECS)?
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_POLL_INTERVAL_SECS,
                reason: "must be greater than zero".into(),
            });
        }
        let grace_secs = parse_secs(get(ENV_SHUTDOWN_GRACE_SECS), ENV_SHUTDOWN_GRACE_SECS)?
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);

        let run_mode = match get(ENV_RUN_MODE) {
            None => RunMode::default(),
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_RUN_MODE,
                reason,
            })?,
        };

        let keywords = match (get(ENV_KEYWORDS_PATH), get(ENV_KEYWORDS)) {
            (Some(path), _) => keywords::load_keywords_from(&PathBuf::from(path))
                .map_err(ConfigError::Keywords)?,
            (None, Some(list)) => keywords::parse_keyword_list(&list),
            (None, None) => Vec::new(),
        };

        let metrics_addr = match get(ENV_METRICS_ADDR) {
            None => None,
            Some(v) => Some(v.parse().map_err(|e| ConfigError::Invalid {
                key: ENV_METRICS_ADDR,
                reason: format!("{e}"),
            })?),
        };

        let log_format = match get(ENV_LOG_FORMAT).as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Compact,
            Some(v) if v == "compact" => LogFormat::Compact,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: ENV_LOG_FORMAT,
                    reason: format!("expected `compact` or `json`, got `{other}`"),
                })
            }
        };

        Ok(Self {
            endpoints,
            sources,
            poll_interval: Duration::from_secs(poll_secs),
            cache_path: get(ENV_CACHE_PATH).map(PathBuf::from),
            run_mode,
            keywords,
            shutdown_grace: Duration::from_secs(grace_secs),
            metrics_addr,
            log_format,
        })
    }
}

fn parse_secs(v: Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    v.map(|s| {
        s.parse::<u64>().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{e}"),
        })
    })
    .transpose()
}

fn parse_endpoints(s: &str) -> Result<Vec<Endpoint>, ConfigError> {
    let mut out = Vec::new();
    for raw in s.split(',').map(str::trim).filter(|u| !u.is_empty()) {
        let url = reqwest::Url::parse(raw).map_err(|e| ConfigError::Invalid {
            key: ENV_WEBHOOK_URLS,
            reason: format!("{e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: ENV_WEBHOOK_URLS,
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        out.push(Endpoint::new(raw));
    }
    if out.is_empty() {
        return Err(ConfigError::Missing(ENV_WEBHOOK_URLS));
    }
    Ok(out)
}

fn parse_sources(s: &str) -> Result<Vec<SourceRef>, ConfigError> {
    let mut out: Vec<SourceRef> = Vec::new();
    for raw in s.split(',').map(str::trim).filter(|x| !x.is_empty()) {
        let src: SourceRef = raw.parse().map_err(|reason| ConfigError::Invalid {
            key: ENV_FEED_SOURCES,
            reason,
        })?;
        if !out.contains(&src) {
            out.push(src);
        }
    }
    if out.is_empty() {
        return Err(ConfigError::Missing(ENV_FEED_SOURCES));
    }
    Ok(out)
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = RelayConfig::from_lookup(lookup(&[
            (ENV_WEBHOOK_URLS, "https://discord.com/api/webhooks/1/abc"),
            (ENV_FEED_SOURCES, "UC1, playlist:PL2, UC1"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoints.len(), 1);
        assert_eq!(
            cfg.sources,
            vec![SourceRef::channel("UC1"), SourceRef::playlist("PL2")]
        );
        assert_eq!(cfg.poll_interval, Duration::from_secs(300));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
        assert_eq!(cfg.run_mode, RunMode::Production);
        assert!(cfg.cache_path.is_none());
        assert!(cfg.keywords.is_empty());
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn missing_webhooks_is_fatal() {
        let err = RelayConfig::from_lookup(lookup(&[(ENV_FEED_SOURCES, "UC1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_WEBHOOK_URLS)));
    }

    #[test]
    fn invalid_values_are_reported_by_key() {
        let base = [
            (ENV_WEBHOOK_URLS, "https://example.com/hook"),
            (ENV_FEED_SOURCES, "UC1"),
        ];
        let cases = [
            (ENV_POLL_INTERVAL_SECS, "0"),
            (ENV_POLL_INTERVAL_SECS, "soon"),
            (ENV_RUN_MODE, "turbo"),
            (ENV_METRICS_ADDR, "not-an-addr"),
            (ENV_LOG_FORMAT, "xml"),
        ];
        for (key, val) in cases {
            let mut pairs = base.to_vec();
            pairs.push((key, val));
            match RelayConfig::from_lookup(lookup(&pairs)) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{key}={val}: expected Invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_http_webhook_rejected() {
        let err = RelayConfig::from_lookup(lookup(&[
            (ENV_WEBHOOK_URLS, "ftp://example.com/hook"),
            (ENV_FEED_SOURCES, "UC1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_WEBHOOK_URLS, .. }));
    }

    #[test]
    fn keywords_from_env_list() {
        let cfg = RelayConfig::from_lookup(lookup(&[
            (ENV_WEBHOOK_URLS, "https://a.example/1,https://b.example/2"),
            (ENV_FEED_SOURCES, "UC1"),
            (ENV_KEYWORDS, "rust, tokio"),
            (ENV_RUN_MODE, "Sampled"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(cfg.keywords, vec!["rust".to_string(), "tokio".to_string()]);
        assert_eq!(cfg.run_mode, RunMode::Sampled);
    }
}
