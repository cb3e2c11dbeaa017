use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{de, Deserialize, Deserializer};
use tokio::sync::Semaphore;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the thumbnailer.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A tag name to report the environment to, for each metric. Defaults to not sending such a tag.
    pub environment_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "thumbnailer".into(),
            hostname_tag: None,
            environment_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how thumbnails are downloaded from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL of the thumbnail origin.
    ///
    /// Thumbnails are requested from `{url}vi/{video_id}/{variant}.jpg`.
    pub url: Url,

    /// The timeout for establishing a connection to the origin.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_ORIGIN_URL).expect("default origin URL is valid"),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

const DEFAULT_ORIGIN_URL: &str = "https://i.ytimg.com/";

/// The longest accepted `request_timeout`.
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The longest accepted `cache_ttl`, roughly a century.
const MAX_CACHE_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// See the README for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Path of the sqlite database holding cached thumbnails.
    ///
    /// `:memory:` keeps the cache in process memory only.
    pub cache_path: PathBuf,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The maximum number of thumbnail downloads running at the same time.
    ///
    /// Requests that are served from the cache do not count towards this limit.
    pub max_concurrent_fetches: usize,

    /// The time budget of a single request.
    ///
    /// It covers the cache lookup, waiting for a download slot, the download and the
    /// write back into the cache.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long a cached thumbnail is served before it is downloaded again.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// How often expired thumbnails are purged from the cache.
    ///
    /// Expired rows are only ever skipped on read when this is unset.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Option<Duration>,

    /// How long in-flight requests are given to finish when the server stops.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// The thumbnail origin.
    pub origin: OriginConfig,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:8080".to_owned()
    } else {
        "127.0.0.1:8080".to_owned()
    }
}

/// Default value for the "cache_path" configuration.
fn default_cache_path() -> PathBuf {
    if is_docker() {
        // Docker image defines `/data` as a persistent volume
        PathBuf::from("/data/thumbnail.db")
    } else {
        PathBuf::from("thumbnail.db")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            cache_path: default_cache_path(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            max_concurrent_fetches: 16,
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: None,
            shutdown_timeout: Duration::from_secs(10),
            origin: OriginConfig::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            )?,
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Rejects values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be a positive number");
        }
        if self.max_concurrent_fetches > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "max_concurrent_fetches must be at most {}",
                Semaphore::MAX_PERMITS
            );
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must not be zero");
        }
        if self.request_timeout > MAX_REQUEST_TIMEOUT {
            anyhow::bail!(
                "request_timeout must be at most {}",
                humantime_serde::re::humantime::format_duration(MAX_REQUEST_TIMEOUT)
            );
        }
        if self.cache_ttl > MAX_CACHE_TTL {
            anyhow::bail!("cache_ttl is too long");
        }
        if self.cleanup_interval.is_some_and(|interval| interval.is_zero()) {
            anyhow::bail!("cleanup_interval must not be zero");
        }
        Ok(())
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.max_concurrent_fetches, 16);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3600 * 24));
        assert_eq!(cfg.cleanup_interval, None);
        assert_eq!(cfg.origin.url.as_str(), "https://i.ytimg.com/");
    }

    #[test]
    fn test_humantime_values() {
        let yaml = r#"
            request_timeout: 2s
            cache_ttl: 1h
            cleanup_interval: 10m
            origin:
              url: http://localhost:1234/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(2));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.cleanup_interval, Some(Duration::from_secs(600)));
        assert_eq!(cfg.origin.url.as_str(), "http://localhost:1234/");
        // untouched nested fields keep their defaults
        assert_eq!(cfg.origin.connect_timeout, Duration::from_secs(1));
        assert_eq!(cfg.max_concurrent_fetches, 16);
    }

    #[test]
    fn test_zero_fetches_rejected() {
        let yaml = r#"
            max_concurrent_fetches: 0
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let too_many = Config {
            max_concurrent_fetches: Semaphore::MAX_PERMITS + 1,
            ..Config::default()
        };
        assert!(too_many.validate().is_err());

        let yaml = r#"
            request_timeout: 500years
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "request_timeout must be at most 1day");

        let yaml = r#"
            cache_ttl: 1000years
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert!(cfg.validate().is_err());

        let generous = Config {
            max_concurrent_fetches: 1024,
            request_timeout: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(365 * 24 * 60 * 60),
            ..Config::default()
        };
        generous.validate().unwrap();
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.logging.enable_backtraces);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_cache:
                max_unused_for: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
