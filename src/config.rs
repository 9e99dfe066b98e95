//! Configuration loading and types for s3sink.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `sink` section carries the store credentials and
//! is validated into an immutable [`SinkConfig`]; the `store` section tunes
//! the store client; `logging` drives the binary's subscriber.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

/// Namespace used for in-flight uploads when none is configured.
pub const DEFAULT_TEMP_NAMESPACE: &str = "upload-temp-files";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Credentials, bucket and endpoint.
    pub sink: SinkOptions,

    /// Store client settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Raw sink options as they appear in the configuration file.
///
/// Every field is optional at this stage so that a missing value produces
/// a validation report naming the field rather than a bare parse error.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SinkOptions {
    /// Store access key.
    #[garde(required, length(min = 1))]
    pub key: Option<String>,

    /// Store access secret.
    #[garde(required, length(min = 1))]
    pub secret: Option<String>,

    /// Bucket holding both temporary and content-addressed objects.
    #[garde(required, length(min = 1))]
    pub bucket: Option<String>,

    /// Store endpoint URL.
    #[garde(required, length(min = 1))]
    pub endpoint: Option<String>,

    /// Prefix for temporary objects (defaults to [`DEFAULT_TEMP_NAMESPACE`]).
    #[garde(length(min = 1))]
    pub temp_namespace: Option<String>,
}

/// Validated, immutable sink configuration.
#[derive(Clone)]
pub struct SinkConfig {
    key: String,
    secret: String,
    bucket: String,
    endpoint: String,
    temp_namespace: String,
}

impl SinkConfig {
    /// Validate `options` and build the configuration.
    ///
    /// Fails if any of `key`, `secret`, `bucket` or `endpoint` is absent or
    /// empty.
    pub fn new(options: SinkOptions) -> Result<Self, ConfigError> {
        options
            .validate()
            .map_err(|report| ConfigError::Invalid(report.to_string().trim_end().to_string()))?;

        let temp_namespace = options
            .temp_namespace
            .map(|ns| ns.trim_end_matches('/').to_string())
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_TEMP_NAMESPACE.to_string());

        // Presence was checked by `validate` above.
        Ok(Self {
            key: options.key.unwrap_or_default(),
            secret: options.secret.unwrap_or_default(),
            bucket: options.bucket.unwrap_or_default(),
            endpoint: options.endpoint.unwrap_or_default(),
            temp_namespace,
        })
    }

    /// Store access key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store access secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Target bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Prefix for temporary objects, without a trailing slash.
    pub fn temp_namespace(&self) -> &str {
        &self.temp_namespace
    }
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("temp_namespace", &self.temp_namespace)
            .finish()
    }
}

/// Which [`crate::storage::backend::ObjectStore`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// S3-compatible service at `sink.endpoint`.
    S3,
    /// In-process map; contents are lost on exit.
    Memory,
    /// Directory tree under `store.local_root`.
    Local,
}

/// Store client configuration.
///
/// The sink itself never retries or times out; `max_attempts` and
/// `operation_timeout_secs` are handed to the store client.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend type: `s3`, `memory` or `local`.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Region to sign requests for.
    #[serde(default = "default_region")]
    pub region: String,

    /// Force path-style URL addressing (needed by most S3-compatible servers).
    #[serde(default = "default_true")]
    pub use_path_style: bool,

    /// Total attempts per store request, including the first. Unset keeps
    /// the client's default policy.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Upper bound in seconds for a single store operation, retries
    /// included. Unset means no timeout.
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,

    /// Upload part size in bytes; bodies larger than this go through a
    /// multipart upload.
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Root directory for the `local` backend.
    #[serde(default = "default_local_root")]
    pub local_root: String,
}

impl StoreConfig {
    /// Operation timeout as a [`Duration`], if configured.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            region: default_region(),
            use_path_style: true,
            max_attempts: None,
            operation_timeout_secs: None,
            part_size: default_part_size(),
            local_root: default_local_root(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_backend() -> StoreBackend {
    StoreBackend::S3
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> usize {
    8 * 1024 * 1024
}

fn default_local_root() -> String {
    "./data/objects".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Parse configuration from a YAML document.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_options() -> SinkOptions {
        SinkOptions {
            key: Some("AKIA".to_string()),
            secret: Some("s3cr3t".to_string()),
            bucket: Some("media".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            temp_namespace: None,
        }
    }

    #[test]
    fn test_sink_config_defaults_namespace() {
        let config = SinkConfig::new(full_options()).unwrap();
        assert_eq!(config.bucket(), "media");
        assert_eq!(config.endpoint(), "http://localhost:9000");
        assert_eq!(config.temp_namespace(), DEFAULT_TEMP_NAMESPACE);
    }

    #[test]
    fn test_sink_config_trims_namespace_slash() {
        let options = SinkOptions {
            temp_namespace: Some("incoming/".to_string()),
            ..full_options()
        };
        let config = SinkConfig::new(options).unwrap();
        assert_eq!(config.temp_namespace(), "incoming");
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        for field in ["key", "secret", "bucket", "endpoint"] {
            let mut options = full_options();
            match field {
                "key" => options.key = None,
                "secret" => options.secret = None,
                "bucket" => options.bucket = None,
                _ => options.endpoint = None,
            }
            let err = SinkConfig::new(options).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid(msg) if msg.contains(field)),
                "expected {field} to be reported, got {err}"
            );
        }
    }

    #[test]
    fn test_empty_required_field_is_rejected() {
        let options = SinkOptions {
            secret: Some(String::new()),
            ..full_options()
        };
        assert!(matches!(
            SinkConfig::new(options),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = SinkConfig::new(full_options()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_parse_config_with_defaults() {
        let yaml = r#"
sink:
  key: AKIA
  secret: s3cr3t
  bucket: media
  endpoint: http://localhost:9000
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::S3);
        assert_eq!(config.store.region, "us-east-1");
        assert!(config.store.use_path_style);
        assert_eq!(config.store.max_attempts, None);
        assert_eq!(config.store.operation_timeout(), None);
        assert_eq!(config.store.part_size, 8 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        SinkConfig::new(config.sink).unwrap();
    }

    #[test]
    fn test_parse_config_store_section() {
        let yaml = r#"
sink:
  key: AKIA
  secret: s3cr3t
  bucket: media
  endpoint: http://localhost:9000
  temp_namespace: staging
store:
  backend: local
  local_root: /var/lib/s3sink
  max_attempts: 5
  operation_timeout_secs: 30
logging:
  format: json
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Local);
        assert_eq!(config.store.local_root, "/var/lib/s3sink");
        assert_eq!(config.store.max_attempts, Some(5));
        assert_eq!(
            config.store.operation_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.logging.format, "json");
        let sink = SinkConfig::new(config.sink).unwrap();
        assert_eq!(sink.temp_namespace(), "staging");
    }

    #[test]
    fn test_non_string_option_is_rejected() {
        let yaml = r#"
sink:
  key: [not, a, string]
  secret: s3cr3t
  bucket: media
  endpoint: http://localhost:9000
"#;
        assert!(matches!(parse_config(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_sink_section_is_rejected() {
        assert!(matches!(
            parse_config("logging:\n  level: debug\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/s3sink.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
