//! TOML-based configuration for the DMS.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authorization::ClaimSetCache;
use crate::db::resilience::{CircuitBreakerPolicy, ResiliencePolicy, RetryPolicy};
use crate::error::{DmsError, Result};

/// Top-level configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmsConfig {
    pub dms: DmsSection,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmsSection {
    pub instance_name: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/dms/dms.db".into(),
        }
    }
}

impl DatabaseConfig {
    /// Connection string that creates the database file when missing.
    pub fn connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path)
    }
}

/// Where the project schemas are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub core_schema_path: PathBuf,
    #[serde(default)]
    pub extension_schema_paths: Vec<PathBuf>,
}

/// Retry and circuit breaker settings for the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_transient_base_delay_ms")]
    pub transient_base_delay_ms: u64,
    #[serde(default = "default_transient_max_delay_ms")]
    pub transient_max_delay_ms: u64,
    #[serde(default = "default_other_retries")]
    pub other_retries: u32,
    #[serde(default = "default_other_delay_ms")]
    pub other_delay_ms: u64,
    #[serde(default = "default_write_conflict_retries")]
    pub write_conflict_retries: u32,
    #[serde(default = "default_write_conflict_delay_ms")]
    pub write_conflict_delay_ms: u64,
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    #[serde(default = "default_sampling_window_secs")]
    pub sampling_window_secs: u64,
    #[serde(default = "default_minimum_throughput")]
    pub minimum_throughput: usize,
    #[serde(default = "default_break_duration_secs")]
    pub break_duration_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            transient_retries: default_transient_retries(),
            transient_base_delay_ms: default_transient_base_delay_ms(),
            transient_max_delay_ms: default_transient_max_delay_ms(),
            other_retries: default_other_retries(),
            other_delay_ms: default_other_delay_ms(),
            write_conflict_retries: default_write_conflict_retries(),
            write_conflict_delay_ms: default_write_conflict_delay_ms(),
            failure_ratio: default_failure_ratio(),
            sampling_window_secs: default_sampling_window_secs(),
            minimum_throughput: default_minimum_throughput(),
            break_duration_secs: default_break_duration_secs(),
        }
    }
}

impl ResilienceConfig {
    pub fn policy(&self) -> ResiliencePolicy {
        ResiliencePolicy {
            retry: RetryPolicy {
                transient_retries: self.transient_retries,
                transient_base_delay: Duration::from_millis(self.transient_base_delay_ms),
                transient_max_delay: Duration::from_millis(self.transient_max_delay_ms),
                other_retries: self.other_retries,
                other_delay: Duration::from_millis(self.other_delay_ms),
                write_conflict_retries: self.write_conflict_retries,
                write_conflict_delay: Duration::from_millis(self.write_conflict_delay_ms),
            },
            circuit_breaker: CircuitBreakerPolicy {
                failure_ratio: self.failure_ratio,
                sampling_window: Duration::from_secs(self.sampling_window_secs),
                minimum_throughput: self.minimum_throughput,
                break_duration: Duration::from_secs(self.break_duration_secs),
            },
        }
    }
}

fn default_transient_retries() -> u32 {
    4
}

fn default_transient_base_delay_ms() -> u64 {
    100
}

fn default_transient_max_delay_ms() -> u64 {
    2000
}

fn default_other_retries() -> u32 {
    1
}

fn default_other_delay_ms() -> u64 {
    50
}

fn default_write_conflict_retries() -> u32 {
    3
}

fn default_write_conflict_delay_ms() -> u64 {
    25
}

fn default_failure_ratio() -> f64 {
    0.5
}

fn default_sampling_window_secs() -> u64 {
    10
}

fn default_minimum_throughput() -> usize {
    10
}

fn default_break_duration_secs() -> u64 {
    30
}

/// Cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_claim_set_capacity")]
    pub claim_set_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            claim_set_capacity: default_claim_set_capacity(),
        }
    }
}

fn default_claim_set_capacity() -> usize {
    64
}

impl CacheConfig {
    /// An empty claim-set cache sized by `claim_set_capacity`.
    pub fn claim_set_cache(&self) -> ClaimSetCache {
        ClaimSetCache::new(self.claim_set_capacity)
    }
}

impl DmsConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DmsError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.dms.instance_name.is_empty() {
            return Err(DmsError::Config("dms.instance_name must not be empty".into()));
        }

        if self.dms.database.path.is_empty() {
            return Err(DmsError::Config("dms.database.path must not be empty".into()));
        }

        if self.schema.core_schema_path.as_os_str().is_empty() {
            return Err(DmsError::Config("schema.core_schema_path must not be empty".into()));
        }

        let resilience = &self.resilience;
        if !(resilience.failure_ratio > 0.0 && resilience.failure_ratio <= 1.0) {
            return Err(DmsError::Config(format!(
                "resilience.failure_ratio must be in (0, 1], got {}",
                resilience.failure_ratio
            )));
        }
        if resilience.minimum_throughput == 0 {
            return Err(DmsError::Config(
                "resilience.minimum_throughput must be at least 1".into(),
            ));
        }
        if resilience.transient_base_delay_ms > resilience.transient_max_delay_ms {
            return Err(DmsError::Config(
                "resilience.transient_base_delay_ms must not exceed resilience.transient_max_delay_ms".into(),
            ));
        }

        if self.cache.claim_set_capacity == 0 {
            return Err(DmsError::Config("cache.claim_set_capacity must be at least 1".into()));
        }

        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        Self {
            dms: DmsSection {
                instance_name: "Ed-Fi DMS".into(),
                database: DatabaseConfig::default(),
            },
            schema: SchemaConfig {
                core_schema_path: PathBuf::from("/etc/dms/ApiSchema.json"),
                extension_schema_paths: Vec::new(),
            },
            resilience: ResilienceConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_TOML: &str = r#"
[dms]
instance_name = "Grand Bend ISD"

[dms.database]
path = "/var/lib/dms/grand-bend.db"

[schema]
core_schema_path = "/etc/dms/ApiSchema.json"
extension_schema_paths = ["/etc/dms/ApiSchema-Sample.json"]

[resilience]
transient_retries = 2
failure_ratio = 0.25
break_duration_secs = 5

[cache]
claim_set_capacity = 16
"#;

    fn parse_sample() -> DmsConfig {
        toml::from_str(SAMPLE_TOML).expect("sample TOML should parse")
    }

    #[test]
    fn parse_full_config() {
        let cfg = parse_sample();
        assert_eq!(cfg.dms.instance_name, "Grand Bend ISD");
        assert_eq!(cfg.dms.database.path, "/var/lib/dms/grand-bend.db");
        assert_eq!(cfg.schema.core_schema_path, PathBuf::from("/etc/dms/ApiSchema.json"));
        assert_eq!(cfg.schema.extension_schema_paths.len(), 1);
        assert_eq!(cfg.resilience.transient_retries, 2);
        assert_eq!(cfg.resilience.failure_ratio, 0.25);
        assert_eq!(cfg.cache.claim_set_capacity, 16);
        cfg.validate().unwrap();
    }

    #[test]
    fn omitted_sections_use_defaults() {
        let cfg: DmsConfig = toml::from_str(
            r#"
[dms]
instance_name = "Minimal"

[schema]
core_schema_path = "ApiSchema.json"
"#,
        )
        .unwrap();
        assert_eq!(cfg.dms.database.path, "/var/lib/dms/dms.db");
        assert!(cfg.schema.extension_schema_paths.is_empty());
        assert_eq!(cfg.resilience.transient_retries, 4);
        assert_eq!(cfg.resilience.minimum_throughput, 10);
        assert_eq!(cfg.cache.claim_set_capacity, 64);
    }

    #[test]
    fn partial_resilience_section_fills_defaults() {
        let cfg = parse_sample();
        assert_eq!(cfg.resilience.other_retries, 1);
        assert_eq!(cfg.resilience.sampling_window_secs, 10);
    }

    #[test]
    fn resilience_policy_converts_units() {
        let policy = parse_sample().resilience.policy();
        assert_eq!(policy.retry.transient_retries, 2);
        assert_eq!(policy.retry.transient_base_delay, Duration::from_millis(100));
        assert_eq!(policy.circuit_breaker.break_duration, Duration::from_secs(5));
        assert_eq!(policy.circuit_breaker.failure_ratio, 0.25);
    }

    #[test]
    fn claim_set_cache_uses_configured_capacity() {
        let cache = parse_sample().cache.claim_set_cache();
        assert_eq!(cache.capacity(), 16);
        assert!(cache.is_empty());
    }

    #[test]
    fn default_policy_matches_default_config() {
        assert_eq!(ResilienceConfig::default().policy(), ResiliencePolicy::default());
    }

    #[test]
    fn connection_string_creates_missing_file() {
        let cfg = parse_sample();
        assert_eq!(
            cfg.dms.database.connection_string(),
            "sqlite:///var/lib/dms/grand-bend.db?mode=rwc"
        );
    }

    #[test]
    fn generate_default_is_valid() {
        let cfg = DmsConfig::generate_default();
        cfg.validate().unwrap();
    }

    #[test]
    fn generate_default_round_trips_through_toml() {
        let cfg = DmsConfig::generate_default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DmsConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.dms.instance_name, cfg.dms.instance_name);
        assert_eq!(parsed.schema.core_schema_path, cfg.schema.core_schema_path);
    }

    #[test]
    fn validate_requires_instance_name() {
        let mut cfg = parse_sample();
        cfg.dms.instance_name = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("instance_name"));
    }

    #[test]
    fn validate_requires_database_path() {
        let mut cfg = parse_sample();
        cfg.dms.database.path = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("dms.database.path"));
    }

    #[test]
    fn validate_requires_core_schema_path() {
        let mut cfg = parse_sample();
        cfg.schema.core_schema_path = PathBuf::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("core_schema_path"));
    }

    #[test]
    fn validate_rejects_failure_ratio_out_of_range() {
        let mut cfg = parse_sample();
        cfg.resilience.failure_ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.resilience.failure_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.resilience.failure_ratio = 1.0;
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_minimum_throughput() {
        let mut cfg = parse_sample();
        cfg.resilience.minimum_throughput = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut cfg = parse_sample();
        cfg.resilience.transient_base_delay_ms = 5000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_cache_capacity() {
        let mut cfg = parse_sample();
        cfg.cache.claim_set_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("claim_set_capacity"));
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join("dms_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dms.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE_TOML.as_bytes()).unwrap();

        let cfg = DmsConfig::load(&path).expect("should load from file");
        assert_eq!(cfg.dms.instance_name, "Grand Bend ISD");

        // cleanup
        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn load_nonexistent_file_returns_io_error() {
        let result = DmsConfig::load(Path::new("/nonexistent/dms.toml"));
        assert!(matches!(result, Err(DmsError::Io(_))));
    }

    #[test]
    fn load_invalid_toml_returns_config_error() {
        let dir = std::env::temp_dir().join("dms_test_bad_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "this is [[[not valid toml").unwrap();

        let result = DmsConfig::load(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config"));

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }
}
