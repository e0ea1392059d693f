use crate::cache::CacheLayout;
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Memory accounted to one loaded registry when sizing the registries LRU.
pub const REGISTRY_FOOTPRINT: u64 = 15 * MIB;

/// Settings of the registries service.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of connections of the read/write pool
    pub db_maxconn: usize,

    /// Maximum number of connections of the replica pool (`db_maxconn` when unset)
    pub db_maxconn_readonly: Option<usize>,

    /// Idle connections older than this are closed
    #[serde(with = "secs")]
    pub idle_timeout: Duration,

    /// Number of registries kept loaded (derived from `limit_memory_soft` when unset)
    pub registry_lru_size: Option<usize>,

    /// Soft memory limit of the process, in bytes
    pub limit_memory_soft: u64,

    #[serde(with = "secs")]
    pub test_lock_timeout: Duration,

    pub cache_layout: CacheLayout,

    /// Serve read-only cursors from a dedicated read-only pool
    pub readonly_replica: bool,

    /// Databases whose connections are never kept in the pool
    pub template_databases: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_maxconn: 64,
            db_maxconn_readonly: None,
            idle_timeout: Duration::from_secs(600),
            registry_lru_size: None,
            limit_memory_soft: 2048 * MIB,
            test_lock_timeout: Duration::from_secs(20),
            cache_layout: CacheLayout::default(),
            readonly_replica: false,
            template_databases: vec!["template0".into(), "template1".into()],
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn db_maxconn(mut self, maxconn: usize) -> Self {
        self.db_maxconn = maxconn;
        self
    }

    pub fn db_maxconn_readonly(mut self, maxconn: usize) -> Self {
        self.db_maxconn_readonly = Some(maxconn);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn registry_lru_size(mut self, size: usize) -> Self {
        self.registry_lru_size = Some(size);
        self
    }

    pub fn limit_memory_soft(mut self, bytes: u64) -> Self {
        self.limit_memory_soft = bytes;
        self
    }

    pub fn test_lock_timeout(mut self, timeout: Duration) -> Self {
        self.test_lock_timeout = timeout;
        self
    }

    pub fn cache_layout(mut self, layout: CacheLayout) -> Self {
        self.cache_layout = layout;
        self
    }

    pub fn readonly_replica(mut self, enabled: bool) -> Self {
        self.readonly_replica = enabled;
        self
    }

    pub fn template_databases(mut self, names: Vec<String>) -> Self {
        self.template_databases = names;
        self
    }

    /// Number of registries kept loaded at once.
    pub fn lru_size(&self) -> usize {
        match self.registry_lru_size {
            Some(size) => size.max(1),
            None => ((self.limit_memory_soft / REGISTRY_FOOTPRINT) as usize).max(1),
        }
    }

    pub fn maxconn_readonly(&self) -> usize {
        self.db_maxconn_readonly.unwrap_or(self.db_maxconn)
    }

    pub fn is_template(&self, dbname: &str) -> bool {
        self.template_databases.iter().any(|t| t == dbname)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_maxconn == 0 {
            return Err(DbError::Config("db_maxconn must be at least 1".into()));
        }
        if self.db_maxconn_readonly == Some(0) {
            return Err(DbError::Config("db_maxconn_readonly must be at least 1".into()));
        }
        self.cache_layout.validate()
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
