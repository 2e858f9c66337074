//! Configuration: key/value properties and typed accessor/queue settings.
//!
//! Resolution order, lowest to highest precedence:
//! built-in defaults → JSON file → `DBQ_*` environment variables → explicit
//! [`Properties::set`] calls.

use crate::error::{DbqError, DbqResult};
use crate::model::StorageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Prefix of environment variables picked up by [`Properties::load_from_env`].
pub const ENV_PREFIX: &str = "DBQ_";

// ════════════════════════════════════════════
// Properties
// ════════════════════════════════════════════

/// String key/value lookup with typed getters and defaults.
///
/// Also serves as the override layer for SQL statement templates, see
/// [`crate::schema::TableStatements`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Unparsable values fall back to `default` with a warning.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.parse_or(key, default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.parse_or(key, default)
    }

    /// Accepts `true/false`, `1/0`, `yes/no` (case-insensitive).
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => default,
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    tracing::warn!(key, value = %v, "ignoring unparsable boolean property");
                    default
                }
            },
        }
    }

    fn parse_or<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = raw, "ignoring unparsable numeric property");
                default
            }),
        }
    }

    /// Merge `DBQ_*` environment variables.
    ///
    /// `DBQ_DB_MAXRESOURCEEXHAUSTRETRIES=3` does not map to a camelCase key,
    /// so the variable name after the prefix is matched case-insensitively
    /// against the keys already present and, failing that, stored with `_`
    /// replaced by `.` in lower case.
    pub fn load_from_env(&mut self) {
        let vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        self.merge_env_vars(vars);
    }

    fn merge_env_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in vars {
            let Some(stripped) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let dotted = stripped.replace('_', ".").to_ascii_lowercase();
            let key = self
                .values
                .keys()
                .find(|k| k.to_ascii_lowercase() == dotted)
                .cloned()
                .unwrap_or(dotted);
            self.values.insert(key, value);
        }
    }

    /// Load a flat JSON object. Non-string scalars are stored as text.
    pub fn load_from_file(path: impl AsRef<Path>) -> DbqResult<Self> {
        let json = fs::read_to_string(path)?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&json)?;
        let mut props = Self::new();
        for (key, value) in raw {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_)) => {
                    other.to_string()
                }
                other => {
                    return Err(DbqError::Config(format!(
                        "property '{key}' must be a scalar, got {other}"
                    )));
                }
            };
            props.values.insert(key, text);
        }
        Ok(props)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ════════════════════════════════════════════
// AccessorConfig
// ════════════════════════════════════════════

/// Settings of one [`crate::accessor::DatabaseAccessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessorConfig {
    /// Fallback when the dialect does not report a maximum statement length.
    pub max_statement_length: usize,
    /// Maximum number of ids in a single `... where id in (...)` statement.
    pub max_num_statements: usize,
    /// Row cap applied to "first entries" selects; `<= 0` means unlimited.
    pub max_select_limit: i64,
    /// Per-statement timeout in seconds; 0 disables it.
    pub query_timeout: u64,
    /// Gate for destructive DDL (table creation, wipe-out).
    pub db_admin: bool,
    pub enable_batch_mode: bool,
    pub max_resource_exhaust_retries: u32,
    /// Sleep between retries in milliseconds.
    pub resource_exhaust_sleep_gap: u64,
    /// Wrap the engine in [`crate::accessor::RetryingAccessor`].
    pub use_retry_delegate: bool,
    /// Drop and recreate all tables when the accessor starts.
    pub wipe_out_db: bool,
    /// Prepended to the default table names (`xbstore`, `xbmeat`, `xbref`).
    pub table_prefix: String,
    /// Statement and table name overrides.
    pub overrides: Properties,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            max_statement_length: 2048,
            max_num_statements: 50,
            max_select_limit: -1,
            query_timeout: 0,
            db_admin: true,
            enable_batch_mode: true,
            max_resource_exhaust_retries: 5,
            resource_exhaust_sleep_gap: 1000,
            use_retry_delegate: true,
            wipe_out_db: false,
            table_prefix: String::new(),
            overrides: Properties::new(),
        }
    }
}

impl AccessorConfig {
    /// Resolve settings from a property set using the historical key names.
    ///
    /// The whole property set is kept as the statement override layer.
    pub fn from_properties(props: &Properties) -> Self {
        let d = Self::default();
        Self {
            max_statement_length: props.get_u64(
                "queue.persistent.maxStatementLength",
                d.max_statement_length as u64,
            ) as usize,
            max_num_statements: props.get_u64("maxNumStatements", d.max_num_statements as u64)
                as usize,
            max_select_limit: props.get_i64("maxSelectLimit", d.max_select_limit),
            query_timeout: props.get_u64("queue.persistent.queryTimeout", d.query_timeout),
            db_admin: props.get_bool("dbAdmin", d.db_admin),
            enable_batch_mode: props.get_bool("enableBatchMode", d.enable_batch_mode),
            max_resource_exhaust_retries: props.get_u64(
                "db.maxResourceExhaustRetries",
                d.max_resource_exhaust_retries as u64,
            ) as u32,
            resource_exhaust_sleep_gap: props
                .get_u64("db.resourceExhaustSleepGap", d.resource_exhaust_sleep_gap),
            use_retry_delegate: props.get_bool("db.useRetryDelegate", d.use_retry_delegate),
            wipe_out_db: props.get_bool("wipeOutDb", d.wipe_out_db),
            table_prefix: props.get_str("tablePrefix", &d.table_prefix),
            overrides: props.clone(),
        }
    }

    /// Load from a JSON file shaped like this struct (camelCase keys).
    pub fn load_from_file(path: impl AsRef<Path>) -> DbqResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbqResult<()> {
        if self.max_num_statements == 0 {
            return Err(DbqError::Config("maxNumStatements must be > 0".into()));
        }
        if self.max_statement_length < 64 {
            return Err(DbqError::Config(format!(
                "maxStatementLength={} is too small to hold a single delete statement",
                self.max_statement_length
            )));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════
// QueueConfig
// ════════════════════════════════════════════

/// Settings of one [`crate::queue::PersistentQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub storage_id: StorageId,
    pub max_entries: i64,
    pub max_bytes: i64,
    /// Entries are stored as refs pointing at shared meats.
    pub ref_counted: bool,
    /// Always recompute counters and compare them against the cache.
    pub debug: bool,
    /// Used to name an exceeded limit, e.g. `queue/callback`.
    pub property_prefix: String,
}

pub const DEFAULT_MAX_ENTRIES: i64 = 1000;
pub const DEFAULT_MAX_BYTES: i64 = 10 * 1024 * 1024;

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_id: StorageId::default(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            ref_counted: true,
            debug: false,
            property_prefix: "queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Defaults for the given store; the property prefix follows its type.
    pub fn new(storage_id: StorageId) -> Self {
        let property_prefix = format!("queue/{}", storage_id.store_type);
        Self {
            storage_id,
            property_prefix,
            ..Self::default()
        }
    }

    pub fn with_max_entries(mut self, max_entries: i64) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: i64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_ref_counted(mut self, ref_counted: bool) -> Self {
        self.ref_counted = ref_counted;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Full property name of a limit, e.g. `queue/callback/maxEntries`.
    pub fn prop_name(&self, token: &str) -> String {
        format!("{}/{}", self.property_prefix, token)
    }

    /// Overlay `<prefix>/maxEntries` and `<prefix>/maxBytes` from properties.
    pub fn apply_properties(mut self, props: &Properties) -> Self {
        self.max_entries = props.get_i64(&self.prop_name("maxEntries"), self.max_entries);
        self.max_bytes = props.get_i64(&self.prop_name("maxBytes"), self.max_bytes);
        self.debug = props.get_bool(&self.prop_name("debug"), self.debug);
        self
    }
}
