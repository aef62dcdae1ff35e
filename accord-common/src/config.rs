//! Service configuration loading
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `ACCORD_CONFIG` environment variable
//! 3. `~/.config/accord/accord.toml`
//! 4. Compiled-in defaults (fallback)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "ACCORD_CONFIG";

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Transactional (OLTP) store URL.
    pub transactional_url: String,
    /// Analytical (OLAP) store URL.
    pub analytical_url: String,
    /// Dual-write pipeline write-back endpoint. Absent means repairs are
    /// reported but cannot be applied.
    pub dual_write_endpoint: Option<String>,
    /// Primary keys sampled per table in hash validation.
    pub sample_size: u32,
    /// Hash every row instead of sampling. Expensive; explicit opt-in.
    pub hash_full_scan: bool,
    /// Rows scanned per table by the business-rule validator.
    pub scan_limit: u32,
    /// Bounded worker pool size for (table x check-type) pairs.
    pub worker_concurrency: usize,
    /// Per-check timeout; a slower check becomes a critical finding.
    pub check_timeout_secs: u64,
    /// Reports retained in memory.
    pub history_limit: usize,
    /// Row-count divergence (percent of source count) separating Warning
    /// from Error. Tunable because retention/TTL skew between stores can
    /// legitimately widen the gap.
    pub row_count_warn_percent: f64,
    /// Platform tables checked when a run names none.
    pub tables: Vec<TableSpec>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transactional_url: "sqlite://accord-oltp.db".to_string(),
            analytical_url: "sqlite://accord-olap.db".to_string(),
            dual_write_endpoint: None,
            sample_size: 100,
            hash_full_scan: false,
            scan_limit: 500,
            worker_concurrency: 4,
            check_timeout_secs: 30,
            history_limit: 50,
            row_count_warn_percent: 10.0,
            tables: default_tables(),
        }
    }
}

/// One reconciled table: identity plus the columns the validators and the
/// resolver need to know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default = "default_created_at")]
    pub created_at: String,
    #[serde(default = "default_updated_at")]
    pub updated_at: String,
    /// Business-rule family applied to this table (`users`, `projects`,
    /// `content`, `junction`). Absent means no rules.
    #[serde(default)]
    pub rules: Option<String>,
    /// Foreign keys a junction row must be able to resolve.
    #[serde(default)]
    pub references: Vec<ForeignKeySpec>,
    /// Child association counted by the `projects` ownership rule.
    #[serde(default)]
    pub child: Option<ChildSpec>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: default_primary_key(),
            created_at: default_created_at(),
            updated_at: default_updated_at(),
            rules: None,
            references: Vec::new(),
            child: None,
        }
    }

    pub fn with_rules(mut self, rules: &str) -> Self {
        self.rules = Some(rules.to_string());
        self
    }

    /// Columns whose numeric values canonicalize as epoch timestamps.
    pub fn timestamp_columns(&self) -> [&str; 2] {
        [self.created_at.as_str(), self.updated_at.as_str()]
    }
}

/// A foreign-key column and the parent table it must resolve in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    pub column: String,
    pub parent_table: String,
}

/// Child table + column counted for association-ownership rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChildSpec {
    pub table: String,
    pub column: String,
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_created_at() -> String {
    "created_at".to_string()
}

fn default_updated_at() -> String {
    "updated_at".to_string()
}

/// The fixed platform table list used when a run names no tables.
pub fn default_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("users").with_rules("users"),
        TableSpec {
            child: Some(ChildSpec {
                table: "project_pages".to_string(),
                column: "project_id".to_string(),
            }),
            ..TableSpec::new("projects").with_rules("projects")
        },
        TableSpec::new("pages_v2").with_rules("content"),
        TableSpec {
            references: vec![
                ForeignKeySpec {
                    column: "project_id".to_string(),
                    parent_table: "projects".to_string(),
                },
                ForeignKeySpec {
                    column: "page_id".to_string(),
                    parent_table: "pages_v2".to_string(),
                },
            ],
            ..TableSpec::new("project_pages").with_rules("junction")
        },
    ]
}

/// Lookup over the configured tables.
///
/// Table and column names end up interpolated into SQL (identifiers cannot
/// be bound), so the catalog is also the identifier gate: a name that is not
/// registered here, or not shaped like a plain identifier, never reaches a
/// query string.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    tables: HashMap<String, TableSpec>,
    order: Vec<String>,
}

impl TableCatalog {
    pub fn new(tables: Vec<TableSpec>) -> Result<Self> {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for spec in tables {
            if !is_valid_identifier(&spec.name)
                || !is_valid_identifier(&spec.primary_key)
                || !is_valid_identifier(&spec.created_at)
                || !is_valid_identifier(&spec.updated_at)
                || spec.references.iter().any(|r| {
                    !is_valid_identifier(&r.column) || !is_valid_identifier(&r.parent_table)
                })
                || spec.child.as_ref().is_some_and(|c| {
                    !is_valid_identifier(&c.table) || !is_valid_identifier(&c.column)
                })
            {
                return Err(Error::Config(format!(
                    "invalid identifier in table spec '{}'",
                    spec.name
                )));
            }
            order.push(spec.name.clone());
            map.insert(spec.name.clone(), spec);
        }
        Ok(Self { tables: map, order })
    }

    /// Table spec by name; `NotFound` for unregistered tables.
    pub fn spec(&self, table: &str) -> Result<&TableSpec> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table '{table}' is not registered")))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Registered table names in configuration order.
    pub fn table_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`: the only shape allowed into a query string.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolve the config file path following the priority order above.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    let default = dirs::config_dir().map(|d| d.join("accord").join("accord.toml"))?;
    default.exists().then_some(default)
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("cannot parse config file {}: {e}", path.display())))
}

/// Load configuration from the resolved path, or compiled defaults when no
/// file is present anywhere in the chain.
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<ServiceConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => load_config(&path),
        None => Ok(ServiceConfig::default()),
    }
}
