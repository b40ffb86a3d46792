use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file holding the usage log and user tables.
    /// If not set, an in-memory database is used.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Route prefix under which every statistics endpoint is mounted.
    #[serde(default = "default_route")]
    pub route: String,
    /// Schema holding the `countries` table. Country endpoints answer 404
    /// when this is not set.
    #[serde(default)]
    pub statistics_schema: Option<String>,
    /// Number of months covered by the "recent" aggregations.
    #[serde(default = "default_recent_months")]
    pub recent_months: u32,
    /// Output format used when a request does not ask for one ("json" or "csv").
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Dashboard origin for CORS restrictions on statistics routes.
    /// If not set, all origins are allowed.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

fn default_route() -> String {
    "statistics".to_string()
}

const fn default_recent_months() -> u32 {
    10
}

fn default_format() -> String {
    "json".to_string()
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            route: default_route(),
            statistics_schema: None,
            recent_months: default_recent_months(),
            default_format: default_format(),
            dashboard_origin: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `USAGE_STATS_HOST` → host
    /// - `USAGE_STATS_PORT` → port
    /// - `USAGE_STATS_DATABASE_PATH` → database_path
    /// - `USAGE_STATS_ROUTE` → route
    /// - `USAGE_STATS_STATISTICS_SCHEMA` → statistics_schema
    /// - `USAGE_STATS_RECENT_MONTHS` → recent_months
    /// - `USAGE_STATS_DEFAULT_FORMAT` → default_format
    /// - `USAGE_STATS_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `USAGE_STATS_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("USAGE_STATS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("USAGE_STATS_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(path) = std::env::var("USAGE_STATS_DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(route) = std::env::var("USAGE_STATS_ROUTE") {
            config.route = route;
        }
        if let Ok(schema) = std::env::var("USAGE_STATS_STATISTICS_SCHEMA") {
            config.statistics_schema = Some(schema);
        }
        if let Ok(val) = std::env::var("USAGE_STATS_RECENT_MONTHS") {
            if let Ok(m) = val.parse() {
                config.recent_months = m;
            }
        }
        if let Ok(format) = std::env::var("USAGE_STATS_DEFAULT_FORMAT") {
            config.default_format = format;
        }
        if let Ok(origin) = std::env::var("USAGE_STATS_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        if let Ok(val) = std::env::var("USAGE_STATS_SHUTDOWN_TIMEOUT") {
            if let Ok(t) = val.parse() {
                config.shutdown_timeout_secs = t;
            }
        }

        config.sanitize();
        config
    }

    /// Drop or reset values that cannot be used safely.
    ///
    /// The statistics schema name is spliced into SQL as an identifier, so
    /// anything that is not a plain identifier is discarded.
    fn sanitize(&mut self) {
        if let Some(schema) = self.statistics_schema.take() {
            if is_valid_identifier(&schema) {
                self.statistics_schema = Some(schema);
            } else {
                tracing::warn!(
                    schema = %schema,
                    "Invalid statistics schema name, country endpoints will be disabled"
                );
            }
        }
        if !matches!(self.default_format.as_str(), "json" | "csv") {
            tracing::warn!(
                format = %self.default_format,
                "Unsupported default format, falling back to json"
            );
            self.default_format = default_format();
        }
        if self.recent_months == 0 {
            tracing::warn!("recent_months must be at least 1, using default");
            self.recent_months = default_recent_months();
        }
        self.route = self.route.trim_matches('/').to_string();
    }

    /// Returns the prefix the statistics router is nested under, e.g. `/statistics`.
    pub fn route_prefix(&self) -> String {
        format!("/{}", self.route)
    }
}

/// Returns `true` for `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
