use config::{Config, ConfigBuilder, ConfigError, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for every database setting.
const ENV_PREFIX: &str = "DB";

/// Connection parameters plus the pool and retry policy wrapped around them.
///
/// Loaded from (lowest to highest precedence) built-in defaults, the optional
/// `config/default` and `config/{RUN_MODE}` files, then `DB_*` environment
/// variables. A `.env` file in the working directory is read first.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// `DB_NAME` in the environment.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long to wait for a connection to be established or handed out
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Idle connections older than this are closed by the pool
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Connection probes attempted by `initialize` before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed wait between failed probes
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Drop the unproven pool when every probe failed, so the next call
    /// starts initialization from scratch.
    #[serde(default)]
    pub reset_on_exhaustion: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "automation_practice".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    2_000 // 2 seconds
}

impl DatabaseConfig {
    /// Load configuration from `.env`, config files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let vars = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));

        Self::load_from(Path::new("config"), &run_mode, vars)
    }

    fn load_from(
        config_dir: &Path,
        run_mode: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let builder = with_defaults(Config::builder())?
            // Load config file if exists
            .add_source(File::with_name(&config_dir.join("default").to_string_lossy()).required(false))
            .add_source(File::with_name(&config_dir.join(run_mode).to_string_lossy()).required(false));

        // DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME,
        // DB_POOL__MAX_CONNECTIONS, DB_RETRY__DELAY_MS, ...
        with_env_overrides(builder, vars)?.build()?.try_deserialize()
    }

    /// Read the `DB_*` entries of a single `.env` file, ignoring the process
    /// environment. Missing keys fall back to the defaults.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path).map_err(|e| ConfigError::Foreign(Box::new(e)))?;

        let vars = entries
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Foreign(Box::new(e)))?;

        with_env_overrides(with_defaults(Config::builder())?, vars)?
            .build()?
            .try_deserialize()
    }

    /// Password replaced by one `*` per character.
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }

    /// Whether both configurations reach the same database as the same user.
    pub fn same_target(&self, other: &Self) -> bool {
        self.diff(other).is_empty()
    }

    /// Connection fields that differ between `self` and `other`.
    ///
    /// Pool and retry tuning are not compared. Password values are reported
    /// masked.
    pub fn diff(&self, other: &Self) -> Vec<FieldDifference> {
        let mut differences = Vec::new();

        let mut compare = |field: &'static str, local: String, remote: String| {
            if local != remote {
                differences.push(FieldDifference {
                    field,
                    local,
                    other: remote,
                });
            }
        };

        compare("host", self.host.clone(), other.host.clone());
        compare("port", self.port.to_string(), other.port.to_string());
        compare("user", self.user.clone(), other.user.clone());
        compare("database", self.database.clone(), other.database.clone());

        if self.password != other.password {
            differences.push(FieldDifference {
                field: "password",
                local: self.masked_password(),
                other: other.masked_password(),
            });
        }

        differences
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// One connection field that differs between two configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDifference {
    pub field: &'static str,
    pub local: String,
    pub other: String,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("host", default_host())?
        .set_default("port", default_port() as i64)?
        .set_default("user", default_user())?
        .set_default("password", "")?
        .set_default("database", default_database())?
        .set_default("pool.max_connections", default_max_connections() as i64)?
        .set_default("pool.connect_timeout_ms", default_connect_timeout_ms() as i64)?
        .set_default("pool.idle_timeout_ms", default_idle_timeout_ms() as i64)?
        .set_default("retry.max_attempts", default_max_attempts() as i64)?
        .set_default("retry.delay_ms", default_delay_ms() as i64)?
        .set_default("retry.reset_on_exhaustion", false)
}

/// Apply `DB_*` variables as overrides. Values stay strings, so a password
/// like `007` is not read as a number.
fn with_env_overrides(
    mut builder: ConfigBuilder<DefaultState>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for (key, value) in vars {
        if let Some(path) = env_key_to_path(&key) {
            builder = builder.set_override(path, value)?;
        }
    }
    Ok(builder)
}

/// `DB_POOL__MAX_CONNECTIONS` -> `pool.max_connections`, `DB_NAME` -> `database`.
fn env_key_to_path(key: &str) -> Option<String> {
    let rest = key.strip_prefix(ENV_PREFIX)?.strip_prefix('_')?;
    if rest.is_empty() {
        return None;
    }

    let path = rest.to_lowercase().replace("__", ".");
    if path == "name" {
        return Some("database".to_string());
    }
    Some(path)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            reset_on_exhaustion: false,
        }
    }
}

// Never print the password.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.masked_password())
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .finish()
    }
}
