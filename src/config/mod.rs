use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum accepted length of the token signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for a single request, in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection string (default: sqlite:./data/labtrack.db)
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a request may wait for a pooled connection, in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:./data/labtrack.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared by staff and patient tokens.
    /// Required; there is no built-in fallback.
    pub jwt_secret: Option<String>,
    #[serde(default = "default_staff_cookie")]
    pub staff_cookie: String,
    #[serde(default = "default_patient_cookie")]
    pub patient_cookie: String,
    /// Mark session cookies `Secure` (enable in production behind TLS)
    #[serde(default)]
    pub secure_cookies: bool,
    /// Token lifetime in hours (default: 24)
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Admin account created on startup when no staff user exists yet
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            staff_cookie: default_staff_cookie(),
            patient_cookie: default_patient_cookie(),
            secure_cookies: false,
            token_ttl_hours: default_token_ttl_hours(),
            bootstrap_admin: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

fn default_staff_cookie() -> String {
    "lab_staff_session".to_string()
}

fn default_patient_cookie() -> String {
    "lab_patient_session".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("built-in defaults"),
        }
    }
}

impl Config {
    /// Load the configuration file (if present) and apply environment overrides.
    /// Logging is left to the caller, which installs the subscriber from the result.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = toml::from_str::<Config>(&content)
                .with_context(|| "Failed to parse configuration file")?;
            (config, ConfigSource::File(path.to_path_buf()))
        } else {
            (Config::default(), ConfigSource::Defaults)
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok((config, source))
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("LABTRACK_JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(url) = lookup("LABTRACK_DATABASE_URL").filter(|s| !s.is_empty()) {
            self.database.url = url;
        }
        if let Some(secure) = lookup("LABTRACK_SECURE_COOKIES") {
            self.auth.secure_cookies = matches!(secure.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Reject configurations the server cannot safely run with.
    pub fn validate(&self) -> Result<()> {
        match self.auth.jwt_secret.as_deref() {
            None | Some("") => bail!(
                "auth.jwt_secret is not set (configure it or export LABTRACK_JWT_SECRET)"
            ),
            Some(secret) if secret.len() < MIN_SECRET_LEN => bail!(
                "auth.jwt_secret must be at least {} bytes long",
                MIN_SECRET_LEN
            ),
            Some(_) => {}
        }

        if self.auth.staff_cookie.is_empty() || self.auth.patient_cookie.is_empty() {
            bail!("Session cookie names must not be empty");
        }
        if self.auth.staff_cookie == self.auth.patient_cookie {
            bail!("auth.staff_cookie and auth.patient_cookie must differ");
        }
        if self.auth.token_ttl_hours <= 0 {
            bail!("auth.token_ttl_hours must be positive");
        }
        if self.database.url.trim().is_empty() {
            bail!("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if self.server.request_timeout_secs == 0 {
            bail!("server.request_timeout_secs must be at least 1");
        }

        Ok(())
    }

    /// The validated signing secret. Call after [`Config::validate`].
    pub fn jwt_secret(&self) -> Result<&str> {
        self.auth
            .jwt_secret
            .as_deref()
            .filter(|s| s.len() >= MIN_SECRET_LEN)
            .context("auth.jwt_secret is missing or too short")
    }
}
