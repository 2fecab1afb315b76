use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub session: SessionConfig,

    pub rate_limit: RateLimitConfig,

    pub lockout: LockoutConfig,

    pub csrf: CsrfConfig,

    pub audit: AuditConfig,

    pub maintenance: MaintenanceConfig,

    pub notifier: NotifierConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (0 = number of CPU cores)
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/warden.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Sets the Secure flag on the session cookie.
    /// Disable only for local development without HTTPS.
    pub secure_cookies: bool,

    /// Base64 encoded 32 byte key used to encrypt the session cookie.
    /// When empty a random key is generated at startup, which logs
    /// everybody out on restart.
    pub cookie_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7878,
            cors_allowed_origins: vec!["http://localhost:7878".to_string()],
            secure_cookies: true,
            cookie_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a "remember me" refresh token.
    pub remember_me_days: i64,

    /// Lifetime of a browser-session refresh token.
    pub session_hours: i64,

    pub access_token_minutes: i64,

    /// Maximum rotations inside one token family before re-login is forced.
    pub max_rotations: i32,

    /// Window after a rotation during which presenting the old refresh
    /// token again is treated as a benign retry.
    pub reuse_grace_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remember_me_days: 30,
            session_hours: 24,
            access_token_minutes: 15,
            max_rotations: 1000,
            reuse_grace_ms: 500,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn reuse_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.reuse_grace_ms)
    }
}

/// Threshold and window for one limiter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    pub max_attempts: u32,
    pub window_seconds: u64,
}

impl LimitRule {
    #[must_use]
    pub const fn new(max_attempts: u32, window_seconds: u64) -> Self {
        Self {
            max_attempts,
            window_seconds,
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub login_by_ip: LimitRule,

    pub login_by_email: LimitRule,

    pub register_by_ip: LimitRule,

    pub password_reset_by_ip: LimitRule,

    pub email_verification_by_ip: LimitRule,

    /// How often expired windows are swept from memory.
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_by_ip: LimitRule::new(20, 15 * 60),
            login_by_email: LimitRule::new(10, 15 * 60),
            register_by_ip: LimitRule::new(5, 60 * 60),
            password_reset_by_ip: LimitRule::new(3, 60 * 60),
            email_verification_by_ip: LimitRule::new(5, 60 * 60),
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub max_failed_attempts: i32,

    pub lockout_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 15,
        }
    }
}

impl LockoutConfig {
    #[must_use]
    pub fn lockout_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lockout_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub cookie_name: String,

    pub header_name: String,

    pub cookie_max_age_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrf_token".to_string(),
            header_name: "x-csrf-token".to_string(),
            cookie_max_age_secs: 60 * 60 * 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Capacity of the in-memory queue in front of the audit writer.
    pub queue_capacity: usize,

    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,

    /// Minimum time between two cleanup runs.
    pub interval_minutes: u64,

    /// Expired and revoked sessions older than this are deleted.
    pub session_retention_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
            session_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook receiving notification payloads. Notifications are only
    /// logged when unset.
    pub webhook_url: Option<String>,

    pub timeout_seconds: u64,

    pub max_attempts: u32,

    pub backoff_base_ms: u64,

    /// Password reset tokens expire after this many minutes.
    pub reset_token_minutes: i64,

    /// Base URL used to build password reset links.
    pub public_base_url: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10,
            max_attempts: 3,
            backoff_base_ms: 250,
            reset_token_minutes: 60,
            public_base_url: "http://localhost:7878".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    pub argon2_parallelism: u32,

    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            min_password_length: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "warden".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("warden").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".warden").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.max_rotations <= 0 {
            anyhow::bail!("session.max_rotations must be > 0");
        }

        if self.session.reuse_grace_ms < 0 {
            anyhow::bail!("session.reuse_grace_ms cannot be negative");
        }

        if self.session.access_token_minutes <= 0 || self.session.session_hours <= 0 {
            anyhow::bail!("Session and access token lifetimes must be > 0");
        }

        if self.lockout.max_failed_attempts <= 0 {
            anyhow::bail!("lockout.max_failed_attempts must be > 0");
        }

        let rules = [
            ("login_by_ip", self.rate_limit.login_by_ip),
            ("login_by_email", self.rate_limit.login_by_email),
            ("register_by_ip", self.rate_limit.register_by_ip),
            ("password_reset_by_ip", self.rate_limit.password_reset_by_ip),
            (
                "email_verification_by_ip",
                self.rate_limit.email_verification_by_ip,
            ),
        ];
        for (name, rule) in rules {
            if rule.max_attempts == 0 || rule.window_seconds == 0 {
                anyhow::bail!("rate_limit.{name} needs max_attempts and window_seconds > 0");
            }
        }

        if self.rate_limit.sweep_interval_seconds == 0 || self.maintenance.interval_minutes == 0 {
            anyhow::bail!("Background task intervals must be > 0");
        }

        if self.notifier.max_attempts == 0 {
            anyhow::bail!("notifier.max_attempts must be at least 1");
        }

        if let Some(url) = &self.notifier.webhook_url {
            url::Url::parse(url).context("Invalid notifier.webhook_url")?;
        }

        Ok(())
    }
}
