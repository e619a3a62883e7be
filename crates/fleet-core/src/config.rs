//! fleet.toml configuration parser.
//!
//! Every section is optional; missing values fall back to defaults.
//! Durations are written as strings ("500ms", "30s", "15m", "7d") and are
//! checked by [`FleetConfig::validate`], after which the typed accessors
//! can be used without further error handling.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::tier::{ResourceLimits, Tier, TierTable};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub hosting: HostingConfig,
    pub retry: RetryConfig,
    pub scaling: ScalingConfig,
    pub monitor: MonitorConfig,
    pub pass: PassConfig,
    pub samples: SamplesConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
    /// Per-tier overrides of the built-in tier table, keyed by tier name.
    pub tiers: BTreeMap<String, ResourceLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Path of the redb database file.
    pub data_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            data_path: "/var/lib/fleet/fleet.redb".to_string(),
        }
    }
}

/// Static bearer tokens for the HTTP surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token the external scheduler presents to trigger a pass.
    pub trigger_token: String,
    /// Token for admin and status operations.
    pub admin_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub base_url: String,
    /// Key for the application (admin) API: build, suspend, delete, create.
    pub application_key: String,
    /// Key for the client API (resource usage). Falls back to `application_key`.
    pub client_key: Option<String>,
    pub request_timeout: String,
    pub template: ServerTemplate,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            application_key: String::new(),
            client_key: None,
            request_timeout: "10s".to_string(),
            template: ServerTemplate::default(),
        }
    }
}

impl HostingConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn client_key(&self) -> &str {
        self.client_key.as_deref().unwrap_or(&self.application_key)
    }
}

/// Fields passed to the control-plane when creating a new server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTemplate {
    pub owner: u64,
    pub egg: u64,
    pub location: u64,
    pub docker_image: String,
    pub startup: String,
}

impl Default for ServerTemplate {
    fn default() -> Self {
        Self {
            owner: 1,
            egg: 1,
            location: 1,
            docker_image: "ghcr.io/parkervcp/yolks:nodejs_20".to_string(),
            startup: "node index.js".to_string(),
        }
    }
}

/// Retry policy applied to every hosting call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: "500ms".to_string(),
            max_backoff: "8s".to_string(),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        parse_duration(&self.initial_backoff).unwrap_or(Duration::from_millis(500))
    }

    pub fn max_backoff(&self) -> Duration {
        parse_duration(&self.max_backoff).unwrap_or(Duration::from_secs(8))
    }
}

/// Scaling policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Percent above which a sample counts as over-utilized.
    pub upper_threshold: f64,
    /// Percent below which a sample counts as under-utilized.
    pub lower_threshold: f64,
    /// Consecutive over-threshold samples required to scale up (M).
    pub scale_up_samples: usize,
    /// Consecutive under-threshold samples required to scale down (N).
    pub scale_down_samples: usize,
    pub cooldown: String,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            upper_threshold: 80.0,
            lower_threshold: 30.0,
            scale_up_samples: 3,
            scale_down_samples: 6,
            cooldown: "15m".to_string(),
        }
    }
}

impl ScalingConfig {
    pub fn cooldown(&self) -> Duration {
        parse_duration(&self.cooldown).unwrap_or(Duration::from_secs(900))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Consecutive sampling failures before health becomes `unknown`.
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Worker pool size.
    pub concurrency: usize,
    /// Wall-clock budget for one pass.
    pub budget: String,
    /// Lifetime of a per-deployment lease.
    pub lease_ttl: String,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            budget: "4m".to_string(),
            lease_ttl: "5m".to_string(),
        }
    }
}

impl PassConfig {
    pub fn budget(&self) -> Duration {
        parse_duration(&self.budget).unwrap_or(Duration::from_secs(240))
    }

    pub fn lease_ttl(&self) -> Duration {
        parse_duration(&self.lease_ttl).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    pub retention: String,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            retention: "7d".to_string(),
        }
    }
}

impl SamplesConfig {
    pub fn retention(&self) -> Duration {
        parse_duration(&self.retention).unwrap_or(Duration::from_secs(7 * 86_400))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    /// Upper bound on one webhook delivery.
    pub timeout: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: "5s".to_string(),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl FleetConfig {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Override secrets from the environment. `lookup` is injected so tests
    /// don't touch the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FLEET_TRIGGER_TOKEN") {
            self.auth.trigger_token = v;
        }
        if let Some(v) = lookup("FLEET_ADMIN_TOKEN") {
            self.auth.admin_token = v;
        }
        if let Some(v) = lookup("FLEET_HOSTING_APPLICATION_KEY") {
            self.hosting.application_key = v;
        }
        if let Some(v) = lookup("FLEET_HOSTING_CLIENT_KEY") {
            self.hosting.client_key = Some(v);
        }
    }

    /// Check invariants across sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for d in [
            &self.hosting.request_timeout,
            &self.retry.initial_backoff,
            &self.retry.max_backoff,
            &self.scaling.cooldown,
            &self.pass.budget,
            &self.pass.lease_ttl,
            &self.samples.retention,
            &self.notify.timeout,
        ] {
            parse_duration(d)?;
        }

        let s = &self.scaling;
        if !(s.lower_threshold > 0.0 && s.lower_threshold < s.upper_threshold) {
            return Err(ConfigError::Invalid(format!(
                "scaling thresholds must satisfy 0 < lower ({}) < upper ({})",
                s.lower_threshold, s.upper_threshold
            )));
        }
        if s.scale_up_samples == 0 {
            return Err(ConfigError::Invalid("scaling.scale_up_samples must be >= 1".into()));
        }
        if s.scale_down_samples < s.scale_up_samples {
            return Err(ConfigError::Invalid(
                "scaling.scale_down_samples must be >= scale_up_samples".into(),
            ));
        }
        if self.pass.concurrency == 0 {
            return Err(ConfigError::Invalid("pass.concurrency must be >= 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        self.tier_table()?;
        Ok(())
    }

    /// The built-in tier table with any configured overrides applied.
    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        let mut steps: BTreeMap<Tier, ResourceLimits> = TierTable::default().iter().collect();
        for (name, limits) in &self.tiers {
            steps.insert(name.parse::<Tier>()?, *limits);
        }
        TierTable::new(steps)
    }
}
