//! Centralized gateway configuration.
//!
//! Settings are layered, lowest priority first:
//!
//! 1. an optional YAML file (`--config`, default `config.yml`);
//! 2. environment variables prefixed `PORTCULLIS__`, with `__` separating
//!    nested keys (`PORTCULLIS__OIDC__ISSUER_URL`);
//! 3. command-line flags for the handful of operational settings.
//!
//! [`ServerConfig`] is the raw, deserialized form. [`ServerConfig::validate`]
//! resolves indirections and consistency rules into a [`GatewayConfig`],
//! which is what the rest of the process consumes.

use clap::Parser;
use portcullis_core::Result;
use portcullis_identity::{OidcConfig, parse_login_origin};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::auth::RESERVED_PATHS;
use crate::error::ConfigError;

/// Command-line flags.
#[derive(Debug, Clone, Parser)]
#[command(name = "portcullis", version, about = "OpenID Connect gate in front of an HTTP service")]
pub struct Cli {
    /// Configuration file (YAML). Skipped when absent.
    #[arg(long, short = 'c', env = "PORTCULLIS_CONFIG", default_value = "config.yml")]
    pub config: PathBuf,

    /// Log level: error, warn, info, debug or trace.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format: json or pretty.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Address to listen on.
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Upstream URL every authorized request is forwarded to.
    #[arg(long)]
    pub target_url: Option<String>,

    /// Log every exchange with the identity provider.
    #[arg(long)]
    pub oidc_debug: bool,
}

/// Gateway configuration as read from its sources.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub target_url: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Paths forwarded without authentication. A trailing `/` covers the subtree.
    #[serde(default)]
    pub passthroughs: Vec<String>,

    /// Show tokens and claims after login instead of redirecting to the landing URL.
    #[serde(default)]
    pub token_display: bool,

    #[serde(default)]
    pub session: SessionConfig,

    pub oidc: OidcSection,

    #[serde(default)]
    pub users: UsersSection,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    #[serde(alias = "dev")]
    Pretty,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Inactivity after which a session is dropped.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Absolute session lifetime, counted from creation and never extended.
    #[serde(default = "default_lifetime_seconds")]
    pub lifetime_seconds: u64,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Interval between expired-session sweeps, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_idle_timeout_seconds() -> u64 {
    3600
}

fn default_lifetime_seconds() -> u64 {
    86400
}

fn default_cookie_name() -> String {
    "pc_session".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

fn default_cleanup_interval_seconds() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
            lifetime_seconds: default_lifetime_seconds(),
            cookie_name: default_cookie_name(),
            secure_cookies: default_secure_cookies(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> chrono::Duration {
        seconds(self.idle_timeout_seconds)
    }

    #[must_use]
    pub fn lifetime(&self) -> chrono::Duration {
        seconds(self.lifetime_seconds)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_seconds)
    }
}

fn seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// OIDC settings as written by the operator.
///
/// The client id and secret are each given either literally or as the name
/// of an environment variable holding them, never both.
#[derive(Clone, Deserialize)]
pub struct OidcSection {
    pub issuer_url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_id_env: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,
    pub redirect_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub root_ca_file: Option<PathBuf>,
    #[serde(default)]
    pub login_url_override: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

fn default_scopes() -> Vec<String> {
    vec!["profile".to_string()]
}

impl fmt::Debug for OidcSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcSection")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_id_env", &self.client_id_env)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("client_secret_env", &self.client_secret_env)
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("root_ca_file", &self.root_ca_file)
            .field("login_url_override", &self.login_url_override)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Where the users allow-list lives. Exactly one must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersSection {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub configmap: Option<ConfigMapSection>,
}

/// One key of a Kubernetes ConfigMap.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigMapSection {
    /// Defaults to the namespace the gateway runs in.
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    pub key: String,
}

/// Validated source of the users allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsersLocation {
    File(PathBuf),
    ConfigMap {
        namespace: Option<String>,
        name: String,
        key: String,
    },
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub target_url: Url,
    pub passthroughs: Vec<String>,
    pub token_display: bool,
    pub session: SessionConfig,
    pub oidc: OidcConfig,
    pub users: UsersLocation,
}

impl ServerConfig {
    /// Loads configuration from the file named by `cli`, the environment,
    /// and the flags themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or has the
    /// wrong shape.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(
                config::File::from(cli.config.as_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("PORTCULLIS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("passthroughs")
                    .with_list_parse_key("oidc.scopes"),
            );
        Self::from_builder(builder, cli)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        cli: &Cli,
    ) -> Result<Self, ConfigError> {
        let load_error = |e: config::ConfigError| ConfigError::Load {
            details: e.to_string(),
        };
        let config = builder
            .set_override_option("log_level", cli.log_level.clone())
            .map_err(load_error)?
            .set_override_option("log_format", cli.log_format.clone())
            .map_err(load_error)?
            .set_override_option("bind_addr", cli.bind_addr.clone())
            .map_err(load_error)?
            .set_override_option("target_url", cli.target_url.clone())
            .map_err(load_error)?
            .set_override_option("oidc.debug", cli.oidc_debug.then_some(true))
            .map_err(load_error)?
            .build()
            .map_err(load_error)?;
        Ok(config.try_deserialize().map_err(load_error)?)
    }

    /// Validates the configuration, reading indirected credentials from the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<GatewayConfig, ConfigError> {
        self.validate_with(|name| std::env::var(name).ok())
    }

    /// Validates the configuration, resolving `*_env` settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<GatewayConfig, ConfigError> {
        let target_url = Url::parse(&self.target_url)
            .map_err(|e| ConfigError::invalid("target_url", e.to_string()))?;
        if !matches!(target_url.scheme(), "http" | "https") || target_url.host_str().is_none() {
            return Err(ConfigError::invalid("target_url", "must be an http or https URL").into());
        }
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::invalid("bind_addr", "must not be empty").into());
        }

        for pattern in &self.passthroughs {
            if !pattern.starts_with('/') {
                return Err(ConfigError::invalid(
                    "passthroughs",
                    format!("'{pattern}' must start with '/'"),
                )
                .into());
            }
            if RESERVED_PATHS.contains(&pattern.as_str()) {
                return Err(ConfigError::invalid(
                    "passthroughs",
                    format!("'{pattern}' is reserved by the gateway"),
                )
                .into());
            }
        }

        let session = &self.session;
        if session.idle_timeout_seconds == 0 {
            return Err(ConfigError::invalid("session.idle_timeout_seconds", "must be positive").into());
        }
        if session.lifetime_seconds == 0 {
            return Err(ConfigError::invalid("session.lifetime_seconds", "must be positive").into());
        }
        if session.cleanup_interval_seconds == 0 {
            return Err(
                ConfigError::invalid("session.cleanup_interval_seconds", "must be positive").into(),
            );
        }
        if session.cookie_name.is_empty() {
            return Err(ConfigError::invalid("session.cookie_name", "must not be empty").into());
        }

        let oidc = self.validate_oidc(&lookup)?;
        let users = self.validate_users()?;

        Ok(GatewayConfig {
            bind_addr: self.bind_addr.clone(),
            target_url,
            passthroughs: self.passthroughs.clone(),
            token_display: self.token_display,
            session: self.session.clone(),
            oidc,
            users,
        })
    }

    fn validate_oidc(
        &self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> std::result::Result<OidcConfig, ConfigError> {
        let section = &self.oidc;
        if section.issuer_url.is_empty() {
            return Err(ConfigError::invalid("oidc.issuer_url", "must be set"));
        }
        Url::parse(&section.redirect_url)
            .map_err(|e| ConfigError::invalid("oidc.redirect_url", e.to_string()))?;

        let client_id = resolve_credential(
            "oidc.client_id",
            section.client_id.as_deref(),
            section.client_id_env.as_deref(),
            lookup,
        )?;
        let client_secret = resolve_credential(
            "oidc.client_secret",
            section.client_secret.as_deref(),
            section.client_secret_env.as_deref(),
            lookup,
        )?;

        if let Some(value) = section.login_url_override.as_deref() {
            parse_login_origin(value)
                .map_err(|e| ConfigError::invalid("oidc.login_url_override", e.to_string()))?;
        }

        Ok(OidcConfig::builder(
            section.issuer_url.clone(),
            client_id,
            client_secret,
            section.redirect_url.clone(),
        )
        .scopes(section.scopes.clone())
        .root_ca_file(section.root_ca_file.clone())
        .login_url_override(section.login_url_override.clone())
        .debug(section.debug)
        .build())
    }

    fn validate_users(&self) -> std::result::Result<UsersLocation, ConfigError> {
        match (&self.users.file, &self.users.configmap) {
            (Some(path), None) => Ok(UsersLocation::File(path.clone())),
            (None, Some(cm)) => {
                if cm.name.is_empty() || cm.key.is_empty() {
                    return Err(ConfigError::invalid(
                        "users.configmap",
                        "name and key must be set",
                    ));
                }
                Ok(UsersLocation::ConfigMap {
                    namespace: cm.namespace.clone().filter(|ns| !ns.is_empty()),
                    name: cm.name.clone(),
                    key: cm.key.clone(),
                })
            }
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "users",
                "set either 'file' or 'configmap', not both",
            )),
            (None, None) => Err(ConfigError::invalid(
                "users",
                "one of 'file' or 'configmap' must be set",
            )),
        }
    }
}

/// Resolves a setting given either literally or through an environment variable.
fn resolve_credential(
    field: &str,
    literal: Option<&str>,
    env_name: Option<&str>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> std::result::Result<String, ConfigError> {
    match (literal.filter(|v| !v.is_empty()), env_name.filter(|v| !v.is_empty())) {
        (Some(value), None) => Ok(value.to_string()),
        (None, Some(name)) => lookup(name).filter(|v| !v.is_empty()).ok_or_else(|| {
            ConfigError::invalid(field, format!("environment variable '{name}' is not set"))
        }),
        (Some(_), Some(_)) => Err(ConfigError::invalid(
            field,
            "set either the value or its environment variable, not both",
        )),
        (None, None) => Err(ConfigError::invalid(field, "must be set")),
    }
}
