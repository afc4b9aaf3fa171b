//! Identity provider connection settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration for the OIDC identity provider.
///
/// Client credentials arrive here already resolved: reading them from
/// environment variables is the job of the process configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL, used for discovery (e.g. "https://dex.example.com").
    issuer_url: String,
    client_id: String,
    client_secret: String,
    /// Where the provider sends the browser back to (the gateway's callback path).
    redirect_url: String,
    /// Scopes requested in addition to `openid`.
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,
    /// PEM bundle replacing the built-in trust roots when talking to the issuer.
    #[serde(default)]
    root_ca_file: Option<PathBuf>,
    /// `scheme://host[:port]` substituted into authorization URLs shown to browsers.
    #[serde(default)]
    login_url_override: Option<String>,
    /// Trace every request to and response from the provider.
    #[serde(default)]
    debug: bool,
}

fn default_scopes() -> Vec<String> {
    vec!["profile".to_string()]
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("root_ca_file", &self.root_ca_file)
            .field("login_url_override", &self.login_url_override)
            .field("debug", &self.debug)
            .finish()
    }
}

impl OidcConfig {
    /// Creates a configuration builder with the required fields.
    #[must_use]
    pub fn builder(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> OidcConfigBuilder {
        OidcConfigBuilder::new(issuer_url, client_id, client_secret, redirect_url)
    }

    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Returns the configured scopes, without the implicit `openid`.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn root_ca_file(&self) -> Option<&Path> {
        self.root_ca_file.as_deref()
    }

    #[must_use]
    pub fn login_url_override(&self) -> Option<&str> {
        self.login_url_override.as_deref()
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    config: OidcConfig,
}

impl OidcConfigBuilder {
    /// Creates a new builder with required fields and default scopes.
    #[must_use]
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            config: OidcConfig {
                issuer_url: issuer_url.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                redirect_url: redirect_url.into(),
                scopes: default_scopes(),
                root_ca_file: None,
                login_url_override: None,
                debug: false,
            },
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.config.scopes = scopes;
        self
    }

    /// Adds a scope unless it is already requested.
    #[must_use]
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.config.scopes.contains(&scope) {
            self.config.scopes.push(scope);
        }
        self
    }

    #[must_use]
    pub fn root_ca_file(mut self, path: Option<PathBuf>) -> Self {
        self.config.root_ca_file = path;
        self
    }

    #[must_use]
    pub fn login_url_override(mut self, url: Option<String>) -> Self {
        self.config.login_url_override = url;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    #[must_use]
    pub fn build(self) -> OidcConfig {
        self.config
    }
}
