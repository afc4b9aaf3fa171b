//! Provider discovery, login URLs and the authorization-code callback.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::http::Method;
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, OAuth2TokenResponse,
    RedirectUrl, Scope, TokenResponse,
};
use portcullis_core::{Claims, Result};
use serde::Deserialize;
use tracing::{debug, info};
use url::{Position, Url};

use crate::{CallbackError, OidcConfig, OidcError, ProviderHttpClient};

/// Scope under which providers conventionally issue refresh tokens.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

const OPENID_SCOPE: &str = "openid";

/// A login attempt ready to be sent to the browser.
///
/// `state` and `nonce` must be kept server-side until the callback arrives.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
}

/// Query parameters the provider may send to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful code exchange.
pub struct TokenData {
    /// The raw, verified ID token.
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// The redirect URL registered for this client.
    pub redirect_url: String,
    /// Claims payload of the ID token, as issued.
    pub raw_claims: String,
    /// The same claims, decoded once for authorization.
    pub claims: Claims,
}

/// Client of one OpenID Connect provider.
///
/// Built once at startup by [`OidcAuthenticator::discover`] and shared
/// read-only by every request afterwards.
pub struct OidcAuthenticator {
    config: OidcConfig,
    http: ProviderHttpClient,
    provider_metadata: CoreProviderMetadata,
    redirect_url: RedirectUrl,
    offline_as_scope: bool,
    login_origin: Option<String>,
}

impl OidcAuthenticator {
    /// Queries the provider's metadata and negotiates scopes.
    ///
    /// # Errors
    ///
    /// Fails if a URL in the configuration is invalid, the provider cannot
    /// be reached or returns malformed metadata, or a configured scope is
    /// not in the provider's advertised list.
    pub async fn discover(config: OidcConfig) -> Result<Self, OidcError> {
        let issuer_url =
            IssuerUrl::new(config.issuer_url().to_string()).map_err(|e| {
                OidcError::Configuration {
                    details: format!("invalid issuer URL: {e}"),
                }
            })?;
        let redirect_url =
            RedirectUrl::new(config.redirect_url().to_string()).map_err(|e| {
                OidcError::Configuration {
                    details: format!("invalid redirect URL: {e}"),
                }
            })?;
        let login_origin = config
            .login_url_override()
            .map(parse_login_origin)
            .transpose()?;

        let http = ProviderHttpClient::new(config.root_ca_file(), config.debug())?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| OidcError::Discovery {
                issuer: config.issuer_url().to_string(),
                details: e.to_string(),
            })?;
        info!(issuer = %config.issuer_url(), "Successfully queried provider");

        let supported: Vec<String> = provider_metadata
            .scopes_supported()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default();
        let offline_as_scope = negotiate_offline_access(config.scopes(), &supported)?;
        debug!(offline_as_scope, supported = ?supported, "Negotiated provider scopes");

        Ok(Self {
            config,
            http,
            provider_metadata,
            redirect_url,
            offline_as_scope,
            login_origin,
        })
    }

    /// Whether refresh tokens are requested through the `offline_access` scope
    /// rather than the `access_type=offline` parameter.
    #[must_use]
    pub fn offline_as_scope(&self) -> bool {
        self.offline_as_scope
    }

    /// Builds an authorization URL with a fresh `state` and `nonce`.
    ///
    /// The `openid` scope is always requested, whether configured or not.
    #[must_use]
    pub fn new_login_url(&self) -> LoginRequest {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            ClientId::new(self.config.client_id().to_string()),
            Some(ClientSecret::new(self.config.client_secret().to_string())),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let mut request = client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in self.config.scopes() {
            if scope != OPENID_SCOPE && scope != OFFLINE_ACCESS_SCOPE {
                request = request.add_scope(Scope::new(scope.clone()));
            }
        }
        request = if self.offline_as_scope {
            request.add_scope(Scope::new(OFFLINE_ACCESS_SCOPE.to_string()))
        } else {
            request.add_extra_param("access_type", "offline")
        };

        let (url, state, nonce) = request.url();
        let url = match &self.login_origin {
            Some(origin) => format!("{origin}{}", &url[Position::BeforePath..]),
            None => url.to_string(),
        };

        LoginRequest {
            url,
            state: state.secret().clone(),
            nonce: nonce.secret().clone(),
        }
    }

    /// Validates a callback request and returns its authorization code.
    ///
    /// `expected_state` is the `state` issued for the pending login attempt
    /// of the calling session, if any.
    ///
    /// # Errors
    ///
    /// Rejects non-GET requests, provider-reported errors, a missing code,
    /// and a `state` that is absent or does not match.
    pub fn check_callback_request(
        &self,
        method: &Method,
        params: &CallbackParams,
        expected_state: Option<&str>,
    ) -> std::result::Result<String, CallbackError> {
        if method != Method::GET {
            return Err(CallbackError::MethodNotAllowed {
                method: method.to_string(),
            });
        }
        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(CallbackError::Provider {
                error: error.to_string(),
                description: params.error_description.clone().unwrap_or_default(),
            });
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(CallbackError::MissingCode)?;
        let expected = expected_state.ok_or(CallbackError::NoPendingLogin)?;
        if params.state.as_deref() != Some(expected) {
            return Err(CallbackError::StateMismatch {
                received: params.state.clone(),
            });
        }
        Ok(code.to_string())
    }

    /// Exchanges `code` for tokens and verifies the ID token against `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::TokenExchange`] if the token endpoint refuses
    /// the code or omits a token, and [`OidcError::TokenValidation`] if the
    /// ID token's signature, issuer, audience, expiry or nonce is wrong.
    pub async fn handle_callback_request(
        &self,
        code: &str,
        nonce: &str,
    ) -> Result<TokenData, OidcError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            ClientId::new(self.config.client_id().to_string()),
            Some(ClientSecret::new(self.config.client_secret().to_string())),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| OidcError::TokenExchange {
                details: format!("token endpoint error: {e}"),
            })?
            .request_async(&self.http)
            .await
            .map_err(|e| OidcError::TokenExchange {
                details: e.to_string(),
            })?;

        // The raw token is only reachable through the serialized response.
        let response_json =
            serde_json::to_value(&token_response).map_err(|e| OidcError::TokenExchange {
                details: format!("failed to serialize token response: {e}"),
            })?;
        let raw_id_token = response_json
            .get("id_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OidcError::TokenExchange {
                details: "no id_token in token response".to_string(),
            })?
            .to_string();
        let access_token = token_response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(OidcError::TokenExchange {
                details: "no access_token in token response".to_string(),
            }
            .into());
        }

        let id_token = token_response
            .id_token()
            .ok_or_else(|| OidcError::TokenExchange {
                details: "no id_token in token response".to_string(),
            })?;
        id_token
            .claims(&client.id_token_verifier(), &Nonce::new(nonce.to_string()))
            .map_err(|e| OidcError::TokenValidation {
                details: e.to_string(),
            })?;

        let raw_claims = decode_claims_payload(&raw_id_token)?;
        let claims = Claims::from_json(&raw_claims).map_err(|e| OidcError::TokenValidation {
            details: e.to_string(),
        })?;

        Ok(TokenData {
            id_token: raw_id_token,
            access_token,
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
            redirect_url: self.config.redirect_url().to_string(),
            raw_claims,
            claims,
        })
    }
}

/// Decides how refresh tokens are requested and rejects unsupported scopes.
///
/// `scopes_supported` is only recommended metadata: when a provider does not
/// advertise it, `offline_access` is assumed to exist and nothing is checked.
fn negotiate_offline_access(
    configured: &[String],
    supported: &[String],
) -> std::result::Result<bool, OidcError> {
    if supported.is_empty() {
        return Ok(true);
    }
    if let Some(scope) = configured.iter().find(|s| !supported.contains(s)) {
        return Err(OidcError::UnsupportedScope {
            scope: scope.clone(),
        });
    }
    Ok(supported.iter().any(|s| s == OFFLINE_ACCESS_SCOPE))
}

/// Parses a login URL override, which must be exactly `scheme://host[:port]`.
///
/// Returns the normalized origin.
///
/// # Errors
///
/// Returns [`OidcError::Configuration`] for anything that is not a bare
/// http(s) origin.
pub fn parse_login_origin(value: &str) -> std::result::Result<String, OidcError> {
    let invalid = |details: String| OidcError::Configuration {
        details: format!("invalid login URL override '{value}': {details}"),
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not contain a path".to_string()));
    }
    Ok(url.origin().ascii_serialization())
}

/// Extracts the payload segment of a compact JWT as text.
fn decode_claims_payload(token: &str) -> std::result::Result<String, OidcError> {
    let invalid = |details: String| OidcError::TokenValidation { details };
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(invalid("invalid JWT format".to_string())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| invalid(format!("failed to decode JWT payload: {e}")))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("JWT payload is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(scopes_supported: Option<&[&str]>) -> MockServer {
        let server = MockServer::start().await;
        let issuer = server.uri();
        let mut metadata = json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/auth"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/keys"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
        });
        if let Some(scopes) = scopes_supported {
            metadata["scopes_supported"] = json!(scopes);
        }
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
            .mount(&server)
            .await;
        server
    }

    fn config(server: &MockServer, scopes: &[&str]) -> OidcConfig {
        OidcConfig::builder(
            server.uri(),
            "gateway",
            "secret",
            "https://app.example.com/_auth/callback",
        )
        .scopes(scopes.iter().map(ToString::to_string).collect())
        .build()
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .expect("login url")
            .query_pairs()
            .into_owned()
            .collect()
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..CallbackParams::default()
        }
    }

    #[tokio::test]
    async fn missing_scope_list_requests_offline_access_as_scope() {
        let server = provider(None).await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .expect("discover");

        let login = auth.new_login_url();
        let params = query(&login.url);

        assert!(auth.offline_as_scope());
        let scopes: Vec<&str> = params["scope"].split(' ').collect();
        assert!(scopes.contains(&"openid"));
        assert!(scopes.contains(&"profile"));
        assert!(scopes.contains(&OFFLINE_ACCESS_SCOPE));
        assert!(!params.contains_key("access_type"));
        assert_eq!(params["state"], login.state);
        assert_eq!(params["nonce"], login.nonce);
        assert_eq!(params["client_id"], "gateway");
        assert!(login.url.starts_with(&format!("{}/auth?", server.uri())));
    }

    #[tokio::test]
    async fn provider_without_offline_scope_gets_access_type_parameter() {
        let server = provider(Some(&["openid", "profile", "email"])).await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile", "email"]))
            .await
            .expect("discover");

        let params = query(&auth.new_login_url().url);

        assert!(!auth.offline_as_scope());
        assert_eq!(params["access_type"], "offline");
        assert!(!params["scope"].contains(OFFLINE_ACCESS_SCOPE));
    }

    #[tokio::test]
    async fn openid_is_requested_once_when_configured() {
        let server = provider(Some(&["openid", "profile", "offline_access"])).await;
        let auth = OidcAuthenticator::discover(config(&server, &["openid", "profile"]))
            .await
            .expect("discover");

        let params = query(&auth.new_login_url().url);

        assert_eq!(params["scope"].matches("openid").count(), 1);
        assert!(params["scope"].contains(OFFLINE_ACCESS_SCOPE));
    }

    #[tokio::test]
    async fn unadvertised_scope_fails_discovery() {
        let server = provider(Some(&["openid", "profile"])).await;

        let err = OidcAuthenticator::discover(config(&server, &["profile", "groups"]))
            .await
            .err()
            .expect("unsupported scope");

        assert!(err.to_string().contains("'groups'"));
    }

    #[tokio::test]
    async fn unreachable_metadata_fails_discovery() {
        let server = MockServer::start().await;

        let err = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .err()
            .expect("no metadata");

        assert!(err.to_string().contains("failed to query provider"));
    }

    #[tokio::test]
    async fn each_login_attempt_gets_its_own_state() {
        let server = provider(None).await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .expect("discover");

        let first = auth.new_login_url();
        let second = auth.new_login_url();

        assert_ne!(first.state, second.state);
        assert_ne!(first.nonce, second.nonce);
    }

    #[tokio::test]
    async fn login_url_override_replaces_scheme_and_host() {
        let server = provider(None).await;
        let config = OidcConfig::builder(
            server.uri(),
            "gateway",
            "secret",
            "https://app.example.com/_auth/callback",
        )
        .login_url_override(Some("https://login.example.com".to_string()))
        .build();
        let auth = OidcAuthenticator::discover(config).await.expect("discover");

        let login = auth.new_login_url();

        assert!(login.url.starts_with("https://login.example.com/auth?"));
        assert_eq!(query(&login.url)["state"], login.state);
    }

    #[tokio::test]
    async fn callback_checks_state_before_accepting_code() {
        let server = provider(None).await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .expect("discover");

        let wrong = auth.check_callback_request(
            &Method::GET,
            &callback(Some("abc"), Some("wrong")),
            Some("expected"),
        );
        let absent =
            auth.check_callback_request(&Method::GET, &callback(Some("abc"), None), Some("expected"));
        let unsolicited =
            auth.check_callback_request(&Method::GET, &callback(Some("abc"), Some("x")), None);
        let ok = auth.check_callback_request(
            &Method::GET,
            &callback(Some("abc"), Some("expected")),
            Some("expected"),
        );

        assert!(matches!(wrong, Err(CallbackError::StateMismatch { .. })));
        assert!(matches!(absent, Err(CallbackError::StateMismatch { received: None })));
        assert_eq!(unsolicited, Err(CallbackError::NoPendingLogin));
        assert_eq!(ok, Ok("abc".to_string()));
    }

    #[tokio::test]
    async fn callback_rejects_method_errors_and_missing_code() {
        let server = provider(None).await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .expect("discover");
        let denied = CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("user said no".to_string()),
            ..CallbackParams::default()
        };

        let post =
            auth.check_callback_request(&Method::POST, &callback(Some("abc"), Some("s")), Some("s"));
        let provider_error = auth.check_callback_request(&Method::GET, &denied, Some("s"));
        let no_code =
            auth.check_callback_request(&Method::GET, &callback(Some(""), Some("s")), Some("s"));

        assert!(matches!(post, Err(CallbackError::MethodNotAllowed { .. })));
        assert_eq!(
            provider_error.map_err(|e| e.to_string()),
            Err("access_denied: user said no".to_string())
        );
        assert_eq!(no_code, Err(CallbackError::MissingCode));
    }

    #[tokio::test]
    async fn refused_code_is_a_token_exchange_error() {
        let server = provider(None).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;
        let auth = OidcAuthenticator::discover(config(&server, &["profile"]))
            .await
            .expect("discover");

        let err = auth
            .handle_callback_request("stale-code", "nonce")
            .await
            .err()
            .expect("exchange fails");

        assert!(err.to_string().contains("failed to get token"));
    }

    #[test]
    fn login_origin_must_not_carry_a_path() {
        assert_eq!(
            parse_login_origin("https://login.example.com:8443").expect("origin"),
            "https://login.example.com:8443"
        );
        assert!(parse_login_origin("https://login.example.com/dex").is_err());
        assert!(parse_login_origin("ftp://login.example.com").is_err());
        assert!(parse_login_origin("login.example.com").is_err());
    }

    #[test]
    fn claims_payload_is_decoded_from_the_middle_segment() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"name":"alice","groups":["ops"]}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.c2ln");

        let raw = decode_claims_payload(&token).expect("payload");

        assert_eq!(raw, r#"{"name":"alice","groups":["ops"]}"#);
        assert!(decode_claims_payload("only.two").is_err());
        assert!(decode_claims_payload("a.!!!.c").is_err());
    }

    #[test]
    fn scope_negotiation() {
        let configured = vec!["profile".to_string()];

        assert_eq!(negotiate_offline_access(&configured, &[]), Ok(true));
        assert_eq!(
            negotiate_offline_access(
                &configured,
                &["profile".to_string(), OFFLINE_ACCESS_SCOPE.to_string()]
            ),
            Ok(true)
        );
        assert_eq!(
            negotiate_offline_access(&configured, &["profile".to_string()]),
            Ok(false)
        );
        assert!(negotiate_offline_access(&configured, &["email".to_string()]).is_err());
    }
}
