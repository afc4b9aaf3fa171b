//! OpenID Connect login flow for the portcullis gateway.
//!
//! [`OidcAuthenticator`] owns everything the gateway needs from the identity
//! provider:
//!
//! - provider discovery, performed once at startup through a
//!   [`ProviderHttpClient`] that can trust a private CA and trace traffic;
//! - negotiation of how refresh tokens are requested (`offline_access` as a
//!   scope, or the `access_type=offline` parameter);
//! - construction of authorization URLs with a fresh anti-forgery `state`
//!   and `nonce` per attempt;
//! - validation of the callback request and exchange of the authorization
//!   code for verified tokens and claims.
//!
//! Nothing here retries. A failed exchange fails the current login attempt
//! and the browser starts over on its next request.

pub mod authenticator;
pub mod config;
pub mod error;
pub mod http_client;

pub use authenticator::{
    CallbackParams, LoginRequest, OFFLINE_ACCESS_SCOPE, OidcAuthenticator, TokenData,
    parse_login_origin,
};
pub use config::{OidcConfig, OidcConfigBuilder};
pub use error::{CallbackError, OidcError};
pub use http_client::ProviderHttpClient;
