//! HTTP client used for every call to the identity provider.

use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use portcullis_core::Result;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::OidcError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider-facing HTTP client.
///
/// Redirects are never followed (the OAuth2 endpoints must answer
/// directly). Optionally trusts only the certificates of a PEM bundle, and
/// optionally logs every exchange at debug level.
#[derive(Debug, Clone)]
pub struct ProviderHttpClient {
    inner: reqwest::Client,
    debug: bool,
}

impl ProviderHttpClient {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] if the CA bundle cannot be read,
    /// holds no certificate, or the TLS stack rejects it.
    pub fn new(root_ca_file: Option<&Path>, debug: bool) -> Result<Self, OidcError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        if let Some(path) = root_ca_file {
            let pem = std::fs::read(path).map_err(|e| OidcError::Configuration {
                details: format!("failed to read root CA file {}: {e}", path.display()),
            })?;
            let certificates =
                reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                    OidcError::Configuration {
                        details: format!("invalid root CA file {}: {e}", path.display()),
                    }
                })?;
            if certificates.is_empty() {
                return Err(OidcError::Configuration {
                    details: format!("no certs found in root CA file {}", path.display()),
                }
                .into());
            }
            debug!(file = %path.display(), count = certificates.len(), "Loaded root CA bundle");
            builder = builder.tls_built_in_root_certs(false);
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        let inner = builder.build().map_err(|e| OidcError::Configuration {
            details: format!("failed to create HTTP client: {e}"),
        })?;
        Ok(Self { inner, debug })
    }
}

impl<'c> AsyncHttpClient<'c> for ProviderHttpClient {
    type Error = HttpClientError<reqwest::Error>;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<HttpResponse, Self::Error>> + Send + Sync + 'c>>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        let traced = self.debug;
        if traced {
            debug!(
                method = %request.method(),
                uri = %request.uri(),
                body = %String::from_utf8_lossy(request.body()),
                "OIDC request"
            );
        }
        let pending = self.inner.call(request);
        Box::pin(async move {
            let result = pending.await;
            if traced {
                match &result {
                    Ok(response) => debug!(
                        status = %response.status(),
                        body = %String::from_utf8_lossy(response.body()),
                        "OIDC response"
                    ),
                    Err(e) => debug!(error = %e, "OIDC request failed"),
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::http;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn missing_ca_file_is_a_configuration_error() {
        let err = ProviderHttpClient::new(Some(Path::new("/nonexistent/ca.pem")), false)
            .expect_err("missing file");

        assert!(err.to_string().contains("failed to read root CA file"));
    }

    #[test]
    fn ca_file_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "this is not a certificate").expect("write");

        let err = ProviderHttpClient::new(Some(file.path()), false).expect_err("no certs");

        assert!(err.to_string().contains("root CA file"));
    }

    #[tokio::test]
    async fn forwards_requests_without_following_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
            .mount(&server)
            .await;
        let client = ProviderHttpClient::new(None, true).expect("client");

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(format!("{}/moved", server.uri()))
            .body(Vec::new())
            .expect("request");
        let response = client.call(request).await.expect("response");

        assert_eq!(response.status(), http::StatusCode::FOUND);
    }
}
