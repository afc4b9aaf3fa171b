//! HTML pages served by the gateway itself.
//!
//! Rendering failures are logged and answered with a 500; they never affect
//! session state.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use minijinja::{Environment, context};
use portcullis_identity::TokenData;
use tracing::error;

const BASE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{% block title %}portcullis{% endblock %}</title>
    <style>
      body { font-family: sans-serif; margin: 2em; }
      pre { white-space: pre-wrap; word-wrap: break-word; background: #f4f4f4; padding: 0.5em; }
    </style>
  </head>
  <body>
    {% block body %}{% endblock %}
  </body>
</html>
"#;

const TOKEN: &str = r#"{% extends "base.html" %}
{% block title %}Logged in{% endblock %}
{% block body %}
<p>ID Token:</p><pre><code>{{ id_token }}</code></pre>
<p>Access Token:</p><pre><code>{{ access_token }}</code></pre>
<p>Claims:</p><pre><code>{{ claims }}</code></pre>
{% if refresh_token %}
<p>Refresh Token:</p><pre><code>{{ refresh_token }}</code></pre>
{% endif %}
<p><a href="{{ landing_url }}">Continue</a></p>
{% endblock %}
"#;

const INFO: &str = r#"{% extends "base.html" %}
{% block title %}Session{% endblock %}
{% block body %}
<p>Access Token:</p><pre><code>{{ access_token }}</code></pre>
<p>Claims:</p><pre><code>{{ claims }}</code></pre>
{% endblock %}
"#;

const LOGOUT: &str = r#"{% extends "base.html" %}
{% block title %}Logged out{% endblock %}
{% block body %}
<p>You are now logged out.</p>
<p><a href="{{ landing_url }}">Re-enter</a></p>
{% endblock %}
"#;

const UNALLOWED: &str = r#"{% extends "base.html" %}
{% block title %}Not allowed{% endblock %}
{% block body %}
<h2>Not allowed</h2>
<p>You are not allowed to access this resource.</p>
<p>Refer to your system administrator.</p>
<p><a href="{{ landing_url }}">Try again</a></p>
{% endblock %}
"#;

/// Compiled page templates.
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    /// Compiles the templates.
    ///
    /// # Errors
    ///
    /// Fails if a template does not parse.
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("base.html", BASE)?;
        env.add_template("token.html", TOKEN)?;
        env.add_template("info.html", INFO)?;
        env.add_template("logout.html", LOGOUT)?;
        env.add_template("unallowed.html", UNALLOWED)?;
        Ok(Self { env })
    }

    /// Shown after login when token display is enabled.
    pub fn token(&self, token: &TokenData, landing_url: &str) -> Response {
        self.render(
            "token.html",
            context! {
                id_token => token.id_token,
                access_token => token.access_token,
                refresh_token => token.refresh_token,
                claims => pretty_json(&token.raw_claims),
                landing_url => landing_url,
            },
        )
    }

    /// What the current session holds.
    pub fn info(&self, access_token: &str, claims: &str) -> Response {
        self.render(
            "info.html",
            context! {
                access_token => access_token,
                claims => pretty_json(claims),
            },
        )
    }

    pub fn logout(&self, landing_url: &str) -> Response {
        self.render("logout.html", context! { landing_url => landing_url })
    }

    pub fn unallowed(&self, landing_url: &str) -> Response {
        self.render("unallowed.html", context! { landing_url => landing_url })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Response {
        match self.env.get_template(name).and_then(|t| t.render(ctx)) {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                error!(template = name, error = %e, "Error rendering page");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error rendering page").into_response()
            }
        }
    }
}

/// Indents JSON for display, leaving anything else untouched.
fn pretty_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::Claims;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[test]
    fn templates_compile() {
        assert!(Pages::new().is_ok());
    }

    #[test]
    fn pretty_json_indents_objects() {
        assert_eq!(pretty_json(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(pretty_json("not json"), "not json");
    }

    #[tokio::test]
    async fn token_page_shows_tokens_and_landing_link() {
        let pages = Pages::new().expect("pages");
        let token = TokenData {
            id_token: "id.token.sig".to_string(),
            access_token: "access-123".to_string(),
            refresh_token: None,
            redirect_url: "https://gate.example.com/_auth/callback".to_string(),
            raw_claims: r#"{"name":"alice"}"#.to_string(),
            claims: Claims::default().with_name("alice"),
        };

        let response = pages.token(&token, "/reports");

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("access-123"));
        assert!(html.contains("reports"));
        assert!(html.contains("Continue"));
        assert!(!html.contains("Refresh Token"));
    }

    #[tokio::test]
    async fn values_are_escaped() {
        let pages = Pages::new().expect("pages");

        let html = body_text(pages.logout("/\"><script>x</script>")).await;

        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn unallowed_page_offers_a_retry() {
        let pages = Pages::new().expect("pages");

        let html = body_text(pages.unallowed("/dashboard")).await;

        assert!(html.contains("not allowed"));
        assert!(html.contains("dashboard"));
        assert!(html.contains("Try again"));
    }
}
