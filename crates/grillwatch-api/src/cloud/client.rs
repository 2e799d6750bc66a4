// Cloud REST client
//
// Wraps `reqwest::Client` with base-URL handling, bearer auth, and status
// classification. Endpoint groups (auth, grills) are implemented as
// inherent methods in sibling files to keep this module focused on
// transport mechanics.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Production base URL of the mobile API.
pub const DEFAULT_API_URL: &str = "https://mobile-api.ottowildeapp.com";

/// How a 401/403 should be interpreted for a given request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthContext {
    /// Credentials were sent in the body: rejection means bad credentials.
    Credentials,
    /// A bearer or refresh token was sent: rejection means it expired.
    Token,
}

/// Raw HTTP client for the cloud API.
///
/// Cheap to clone; the inner `reqwest::Client` shares its connection pool.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CloudClient {
    /// Create a client for `base_url` using the given transport settings.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    /// The API base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join a relative path (e.g. `"v2/grills"`) onto the base URL.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub(crate) async fn get_authed<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &SecretString,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        handle_response(resp, AuthContext::Token).await
    }

    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        context: AuthContext,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        handle_response(resp, context).await
    }
}

/// Ensure the base URL ends with `/` so relative joins append instead of
/// replacing the last path segment.
fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    Ok(url)
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(
    resp: reqwest::Response,
    context: AuthContext,
) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        return serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        });
    }

    let raw = resp.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(match context {
            AuthContext::Credentials => Error::InvalidCredentials {
                message: if raw.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {raw}")
                },
            },
            AuthContext::Token => Error::TokenExpired,
        });
    }

    Err(Error::Api {
        status: status.as_u16(),
        message: if raw.is_empty() {
            status.to_string()
        } else {
            raw.chars().take(200).collect()
        },
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = normalize_base_url("https://api.example.com/mobile").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/mobile/");
        assert_eq!(
            url.join("v2/grills").unwrap().as_str(),
            "https://api.example.com/mobile/v2/grills"
        );
    }

    #[test]
    fn base_url_rejects_garbage() {
        assert!(matches!(
            normalize_base_url("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }
}
