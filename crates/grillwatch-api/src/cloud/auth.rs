// Cloud API authentication
//
// Email/password login and token refresh. Login responses carry the
// access token used as bearer for REST calls and, by default, as the
// telemetry socket subscription token.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use super::client::{AuthContext, CloudClient};
use super::models::{LoginResponse, RefreshResponse, UserInfo};
use crate::auth::{AuthTokens, Credentials};
use crate::error::Error;

const LOGIN_PATH: &str = "login";
const REFRESH_PATH: &str = "refresh";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub tokens: AuthTokens,
    pub user: Option<UserInfo>,
}

impl CloudClient {
    /// Authenticate with email and password.
    ///
    /// A 401/403 maps to [`Error::InvalidCredentials`]; network failures
    /// surface as transport errors and classify as transient.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginSession, Error> {
        debug!(email = %credentials.email, "logging in");

        let body = json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
        });

        let resp: LoginResponse = self
            .post(LOGIN_PATH, &body, AuthContext::Credentials)
            .await?;

        debug!("login successful");
        Ok(LoginSession {
            tokens: AuthTokens {
                access_token: SecretString::from(resp.access_token),
                refresh_token: resp.refresh_token.map(SecretString::from),
            },
            user: resp.user,
        })
    }

    /// Exchange an expired access token for a fresh one.
    ///
    /// Sends the refresh token when one was issued, otherwise the access
    /// token itself. A rejection maps to [`Error::TokenExpired`].
    pub async fn refresh_token(&self, tokens: &AuthTokens) -> Result<SecretString, Error> {
        let presented = tokens
            .refresh_token
            .as_ref()
            .unwrap_or(&tokens.access_token);

        debug!("refreshing access token");

        let body = json!({ "refreshToken": presented.expose_secret() });
        let resp: RefreshResponse = self.post(REFRESH_PATH, &body, AuthContext::Token).await?;

        Ok(SecretString::from(resp.access_token))
    }
}
