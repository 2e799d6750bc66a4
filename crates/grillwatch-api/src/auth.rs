use secrecy::SecretString;

/// Account credentials for the cloud API.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
        }
    }
}

/// Tokens issued by a successful login.
///
/// The access token authorizes REST calls and doubles as the default
/// subscription token for the telemetry socket. The refresh token, when
/// the API hands one out, renews an expired access token without
/// re-sending the password.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}
