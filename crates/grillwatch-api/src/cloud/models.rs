// Cloud API response types
//
// Shapes returned by the mobile REST API. Only the fields the rest of the
// workspace reads are typed; everything else lands in `extra` so nothing
// the API sends is silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of a successful `POST /login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Account profile returned alongside the login tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserInfo {
    /// Human-readable account title: `"First Last (nick)"` when a first
    /// name is known, otherwise the nickname, otherwise `fallback`.
    pub fn display_title(&self, fallback: &str) -> String {
        let nickname = self.nickname.as_deref().unwrap_or(fallback);
        match self.name.as_deref() {
            Some(first) if !first.is_empty() => {
                let surname = self.surname.as_deref().unwrap_or("");
                format!("{first} {surname} ({nickname})")
            }
            _ => nickname.to_owned(),
        }
    }
}

/// Body of a successful token refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(alias = "token")]
    pub access_token: String,
}

/// The grill list comes either wrapped in `{ "data": [...] }` or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum GrillListEnvelope {
    Wrapped { data: Vec<GrillInfo> },
    Bare(Vec<GrillInfo>),
}

impl GrillListEnvelope {
    pub(crate) fn into_grills(self) -> Vec<GrillInfo> {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// One grill registered to the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrillInfo {
    pub serial_number: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub firmware_semantic_version: Option<String>,
    /// Per-grill socket subscription token, when the API issues one.
    /// Absent means the session access token is used instead.
    #[serde(default, alias = "socketToken")]
    pub subscription_token: Option<String>,
    #[serde(default)]
    pub gasbuddy_info: Option<GasBuddyInfo>,
    /// All remaining fields the API sends.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Gas-bottle metadata attached to a grill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasBuddyInfo {
    /// Bottle capacity in kilograms.
    #[serde(default)]
    pub gas_capacity: Option<f64>,
    /// Empty-bottle weight in kilograms.
    #[serde(default)]
    pub tare_weight: Option<f64>,
    #[serde(default)]
    pub tank_installed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ts_gas_consumed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ts_last_modified: Option<DateTime<Utc>>,
}
