// ── Device domain types ──

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use grillwatch_api::{GasBuddyInfo, GrillInfo};

/// Display metadata for a grill. Replaced wholesale on resync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceMeta {
    pub nickname: String,
    pub firmware: Option<String>,
    pub gas: Option<GasBottle>,
}

/// Static gas-bottle info from the grill list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GasBottle {
    pub capacity_kg: Option<f64>,
    pub tare_weight_kg: Option<f64>,
    pub tank_installed_at: Option<DateTime<Utc>>,
    pub gas_consumed_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl From<GasBuddyInfo> for GasBottle {
    fn from(info: GasBuddyInfo) -> Self {
        Self {
            capacity_kg: info.gas_capacity,
            tare_weight_kg: info.tare_weight,
            tank_installed_at: info.tank_installed_date,
            gas_consumed_at: info.ts_gas_consumed,
            last_modified_at: info.ts_last_modified,
        }
    }
}

/// One grill known to the session.
///
/// The serial is fixed for the life of the process. Metadata and the
/// subscription token are swapped atomically so a running supervisor
/// always reads a consistent value without locking.
#[derive(Debug)]
pub struct Device {
    serial: String,
    meta: ArcSwap<DeviceMeta>,
    token: ArcSwap<SecretString>,
    /// `true` when the socket token is the session access token rather
    /// than a per-grill token, so it must follow session refreshes.
    uses_session_token: bool,
}

impl Device {
    pub fn new(serial: impl Into<String>, meta: DeviceMeta, token: SecretString) -> Self {
        Self {
            serial: serial.into(),
            meta: ArcSwap::from_pointee(meta),
            token: ArcSwap::from_pointee(token),
            uses_session_token: false,
        }
    }

    /// Build a device from a grill-list entry, falling back to the
    /// session access token when the API issues no per-grill token.
    pub fn from_grill(info: &GrillInfo, session_token: &SecretString) -> Self {
        let (token, uses_session_token) = match &info.subscription_token {
            Some(t) => (SecretString::from(t.clone()), false),
            None => (session_token.clone(), true),
        };
        Self {
            serial: info.serial_number.clone(),
            meta: ArcSwap::from_pointee(meta_from_grill(info)),
            token: ArcSwap::from_pointee(token),
            uses_session_token,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn meta(&self) -> Arc<DeviceMeta> {
        self.meta.load_full()
    }

    pub fn nickname(&self) -> String {
        self.meta.load().nickname.clone()
    }

    pub fn token(&self) -> Arc<SecretString> {
        self.token.load_full()
    }

    pub fn uses_session_token(&self) -> bool {
        self.uses_session_token
    }

    /// Replace the subscription token. The next connect attempt uses it.
    pub fn renew_token(&self, token: SecretString) {
        self.token.store(Arc::new(token));
    }

    /// Apply a fresh grill-list entry: metadata always, token when the
    /// entry carries its own.
    pub fn refresh_from(&self, info: &GrillInfo, session_token: &SecretString) {
        self.meta.store(Arc::new(meta_from_grill(info)));
        match &info.subscription_token {
            Some(t) => self.renew_token(SecretString::from(t.clone())),
            None if self.uses_session_token => self.renew_token(session_token.clone()),
            None => {}
        }
    }
}

fn meta_from_grill(info: &GrillInfo) -> DeviceMeta {
    DeviceMeta {
        nickname: info
            .nickname
            .clone()
            .unwrap_or_else(|| info.serial_number.clone()),
        firmware: info.firmware_semantic_version.clone(),
        gas: info.gasbuddy_info.clone().map(GasBottle::from),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn grill(json: serde_json::Value) -> GrillInfo {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn session_token_used_when_grill_has_none() {
        let session = SecretString::from("acc-1".to_owned());
        let device = Device::from_grill(&grill(serde_json::json!({"serialNumber": "G1"})), &session);

        assert!(device.uses_session_token());
        assert_eq!(device.token().expose_secret(), "acc-1");
        assert_eq!(device.nickname(), "G1");

        let renewed = SecretString::from("acc-2".to_owned());
        device.refresh_from(&grill(serde_json::json!({"serialNumber": "G1", "nickname": "Patio"})), &renewed);
        assert_eq!(device.token().expose_secret(), "acc-2");
        assert_eq!(device.nickname(), "Patio");
    }

    #[test]
    fn per_grill_token_survives_session_refresh() {
        let session = SecretString::from("acc-1".to_owned());
        let info = grill(serde_json::json!({"serialNumber": "G2", "socketToken": "sock-9"}));
        let device = Device::from_grill(&info, &session);

        assert!(!device.uses_session_token());
        assert_eq!(device.token().expose_secret(), "sock-9");

        let info = grill(serde_json::json!({"serialNumber": "G2"}));
        device.refresh_from(&info, &SecretString::from("acc-2".to_owned()));
        assert_eq!(device.token().expose_secret(), "sock-9");
    }
}
