// Grill list endpoint

use secrecy::SecretString;
use tracing::debug;

use super::client::CloudClient;
use super::models::{GrillInfo, GrillListEnvelope};
use crate::error::Error;

const GRILLS_PATH: &str = "v2/grills";

impl CloudClient {
    /// List every grill registered to the account.
    ///
    /// A rejected bearer token maps to [`Error::TokenExpired`].
    pub async fn list_grills(&self, token: &SecretString) -> Result<Vec<GrillInfo>, Error> {
        let envelope: GrillListEnvelope = self.get_authed(GRILLS_PATH, token).await?;
        let grills = envelope.into_grills();
        debug!(count = grills.len(), "fetched grill list");
        Ok(grills)
    }
}
