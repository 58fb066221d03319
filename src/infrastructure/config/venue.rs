//! Venue endpoint configuration.

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, Result};

/// Where and how to reach the venue.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// WebSocket endpoint, without the `app_id` query parameter.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Registered application id, appended as `?app_id=`.
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    /// Account currency used for proposals.
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_ws_url() -> String {
    "wss://ws.derivws.com/websockets/v3".into()
}

const fn default_app_id() -> u32 {
    1089
}

fn default_currency() -> String {
    "USD".into()
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            app_id: default_app_id(),
            currency: default_currency(),
        }
    }
}

impl VenueConfig {
    /// Full endpoint URL including the application id.
    ///
    /// # Errors
    ///
    /// Returns an error if `ws_url` is not a valid `ws://` or `wss://` URL.
    #[allow(clippy::result_large_err)]
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidValue {
                field: "ws_url",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }
        url.query_pairs_mut()
            .append_pair("app_id", &self.app_id.to_string());
        Ok(url)
    }
}
