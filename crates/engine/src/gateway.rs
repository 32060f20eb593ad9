//! Xendit gateway client
//!
//! Thin HTTP wrapper over the payment-requests API. The engine calls it to
//! mint payment instruments (one-shot virtual accounts / QR strings and
//! reusable payment codes); settlement always arrives back through the
//! webhook path, never through these responses.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use roomledger_shared::{LedgerError, LedgerResult, CURRENCY};

/// Configuration for the payment gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret API key, sent as HTTP basic-auth username.
    pub api_key: String,
    /// Shared token expected in the `x-callback-token` webhook header.
    pub callback_token: String,
    /// API base, e.g. `https://api.xendit.co`.
    pub base_url: String,
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            api_key: std::env::var("XENDIT_API_KEY")
                .map_err(|_| LedgerError::Config("XENDIT_API_KEY not set".to_string()))?,
            callback_token: std::env::var("XENDIT_CALLBACK_TOKEN")
                .map_err(|_| LedgerError::Config("XENDIT_CALLBACK_TOKEN not set".to_string()))?,
            base_url: std::env::var("XENDIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.xendit.co".to_string()),
        })
    }
}

/// One action the payer must take to settle an instrument (VA number to
/// transfer to, QR string to scan, redirect URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentAction {
    #[serde(alias = "type")]
    pub descriptor: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelProperties {
    pub expires_at: Option<String>,
    pub payment_code: Option<String>,
}

/// Response to a payment-request creation call.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentResponse {
    #[serde(alias = "id")]
    pub payment_request_id: String,
    pub reference_id: Option<String>,
    pub channel_code: Option<String>,
    pub request_amount: Option<i64>,
    pub status: Option<String>,
    #[serde(default)]
    pub actions: Vec<InstrumentAction>,
    #[serde(default)]
    pub channel_properties: ChannelProperties,
}

impl InstrumentResponse {
    /// First usable action value: the VA number or QR string to present.
    pub fn primary_action_value(&self) -> Option<&str> {
        self.actions
            .iter()
            .filter_map(|a| a.value.as_deref())
            .next()
    }

    /// Instrument expiry parsed from channel properties, if the gateway
    /// reported one.
    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        parse_gateway_timestamp(self.channel_properties.expires_at.as_deref()?)
    }
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self::new(GatewayConfig::from_env()?))
    }

    /// Validates the `x-callback-token` header of an inbound webhook.
    pub fn verify_callback_token(&self, token: Option<&str>) -> LedgerResult<()> {
        match token {
            Some(t) if t == self.config.callback_token => Ok(()),
            _ => Err(LedgerError::InvalidInput(
                "invalid webhook callback token".to_string(),
            )),
        }
    }

    /// Creates a one-shot PAY instrument for `request_amount` whole currency
    /// units on the given channel.
    pub async fn create_instrument(
        &self,
        reference_id: &str,
        channel_code: &str,
        request_amount: i64,
        display_name: Option<&str>,
    ) -> LedgerResult<InstrumentResponse> {
        let body = json!({
            "reference_id": reference_id,
            "type": "PAY",
            "country": "ID",
            "currency": CURRENCY,
            "request_amount": request_amount,
            "channel_code": channel_code,
            "channel_properties": {
                "display_name": display_name.unwrap_or("ROOMLEDGER"),
            },
        });
        self.post_payment_request(&body, Uuid::new_v4()).await
    }

    /// Creates a REUSABLE_PAYMENT_CODE instrument bound to a customer; the
    /// code accepts repeated top-ups until it expires.
    pub async fn create_reusable_code(
        &self,
        reference_id: &str,
        channel_code: &str,
        display_name: Option<&str>,
        idem_key: Uuid,
    ) -> LedgerResult<InstrumentResponse> {
        let body = json!({
            "reference_id": reference_id,
            "type": "REUSABLE_PAYMENT_CODE",
            "country": "ID",
            "currency": CURRENCY,
            "channel_code": channel_code,
            "channel_properties": {
                "display_name": display_name.unwrap_or("ROOMLEDGER"),
            },
        });
        self.post_payment_request(&body, idem_key).await
    }

    async fn post_payment_request(
        &self,
        body: &serde_json::Value,
        idem_key: Uuid,
    ) -> LedgerResult<InstrumentResponse> {
        let url = format!("{}/v3/payment_requests", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.config.api_key, None::<&str>)
            .header("idempotency-key", idem_key.to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Gateway {
                status: 0,
                body: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<InstrumentResponse>()
            .await
            .map_err(|e| LedgerError::Gateway {
                status: status.as_u16(),
                body: format!("unparseable gateway response: {}", e),
            })
    }
}

/// Gateway timestamps arrive as RFC 3339 with offset, occasionally as a bare
/// naive datetime.
pub fn parse_gateway_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    raw.parse::<NaiveDateTime>().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn instrument_response_parses_actions_and_expiry() {
        let raw = json!({
            "payment_request_id": "pr-123",
            "reference_id": "REF1",
            "channel_code": "BCA",
            "request_amount": 3_100_000,
            "status": "PENDING",
            "actions": [
                {"type": "VIRTUAL_ACCOUNT_NUMBER", "value": "8808123456"}
            ],
            "channel_properties": {"expires_at": "2025-09-02T10:00:00+07:00"}
        });
        let resp: InstrumentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.payment_request_id, "pr-123");
        assert_eq!(resp.primary_action_value(), Some("8808123456"));
        assert_eq!(
            resp.expires_at().unwrap(),
            "2025-09-02T03:00:00".parse::<NaiveDateTime>().unwrap()
        );
    }

    #[test]
    fn instrument_response_tolerates_missing_optionals() {
        let raw = json!({"id": "pr-9"});
        let resp: InstrumentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.payment_request_id, "pr-9");
        assert!(resp.primary_action_value().is_none());
        assert!(resp.expires_at().is_none());
    }

    #[test]
    fn callback_token_must_match_exactly() {
        let client = GatewayClient::new(GatewayConfig {
            api_key: "k".into(),
            callback_token: "secret".into(),
            base_url: "http://localhost".into(),
        });
        assert!(client.verify_callback_token(Some("secret")).is_ok());
        assert!(client.verify_callback_token(Some("wrong")).is_err());
        assert!(client.verify_callback_token(None).is_err());
    }

    #[test]
    fn gateway_timestamps_accept_naive_fallback() {
        assert!(parse_gateway_timestamp("2025-09-02T10:00:00").is_some());
        assert!(parse_gateway_timestamp("not a time").is_none());
    }
}
