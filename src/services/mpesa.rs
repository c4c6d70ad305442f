//! Daraja (M-Pesa) gateway client. The reconciler only ever asks one
//! question: what happened to this checkout request? Everything here is
//! shaped around giving that question a definitive or explicitly inconclusive
//! answer.

use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Why a gateway call produced no definitive answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Credentials missing. Fails the whole cycle loudly instead of burning
    /// retry budget on calls that can never succeed.
    NotConfigured(String),
    /// Timeout, transport failure, or an unreadable response. Consumes one
    /// retry attempt and leaves the payment pending.
    Transient(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::NotConfigured(detail) => write!(f, "gateway not configured: {detail}"),
            GatewayError::Transient(detail) => write!(f, "gateway unavailable: {detail}"),
        }
    }
}

/// Definitive answers from the transaction-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Completed { receipt: String },
    StillProcessing,
    Failed { reason: String },
}

/// Fetch an OAuth bearer token via the client-credentials grant.
pub async fn access_token(client: &Client, config: &AppConfig) -> Result<String, GatewayError> {
    let (key, secret) = match (&config.daraja_consumer_key, &config.daraja_consumer_secret) {
        (Some(key), Some(secret)) => (key, secret),
        _ => {
            return Err(GatewayError::NotConfigured(
                "DARAJA_CONSUMER_KEY / DARAJA_CONSUMER_SECRET are not set".to_string(),
            ))
        }
    };

    let response = client
        .get(format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            config.daraja_base_url
        ))
        .basic_auth(key, Some(secret))
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Daraja token request failed");
            GatewayError::Transient("Daraja token request failed".to_string())
        })?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_default();

    if !status.is_success() {
        return Err(GatewayError::Transient(format!(
            "Daraja token endpoint returned {status}"
        )));
    }

    body.get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            GatewayError::Transient("Daraja token response had no access_token".to_string())
        })
}

/// Query the status of an STK push by its checkout request id. `timeout` is
/// the per-call budget from the organization's billing settings.
pub async fn query_transaction_status(
    client: &Client,
    config: &AppConfig,
    checkout_request_id: &str,
    timeout: Duration,
) -> Result<TransactionStatus, GatewayError> {
    let (short_code, passkey) = match (&config.daraja_short_code, &config.daraja_passkey) {
        (Some(short_code), Some(passkey)) => (short_code, passkey),
        _ => {
            return Err(GatewayError::NotConfigured(
                "DARAJA_SHORT_CODE / DARAJA_PASSKEY are not set".to_string(),
            ))
        }
    };

    let token = access_token(client, config).await?;

    let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let password = base64::engine::general_purpose::STANDARD
        .encode(format!("{short_code}{passkey}{timestamp}"));

    let response = client
        .post(format!(
            "{}/mpesa/stkpushquery/v1/query",
            config.daraja_base_url
        ))
        .bearer_auth(token)
        .timeout(timeout)
        .json(&json!({
            "BusinessShortCode": short_code,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        }))
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, checkout_request_id, "Daraja status query failed");
            GatewayError::Transient("Daraja status query failed".to_string())
        })?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_default();
    parse_status_response(status, &body, checkout_request_id)
}

/// Connectivity probe used by the settings test endpoint: a token fetch is
/// the cheapest call that exercises credentials and reachability.
pub async fn connectivity_check(client: &Client, config: &AppConfig) -> Result<(), GatewayError> {
    access_token(client, config).await.map(|_| ())
}

/// Map a raw Daraja response onto a definitive or inconclusive outcome.
///
/// Daraja reports an in-flight transaction as an HTTP error with errorCode
/// 500.001.1001, so the body has to be inspected before the HTTP status.
fn parse_status_response(
    http_status: StatusCode,
    body: &Value,
    checkout_request_id: &str,
) -> Result<TransactionStatus, GatewayError> {
    if let Some(error_code) = body.get("errorCode").and_then(Value::as_str) {
        if error_code == "500.001.1001" {
            return Ok(TransactionStatus::StillProcessing);
        }
        let message = body
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or("unknown gateway error");
        return Err(GatewayError::Transient(format!(
            "Daraja error {error_code}: {message}"
        )));
    }

    if !http_status.is_success() {
        return Err(GatewayError::Transient(format!(
            "Daraja status query returned {http_status}"
        )));
    }

    // ResultCode arrives as a string on some gateway versions and a number
    // on others.
    let result_code = body
        .get("ResultCode")
        .and_then(|value| {
            value
                .as_str()
                .map(ToOwned::to_owned)
                .or_else(|| value.as_i64().map(|code| code.to_string()))
        })
        .unwrap_or_default();

    let result_desc = body
        .get("ResultDesc")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match result_code.as_str() {
        "0" => {
            let receipt = body
                .get("MpesaReceiptNumber")
                .and_then(Value::as_str)
                .filter(|receipt| !receipt.is_empty())
                .unwrap_or(checkout_request_id)
                .to_string();
            Ok(TransactionStatus::Completed { receipt })
        }
        // 1032: cancelled by user. 1037: user unreachable, request expired.
        // 1: insufficient balance. 2001: wrong PIN. All definitive failures.
        "1032" | "1037" | "1" | "2001" => Ok(TransactionStatus::Failed {
            reason: if result_desc.is_empty() {
                format!("gateway result code {result_code}")
            } else {
                result_desc
            },
        }),
        "" => Err(GatewayError::Transient(
            "Daraja response had no ResultCode".to_string(),
        )),
        other => {
            tracing::warn!(
                result_code = other,
                checkout_request_id,
                "Unrecognized Daraja result code; treating as still processing"
            );
            Ok(TransactionStatus::StillProcessing)
        }
    }
}

/// One parsed STK push callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkCallback {
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    pub receipt: Option<String>,
}

impl StkCallback {
    pub fn into_status(self) -> TransactionStatus {
        if self.result_code == 0 {
            let receipt = self
                .receipt
                .filter(|receipt| !receipt.is_empty())
                .unwrap_or(self.checkout_request_id);
            TransactionStatus::Completed { receipt }
        } else {
            TransactionStatus::Failed {
                reason: if self.result_desc.is_empty() {
                    format!("gateway result code {}", self.result_code)
                } else {
                    self.result_desc
                },
            }
        }
    }
}

/// Pull the interesting fields out of a Daraja STK callback body
/// (`Body.stkCallback`, receipt buried in `CallbackMetadata.Item`).
/// `None` means the payload is not an STK callback at all.
pub fn parse_stk_callback(body: &Value) -> Option<StkCallback> {
    let callback = body.get("Body")?.get("stkCallback")?;
    let checkout_request_id = callback
        .get("CheckoutRequestID")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())?
        .to_string();
    let result_code = callback.get("ResultCode").and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
    })?;
    let result_desc = callback
        .get("ResultDesc")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let receipt = callback
        .get("CallbackMetadata")
        .and_then(|metadata| metadata.get("Item"))
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find(|item| {
                item.get("Name").and_then(Value::as_str) == Some("MpesaReceiptNumber")
            })
        })
        .and_then(|item| item.get("Value"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    Some(StkCallback {
        checkout_request_id,
        result_code,
        result_desc,
        receipt,
    })
}

/// Verify a callback signature using HMAC-SHA256.
///
/// Parses the signature header (format: `t=<timestamp>,v1=<signature>`),
/// constructs the signed payload `<timestamp>.<body>`, computes HMAC-SHA256
/// with the webhook secret, and uses constant-time comparison.
/// Rejects signatures older than 5 minutes to prevent replay attacks.
pub fn verify_callback_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
) -> bool {
    const TOLERANCE_SECS: i64 = 300; // 5 minutes

    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signature = Some(v1);
        }
    }

    let (Some(ts_str), Some(expected_hex)) = (timestamp, signature) else {
        return false;
    };

    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };

    let now = Utc::now().timestamp();
    if (now - ts).abs() > TOLERANCE_SECS {
        tracing::warn!("Callback signature too old: delta={}s", (now - ts).abs());
        return false;
    }

    let signed_payload = format!("{ts_str}.{payload}");

    let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload.as_bytes());

    let Ok(expected_bytes) = hex_decode(expected_hex) else {
        return false;
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_with_explicit_receipt() {
        let body = json!({
            "ResultCode": "0",
            "ResultDesc": "The service request is processed successfully.",
            "MpesaReceiptNumber": "SBL4X7TQ9P",
        });
        let outcome = parse_status_response(StatusCode::OK, &body, "ws_CO_1").unwrap();
        assert_eq!(
            outcome,
            TransactionStatus::Completed {
                receipt: "SBL4X7TQ9P".to_string()
            }
        );
    }

    #[test]
    fn completed_falls_back_to_the_checkout_request_id() {
        let body = json!({ "ResultCode": 0, "ResultDesc": "Success" });
        let outcome = parse_status_response(StatusCode::OK, &body, "ws_CO_2").unwrap();
        assert_eq!(
            outcome,
            TransactionStatus::Completed {
                receipt: "ws_CO_2".to_string()
            }
        );
    }

    #[test]
    fn cancelled_by_user_is_a_definitive_failure() {
        let body = json!({
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user",
        });
        let outcome = parse_status_response(StatusCode::OK, &body, "ws_CO_3").unwrap();
        assert_eq!(
            outcome,
            TransactionStatus::Failed {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn in_flight_transaction_reports_still_processing_despite_http_500() {
        let body = json!({
            "errorCode": "500.001.1001",
            "errorMessage": "The transaction is being processed",
        });
        let outcome =
            parse_status_response(StatusCode::INTERNAL_SERVER_ERROR, &body, "ws_CO_4").unwrap();
        assert_eq!(outcome, TransactionStatus::StillProcessing);
    }

    #[test]
    fn other_gateway_errors_are_transient() {
        let body = json!({
            "errorCode": "404.001.04",
            "errorMessage": "Invalid CheckoutRequestID",
        });
        let err = parse_status_response(StatusCode::NOT_FOUND, &body, "ws_CO_5").unwrap_err();
        assert!(matches!(err, GatewayError::Transient(_)));
    }

    #[test]
    fn unknown_result_codes_stay_inconclusive() {
        let body = json!({ "ResultCode": "9999", "ResultDesc": "??" });
        let outcome = parse_status_response(StatusCode::OK, &body, "ws_CO_6").unwrap();
        assert_eq!(outcome, TransactionStatus::StillProcessing);
    }

    #[test]
    fn empty_body_is_transient() {
        let body = json!({});
        let err = parse_status_response(StatusCode::OK, &body, "ws_CO_7").unwrap_err();
        assert!(matches!(err, GatewayError::Transient(_)));
    }

    #[test]
    fn stk_callback_success_carries_the_receipt() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 45000.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "PhoneNumber", "Value": 254700000001u64 }
                        ]
                    }
                }
            }
        });
        let callback = parse_stk_callback(&body).unwrap();
        assert_eq!(callback.result_code, 0);
        assert_eq!(
            callback.into_status(),
            TransactionStatus::Completed {
                receipt: "NLJ7RT61SV".to_string()
            }
        );
    }

    #[test]
    fn stk_callback_failure_carries_the_reason() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_8",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let callback = parse_stk_callback(&body).unwrap();
        assert_eq!(
            callback.into_status(),
            TransactionStatus::Failed {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn non_callback_payloads_parse_to_none() {
        assert_eq!(parse_stk_callback(&json!({ "ping": true })), None);
        assert_eq!(parse_stk_callback(&json!({ "Body": {} })), None);
    }

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let digest = mac.finalize().into_bytes();
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        format!("t={timestamp},v1={hex}")
    }

    #[test]
    fn callback_signature_round_trips() {
        let payload = r#"{"Body":{"stkCallback":{}}}"#;
        let header = sign(payload, Utc::now().timestamp(), "whsec_test");
        assert!(verify_callback_signature(payload, &header, "whsec_test"));
    }

    #[test]
    fn tampered_payloads_fail_verification() {
        let header = sign("original", Utc::now().timestamp(), "whsec_test");
        assert!(!verify_callback_signature("tampered", &header, "whsec_test"));
        assert!(!verify_callback_signature("original", &header, "other_secret"));
    }

    #[test]
    fn stale_signatures_are_rejected() {
        let payload = "{}";
        let header = sign(payload, Utc::now().timestamp() - 3600, "whsec_test");
        assert!(!verify_callback_signature(payload, &header, "whsec_test"));
    }

    #[test]
    fn garbage_signature_headers_are_rejected() {
        assert!(!verify_callback_signature("{}", "", "whsec_test"));
        assert!(!verify_callback_signature("{}", "t=abc,v1=zz", "whsec_test"));
        assert!(!verify_callback_signature("{}", "v1=deadbeef", "whsec_test"));
    }
}
