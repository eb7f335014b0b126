use crate::gateways::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        self.execute(|| {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }
            request
        })
        .await
    }

    /// Same retry behaviour, form-encoded body. Stripe's API only accepts
    /// application/x-www-form-urlencoded.
    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        form: &[(&str, String)],
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        self.execute(|| {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            request.form(form)
        })
        .await
    }

    async fn execute<T, F>(&self, build_request: F) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let response = build_request()
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::ApiError {
                                gateway: "http".to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                gateway_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::ApiError {
                        gateway: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        gateway_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_hex(payload, secret);
    if computed.is_empty() {
        return false;
    }
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Split a `k=v,k=v` signature header into pairs
pub fn parse_signature_pairs(header: &str) -> Vec<(&str, &str)> {
    header
        .split(',')
        .filter_map(|part| {
            let mut it = part.splitn(2, '=');
            match (it.next(), it.next()) {
                (Some(k), Some(v)) => Some((k.trim(), v.trim())),
                _ => None,
            }
        })
        .collect()
}

/// Signed-header timestamps older or newer than the tolerance are
/// rejected to block replayed captures.
pub fn timestamp_within_tolerance(timestamp: i64, tolerance_secs: i64) -> bool {
    let now = chrono::Utc::now().timestamp();
    (now - timestamp).abs() <= tolerance_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_round_trips() {
        let payload = br#"{"id":"evt_1"}"#;
        let signature = hmac_sha256_hex(payload, "whsec_test");
        assert!(verify_hmac_sha256_hex(payload, "whsec_test", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "whsec_other", &signature));
    }

    #[test]
    fn hmac_verification_detects_invalid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
    }

    #[test]
    fn signature_pairs_parse() {
        let pairs = parse_signature_pairs("t=1712000000,v1=abcdef, v1=012345");
        assert_eq!(pairs[0], ("t", "1712000000"));
        assert_eq!(pairs[1], ("v1", "abcdef"));
        assert_eq!(pairs[2], ("v1", "012345"));
        assert!(parse_signature_pairs("garbage").is_empty());
    }

    #[test]
    fn stale_timestamps_are_rejected() {
        let now = chrono::Utc::now().timestamp();
        assert!(timestamp_within_tolerance(now - 10, 300));
        assert!(!timestamp_within_tolerance(now - 301, 300));
        assert!(!timestamp_within_tolerance(now + 301, 300));
    }
}
