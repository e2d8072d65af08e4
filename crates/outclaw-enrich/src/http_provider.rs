//! Generic HTTP enrichment provider.
//!
//! Commercial enrichment APIs differ only in endpoint URL and auth header;
//! the request/response shape is normalized here. One struct covers them
//! all, configured per entry in `[enrich] providers`.

use async_trait::async_trait;
use outclaw_core::config::ProviderConfig;
use outclaw_core::error::{OutClawError, Result};
use outclaw_core::traits::EnrichProvider;
use outclaw_core::types::{LeadProfile, PartialIdentity, ProviderReply};
use serde_json::{Value, json};

/// Fallback cooldown when a 429 carries no Retry-After header.
const DEFAULT_COOLDOWN_MS: u64 = 60_000;

pub struct HttpProvider {
    name: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl EnrichProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enrich(&self, platform: &str, partial: &PartialIdentity) -> Result<ProviderReply> {
        let body = json!({
            "platform": platform,
            "partial": partial,
        });
        let req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        let resp = self.apply_auth(req).send().await.map_err(|e| {
            OutClawError::enrich(format!(
                "{} connection failed ({}): {e}",
                self.name, self.endpoint
            ))
        })?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let payload: Value = resp.json().await.unwrap_or(Value::Null);

        Ok(reply_from(status, retry_after, &payload))
    }
}

/// Map a normalized provider response to a reply.
///
/// 429 → rate-limited (Retry-After seconds, or a default). 404 → miss.
/// 2xx with a `delay_ms` field → rate-limited; with a `url` field → hit;
/// anything else → miss.
fn reply_from(status: u16, retry_after_secs: Option<u64>, payload: &Value) -> ProviderReply {
    if status == 429 {
        let delay_ms = retry_after_secs
            .map(|secs| secs * 1000)
            .unwrap_or(DEFAULT_COOLDOWN_MS);
        return ProviderReply::RateLimited { delay_ms };
    }
    if status == 404 {
        return ProviderReply::Miss;
    }
    if let Some(delay_ms) = payload.get("delay_ms").and_then(Value::as_u64) {
        return ProviderReply::RateLimited { delay_ms };
    }
    if let Some(url) = payload.get("url").and_then(Value::as_str) {
        return ProviderReply::Hit(LeadProfile {
            url: url.to_string(),
            name: payload
                .get("name")
                .and_then(Value::as_str)
                .map(String::from),
            headline: payload
                .get("headline")
                .and_then(Value::as_str)
                .map(String::from),
        });
    }
    ProviderReply::Miss
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_mapping() {
        assert!(matches!(
            reply_from(429, Some(30), &Value::Null),
            ProviderReply::RateLimited { delay_ms: 30_000 }
        ));
        assert!(matches!(
            reply_from(429, None, &Value::Null),
            ProviderReply::RateLimited {
                delay_ms: DEFAULT_COOLDOWN_MS
            }
        ));
        assert!(matches!(reply_from(404, None, &Value::Null), ProviderReply::Miss));
        assert!(matches!(
            reply_from(200, None, &json!({ "delay_ms": 5000 })),
            ProviderReply::RateLimited { delay_ms: 5000 }
        ));

        let hit = reply_from(
            200,
            None,
            &json!({ "url": "https://example.com/in/ada", "name": "Ada" }),
        );
        match hit {
            ProviderReply::Hit(profile) => {
                assert_eq!(profile.url, "https://example.com/in/ada");
                assert_eq!(profile.name.as_deref(), Some("Ada"));
                assert!(profile.headline.is_none());
            }
            other => panic!("expected hit, got {other:?}"),
        }

        assert!(matches!(
            reply_from(200, None, &json!({ "status": "pending" })),
            ProviderReply::Miss
        ));
    }
}
