//! Inbound webhook endpoints (spec.md §4.10): verify, authorize, and
//! dispatch an external trigger into a launched task.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::TaskLauncher;
use crate::storage::{SharedDatabase, WebhookStore};
use crate::types::automation::AutomationStatus;

const MAX_PAYLOAD_CHARS: usize = 5000;
const MAX_HEADERS_CHARS: usize = 1000;

/// Response shape `handle` returns; mirrors what an HTTP layer would turn
/// directly into a status code + body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub success: bool,
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self { success: true, status: 200, body: "accepted".to_string() }
    }

    fn fail(status: u16, body: impl Into<String>) -> Self {
        Self { success: false, status, body: body.into() }
    }
}

pub struct WebhookHandler {
    store: SharedDatabase,
    launcher: Arc<dyn TaskLauncher>,
}

impl WebhookHandler {
    pub fn new(store: SharedDatabase, launcher: Arc<dyn TaskLauncher>) -> Self {
        Self { store, launcher }
    }

    pub async fn handle(
        &self,
        webhook_id: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
        source_ip: Option<&str>,
    ) -> WebhookResponse {
        let store = WebhookStore::new(&self.store);
        let endpoint = match store.get(webhook_id) {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return WebhookResponse::fail(404, "unknown webhook"),
            Err(e) => return WebhookResponse::fail(500, e.to_string()),
        };

        if endpoint.status != AutomationStatus::Active {
            return WebhookResponse::fail(403, "webhook is not active");
        }

        if let Some(secret) = &endpoint.secret {
            let signature = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("x-signature-256") || k.eq_ignore_ascii_case("x-hub-signature-256"))
                .map(|(_, v)| v.as_str());
            let valid = signature.map(|sig| verify_signature(payload, sig, secret)).unwrap_or(false);
            if !valid {
                return WebhookResponse::fail(401, "invalid signature");
            }
        }

        if !endpoint.allowed_sources.is_empty() {
            let allowed = source_ip
                .map(|ip| endpoint.allowed_sources.iter().any(|a| a == ip))
                .unwrap_or(false);
            if !allowed {
                return WebhookResponse::fail(403, "source not allowed");
            }
        }

        let goal = build_goal(&endpoint.goal_template, payload, headers);

        let mut updated = endpoint.clone();
        updated.trigger_count += 1;
        if let Err(e) = store.upsert(&updated) {
            tracing::warn!(webhook_id = %webhook_id, error = %e, "webhook: failed to persist trigger count");
        }

        let source = format!("webhook:{}", endpoint.name);
        match self
            .launcher
            .launch(&endpoint.workspace_id, &endpoint.user_id, &goal, &source)
            .await
        {
            Ok(()) => WebhookResponse::ok(),
            Err(e) => WebhookResponse::fail(500, e.to_string()),
        }
    }
}

/// Substitutes `{payload}`/`{headers}` in the goal template with the
/// request body and headers, each rendered as JSON and truncated so a
/// huge payload can't blow out the resulting goal string.
fn build_goal(template: &str, payload: &[u8], headers: &HashMap<String, String>) -> String {
    let payload_str = String::from_utf8_lossy(payload);
    let payload_json = serde_json::from_str::<serde_json::Value>(&payload_str)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| payload_str.to_string());
    let headers_json = serde_json::to_string(headers).unwrap_or_default();

    template
        .replace("{payload}", &truncate(&payload_json, MAX_PAYLOAD_CHARS))
        .replace("{headers}", &truncate(&headers_json, MAX_HEADERS_CHARS))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// HMAC-SHA256 verification of `signature` (optionally prefixed
/// `"sha256="`) against `payload`, constant-time compared to resist
/// timing attacks.
fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let expected = hex_encode(&mac.finalize().into_bytes());

    constant_time_eq(sig.as_bytes(), expected.as_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::automation::WebhookEndpoint;
    use std::sync::Mutex;

    struct RecordingLauncher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TaskLauncher for RecordingLauncher {
        async fn launch(&self, _workspace_id: &str, _user_id: &str, goal: &str, _source: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(goal.to_string());
            Ok(())
        }
    }

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex_encode(&mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn unknown_webhook_returns_404() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let handler = WebhookHandler::new(db, Arc::new(RecordingLauncher { calls: Mutex::new(Vec::new()) }));
        let resp = handler.handle("missing", b"{}", &HashMap::new(), None).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn invalid_signature_returns_401() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut endpoint = WebhookEndpoint::new("w1", "u1", "ci", "desc", "run {payload}");
        endpoint.secret = Some("sekret".to_string());
        crate::storage::WebhookStore::new(&db).upsert(&endpoint).unwrap();

        let handler = WebhookHandler::new(db, Arc::new(RecordingLauncher { calls: Mutex::new(Vec::new()) }));
        let mut headers = HashMap::new();
        headers.insert("x-signature-256".to_string(), "sha256=deadbeef".to_string());
        let resp = handler.handle(&endpoint.id, b"{\"a\":1}", &headers, None).await;
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn valid_signature_launches_task_with_rendered_goal() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut endpoint = WebhookEndpoint::new("w1", "u1", "ci", "desc", "handle payload {payload}");
        endpoint.secret = Some("sekret".to_string());
        crate::storage::WebhookStore::new(&db).upsert(&endpoint).unwrap();

        let launcher = Arc::new(RecordingLauncher { calls: Mutex::new(Vec::new()) });
        let handler = WebhookHandler::new(db, launcher.clone());

        let payload = b"{\"a\":1}";
        let mut headers = HashMap::new();
        headers.insert("x-signature-256".to_string(), sign("sekret", payload));
        let resp = handler.handle(&endpoint.id, payload, &headers, None).await;

        assert!(resp.success);
        assert_eq!(launcher.calls.lock().unwrap().len(), 1);
        assert!(launcher.calls.lock().unwrap()[0].contains("\"a\":1"));
    }

    #[tokio::test]
    async fn ip_not_in_allowlist_returns_403() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut endpoint = WebhookEndpoint::new("w1", "u1", "ci", "desc", "run {payload}");
        endpoint.allowed_sources = vec!["10.0.0.1".to_string()];
        crate::storage::WebhookStore::new(&db).upsert(&endpoint).unwrap();

        let handler = WebhookHandler::new(db, Arc::new(RecordingLauncher { calls: Mutex::new(Vec::new()) }));
        let resp = handler.handle(&endpoint.id, b"{}", &HashMap::new(), Some("10.0.0.2")).await;
        assert_eq!(resp.status, 403);
    }
}
