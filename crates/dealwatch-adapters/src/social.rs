use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{EventType, Listing};
use dealwatch_storage::{HttpClient, HttpResponse};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    pub platform: String,
    pub success: bool,
    pub post_id: Option<String>,
    pub error: Option<String>,
}

impl PostResult {
    pub fn posted(platform: &str, post_id: Option<String>) -> Self {
        Self {
            platform: platform.to_string(),
            success: true,
            post_id,
            error: None,
        }
    }

    pub fn failed(platform: &str, error: impl Into<String>) -> Self {
        Self {
            platform: platform.to_string(),
            success: false,
            post_id: None,
            error: Some(error.into()),
        }
    }

    pub fn not_configured(platform: &str) -> Self {
        Self::failed(platform, "not configured")
    }
}

/// One public broadcast target. Implementations never panic or error out;
/// every outcome is a `PostResult`.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    fn name(&self) -> &str;

    fn is_configured(&self) -> bool;

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult;

    /// Digest post of several listings under `title`.
    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult;
}

#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, Arc<dyn SocialPlatform>>,
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.names())
            .finish()
    }
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn SocialPlatform>) {
        self.platforms.insert(platform.name().to_string(), platform);
    }

    pub fn with(mut self, platform: Arc<dyn SocialPlatform>) -> Self {
        self.register(platform);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SocialPlatform>> {
        self.platforms.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.platforms.keys().cloned().collect()
    }

    pub fn configured(&self) -> Vec<String> {
        self.platforms
            .iter()
            .filter(|(_, p)| p.is_configured())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Pull a human readable error out of a failed platform response.
pub(crate) fn error_detail(response: &HttpResponse) -> String {
    let parsed: Option<JsonValue> = response.json().ok();
    let detail = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("description"))
            .or_else(|| v.pointer("/errors/0/message"))
            .or_else(|| v.get("detail"))
            .or_else(|| v.get("message"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    });
    format!(
        "http {}: {}",
        response.status.as_u16(),
        detail.unwrap_or_else(|| response.text())
    )
}

/// Send a request and decode a JSON body, flattening every failure into text.
pub(crate) async fn call_json<F>(http: &HttpClient, target: &str, build: F) -> Result<JsonValue, String>
where
    F: Fn(&reqwest::Client) -> RequestBuilder,
{
    let response = http.execute(target, build).await.map_err(|e| e.to_string())?;
    if !response.is_success() {
        return Err(error_detail(&response));
    }
    response.json::<JsonValue>().map_err(|e| e.to_string())
}

pub(crate) fn id_at(value: &JsonValue, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(|v| match v {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    struct Dummy(&'static str, bool);

    #[async_trait]
    impl SocialPlatform for Dummy {
        fn name(&self) -> &str {
            self.0
        }

        fn is_configured(&self) -> bool {
            self.1
        }

        async fn post(&self, _listing: &Listing, _event: EventType) -> PostResult {
            PostResult::posted(self.0, None)
        }

        async fn post_batch(&self, _listings: &[Listing], _title: &str) -> PostResult {
            PostResult::posted(self.0, None)
        }
    }

    #[test]
    fn registry_is_keyed_by_name() {
        let registry = PlatformRegistry::new()
            .with(Arc::new(Dummy("telegram", true)))
            .with(Arc::new(Dummy("mastodon", false)));
        assert!(registry.get("telegram").is_some());
        assert!(registry.get("reddit").is_none());
        assert_eq!(registry.names(), vec!["mastodon".to_string(), "telegram".to_string()]);
        assert_eq!(registry.configured(), vec!["telegram".to_string()]);
    }

    #[test]
    fn not_configured_is_a_plain_failure() {
        let result = PostResult::not_configured("reddit");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("not configured"));
        assert_eq!(result.platform, "reddit");
    }

    #[test]
    fn error_detail_prefers_structured_messages() {
        let graph = HttpResponse {
            status: StatusCode::BAD_REQUEST,
            final_url: String::new(),
            body: serde_json::to_vec(&json!({"error": {"message": "Invalid token"}})).unwrap(),
        };
        assert_eq!(error_detail(&graph), "http 400: Invalid token");

        let telegram = HttpResponse {
            status: StatusCode::FORBIDDEN,
            final_url: String::new(),
            body: serde_json::to_vec(&json!({"ok": false, "description": "bot was kicked"})).unwrap(),
        };
        assert_eq!(error_detail(&telegram), "http 403: bot was kicked");

        let raw = HttpResponse {
            status: StatusCode::BAD_GATEWAY,
            final_url: String::new(),
            body: b"upstream down".to_vec(),
        };
        assert_eq!(error_detail(&raw), "http 502: upstream down");
    }

    #[test]
    fn ids_may_be_numbers_or_strings() {
        let value = json!({"result": {"message_id": 42}, "data": {"id": "abc"}});
        assert_eq!(id_at(&value, "/result/message_id"), Some("42".into()));
        assert_eq!(id_at(&value, "/data/id"), Some("abc".into()));
        assert_eq!(id_at(&value, "/missing"), None);
    }
}
