//! Webhook flag sink.

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use jurybox_core::flags::{Flag, FlagSink};

use crate::error::NotifyError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Posts every newly raised flag as JSON to a fixed URL.
pub struct WebhookSink {
    url: String,
    token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
            timeout_secs,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    summary: String,
    flag: &'a Flag,
}

fn summarize(flag: &Flag) -> String {
    let mut summary = flag.kind.label().replace('_', " ");
    if let Some(task) = &flag.task_id {
        summary.push_str(&format!(" on task {task}"));
    }
    if !flag.evaluators.is_empty() {
        let names: Vec<&str> = flag.evaluators.iter().map(|e| e.as_str()).collect();
        summary.push_str(&format!(" ({})", names.join(", ")));
    }
    summary
}

#[async_trait]
impl FlagSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, flag), fields(flag = %flag.id, kind = flag.kind.label()))]
    async fn deliver(&self, flag: &Flag) -> anyhow::Result<()> {
        let body = WebhookPayload {
            event: "flag_raised",
            summary: summarize(flag),
            flag,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout(self.timeout_secs)
            } else {
                NotifyError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Unauthorized(body).into());
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, message }.into());
        }

        tracing::debug!(status, "flag delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use jurybox_core::engine::{EngineConfig, ReviewEngine};
    use jurybox_core::error::EngineError;
    use jurybox_core::flags::FlagKind;
    use jurybox_core::model::{
        Difficulty, Proficiency, TaskCategory, TaskId, TaskRequirement, TechRequirement,
    };
    use jurybox_core::store::MemoryStore;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unassignable_flag() -> Flag {
        Flag::new(FlagKind::Unassignable, Some(TaskId::new("t1")), vec![])
    }

    #[tokio::test]
    async fn posts_flag_with_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hooks/jurybox"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "event": "flag_raised",
                "summary": "unassignable on task t1",
                "flag": { "kind": { "kind": "unassignable" }, "task_id": "t1" }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(
            format!("{}/hooks/jurybox", server.uri()),
            Some("secret".into()),
            DEFAULT_TIMEOUT_SECS,
        )
        .unwrap();
        sink.deliver(&unassignable_flag()).await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), Some("wrong".into()), 5).unwrap();
        let err = sink.deliver(&unassignable_flag()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NotifyError>(),
            Some(NotifyError::Unauthorized(body)) if body == "bad token"
        ));
    }

    #[tokio::test]
    async fn server_errors_are_rejections() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), None, 5).unwrap();
        let err = sink.deliver(&unassignable_flag()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NotifyError>(),
            Some(NotifyError::Rejected { status: 503, .. })
        ));
    }

    #[test]
    fn debug_masks_token() {
        let sink = WebhookSink::new("http://localhost", Some("hunter2".into()), 5).unwrap();
        let debug = format!("{sink:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[tokio::test]
    async fn engine_mirrors_flags_and_survives_sink_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let task = TaskRequirement {
            id: TaskId::new("t1"),
            title: "Orphan".into(),
            difficulty: Difficulty::Easy,
            category: TaskCategory::Standard,
            language: TechRequirement::new("cobol", Proficiency::Proficient),
            framework: None,
            domain: TechRequirement::new("banking", Proficiency::Familiar),
        };
        let store = Arc::new(MemoryStore::with_roster(vec![], vec![task]));
        let sink = WebhookSink::new(server.uri(), None, 5).unwrap();
        let engine = ReviewEngine::new(store, EngineConfig::default()).with_sink(Arc::new(sink));

        let err = engine
            .request_assignment(&TaskId::new("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unassignable(_)));

        let flags = engine
            .list_flags(&jurybox_core::flags::FlagFilter::Open)
            .await;
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, FlagKind::Unassignable);
    }
}
