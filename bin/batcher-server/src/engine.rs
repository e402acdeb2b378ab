//! [`ExecutionEngine`] backed by a prompt server's HTTP API.
//!
//! A job is queued with `POST {base}/prompt` and its outcome is read by
//! polling `GET {base}/history/{prompt_id}` until the entry reports
//! `status.completed` or a `status_str` of `"error"`.

use std::time::Duration;

use batcher_core::{EngineError, ExecutionEngine, JobDocument, SubmissionHandle, SubmissionOutcome};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    prompt_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    status: HistoryStatus,
}

#[derive(Debug, Clone)]
pub struct PromptEngine {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

const USER_AGENT: &str = concat!("batcher-server/", env!("CARGO_PKG_VERSION"));

impl PromptEngine {
    pub fn new(
        base_url: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            poll_interval,
            timeout,
        })
    }

    fn client_id() -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("batcher-{}", &uuid[..8])
    }

    /// One history lookup; `None` while the job is still queued or running.
    async fn poll_once(&self, prompt_id: &str) -> Result<Option<SubmissionOutcome>, reqwest::Error> {
        let url = format!("{}/history/{}", self.base_url, prompt_id);
        let history: serde_json::Map<String, Value> = self
            .http
            .get(&url)
            .timeout(POLL_REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(entry) = history.get(prompt_id) else {
            return Ok(None);
        };
        let status = HistoryEntry::deserialize(entry)
            .map(|e| e.status)
            .unwrap_or_default();

        if status.completed {
            return Ok(Some(SubmissionOutcome::Succeeded));
        }
        if status.status_str.as_deref() == Some("error") {
            let reason = execution_error(&status.messages)
                .unwrap_or_else(|| format!("engine reported an error for job {prompt_id}"));
            return Ok(Some(SubmissionOutcome::Failed { reason }));
        }
        Ok(None)
    }
}

/// Pull the exception text out of an `["execution_error", {...}]` message.
fn execution_error(messages: &[Value]) -> Option<String> {
    messages.iter().find_map(|m| {
        let pair = m.as_array()?;
        if pair.first()?.as_str()? != "execution_error" {
            return None;
        }
        let data = pair.get(1)?;
        let message = data.get("exception_message")?.as_str()?.trim();
        let node = data.get("node_id").and_then(Value::as_str);
        Some(match node {
            Some(node) => format!("node {node}: {message}"),
            None => message.to_owned(),
        })
    })
}

impl ExecutionEngine for PromptEngine {
    async fn submit(&self, job: &JobDocument) -> Result<SubmissionHandle, EngineError> {
        let url = format!("{}/prompt", self.base_url);
        let body = json!({
            "prompt": job.as_value(),
            "client_id": Self::client_id(),
        });

        let resp = self
            .http
            .post(&url)
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let queued: QueueResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("queue response: {e}")))?;
        match queued.prompt_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(SubmissionHandle(id)),
            None => Err(EngineError::Protocol("queue response has no prompt_id".to_owned())),
        }
    }

    async fn wait(&self, handle: &SubmissionHandle) -> Result<SubmissionOutcome, EngineError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.poll_once(handle.as_str()).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                // The engine may be busy or restarting; keep polling until the deadline.
                Err(e) => debug!(job_id = %handle, error = %e, "history poll failed"),
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(EngineError::Timeout {
                    job_id: handle.to_string(),
                    after: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;

    /// What the stub reports for a prompt after `ready_after` polls.
    #[derive(Clone, Copy)]
    enum Finish {
        Success,
        Error,
        Never,
    }

    struct Stub {
        finish: Finish,
        ready_after: usize,
        reject: bool,
        polls: AtomicUsize,
        received: Mutex<Vec<Value>>,
        user_agents: Mutex<Vec<String>>,
    }

    async fn queue(
        State(stub): State<Arc<Stub>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
            stub.user_agents.lock().unwrap().push(agent.to_owned());
        }
        stub.received.lock().unwrap().push(body);
        if stub.reject {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "prompt has no outputs" })),
            );
        }
        (StatusCode::OK, Json(json!({ "prompt_id": "p-1", "number": 0 })))
    }

    async fn history(State(stub): State<Arc<Stub>>, Path(id): Path<String>) -> Json<Value> {
        let n = stub.polls.fetch_add(1, Ordering::SeqCst);
        if n < stub.ready_after {
            return Json(json!({}));
        }
        let status = match stub.finish {
            Finish::Success => json!({ "completed": true, "status_str": "success", "messages": [] }),
            Finish::Error => json!({
                "completed": false,
                "status_str": "error",
                "messages": [
                    ["execution_start", { "prompt_id": id.clone() }],
                    ["execution_error", { "node_id": "3", "exception_message": "CUDA out of memory\n" }]
                ]
            }),
            Finish::Never => json!({ "completed": false, "status_str": null }),
        };
        let mut body = serde_json::Map::new();
        body.insert(id, json!({ "status": status, "outputs": {} }));
        Json(Value::Object(body))
    }

    async fn serve(stub: Stub) -> (String, Arc<Stub>) {
        let stub = Arc::new(stub);
        let app = Router::new()
            .route("/prompt", post(queue))
            .route("/history/{id}", get(history))
            .with_state(Arc::clone(&stub));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), stub)
    }

    fn stub(finish: Finish, ready_after: usize) -> Stub {
        Stub {
            finish,
            ready_after,
            reject: false,
            polls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            user_agents: Mutex::new(Vec::new()),
        }
    }

    fn engine(base: &str, timeout: Duration) -> PromptEngine {
        PromptEngine::new(base, Duration::from_millis(10), timeout).unwrap()
    }

    fn job() -> JobDocument {
        JobDocument::new(json!({ "3": { "inputs": { "seed": 7 } } }))
    }

    #[tokio::test]
    async fn submit_posts_prompt_with_client_id() {
        let (base, stub) = serve(stub(Finish::Success, 0)).await;
        let handle = engine(&base, Duration::from_secs(5)).submit(&job()).await.unwrap();
        assert_eq!(handle.as_str(), "p-1");

        let received = stub.received.lock().unwrap();
        assert_eq!(received[0]["prompt"], json!({ "3": { "inputs": { "seed": 7 } } }));
        let client_id = received[0]["client_id"].as_str().unwrap();
        assert!(client_id.starts_with("batcher-"));
        assert_eq!(client_id.len(), "batcher-".len() + 8);

        assert_eq!(*stub.user_agents.lock().unwrap(), vec![USER_AGENT.to_owned()]);
    }

    #[tokio::test]
    async fn wait_polls_until_completed() {
        let (base, stub) = serve(stub(Finish::Success, 3)).await;
        let engine = engine(&base, Duration::from_secs(5));
        let handle = engine.submit(&job()).await.unwrap();

        assert_eq!(engine.wait(&handle).await.unwrap(), SubmissionOutcome::Succeeded);
        assert_eq!(stub.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn error_status_fails_with_exception_message() {
        let (base, _stub) = serve(stub(Finish::Error, 0)).await;
        let engine = engine(&base, Duration::from_secs(5));
        let handle = engine.submit(&job()).await.unwrap();

        match engine.wait(&handle).await.unwrap() {
            SubmissionOutcome::Failed { reason } => assert_eq!(reason, "node 3: CUDA out of memory"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_gives_up_after_timeout() {
        let (base, _stub) = serve(stub(Finish::Never, 0)).await;
        let engine = engine(&base, Duration::from_millis(100));
        let handle = engine.submit(&job()).await.unwrap();

        let err = engine.wait(&handle).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn rejected_prompt_is_an_error() {
        let mut s = stub(Finish::Success, 0);
        s.reject = true;
        let (base, _stub) = serve(s).await;

        let err = engine(&base, Duration::from_secs(5)).submit(&job()).await.unwrap_err();
        match err {
            EngineError::Rejected(msg) => assert!(msg.contains("HTTP 400"), "got {msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_engine_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = engine(&format!("http://{addr}"), Duration::from_secs(1))
            .submit(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)), "got {err:?}");
    }

    #[test]
    fn execution_error_without_node() {
        let messages = vec![json!(["execution_error", { "exception_message": "boom" }])];
        assert_eq!(execution_error(&messages).as_deref(), Some("boom"));
        assert_eq!(execution_error(&[json!(["execution_cached", {}])]), None);
    }
}
