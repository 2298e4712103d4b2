//! HTTP routes for the built pipelines.
//!
//! Each endpoint is `POST <path>` taking a [`TextRequest`]. Sync endpoints
//! reply with one [`AiMessage`]; stream endpoints reply with one JSON
//! `AiMessage` per line, ending with an error object if the run fails.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use nodeflow::errors::NodeflowError;
use nodeflow::pipeline::{
    BuildFailure, BuildFailureInfo, EndpointKind, PipelineExecutor, PipelineRegistry, StoreStream,
};
pub use nodeflow::pipeline::HEALTH_PATH;
use nodeflow::store::VariableStore;
use nodeflow::transport::{status_for, AiMessage, ErrorReply, TextRequest};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};

const NDJSON: &str = "application/x-ndjson";

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// Always `"ok"` once the server is up.
    pub status: &'static str,
    /// Built workflows.
    pub workflows: Vec<String>,
    /// Bound endpoints.
    pub endpoints: Vec<EndpointInfo>,
    /// Pipelines and bindings that failed to build.
    pub failures: Vec<BuildFailureInfo>,
}

/// One bound endpoint in [`Health`].
#[derive(Debug, Clone, Serialize)]
pub struct EndpointInfo {
    /// The route path.
    pub path: String,
    /// `sync` or `stream`.
    #[serde(rename = "type")]
    pub kind: EndpointKind,
    /// The serving workflow.
    pub workflow: String,
}

/// Builds the router serving every endpoint of `registry`.
pub fn router(registry: &PipelineRegistry) -> Router {
    let mut router = Router::new();
    let mut endpoints = Vec::new();

    for endpoint in registry.endpoints() {
        let executor = Arc::clone(&endpoint.executor);
        router = match endpoint.kind {
            EndpointKind::Sync => router.route(
                &endpoint.path,
                post(move |Json(request): Json<TextRequest>| sync_reply(Arc::clone(&executor), request)),
            ),
            EndpointKind::Stream => router.route(
                &endpoint.path,
                post(move |Json(request): Json<TextRequest>| stream_reply(Arc::clone(&executor), request)),
            ),
        };
        info!(path = %endpoint.path, kind = %endpoint.kind, "Serving endpoint");
        endpoints.push(EndpointInfo {
            path: endpoint.path.clone(),
            kind: endpoint.kind,
            workflow: endpoint.executor.workflow().to_string(),
        });
    }

    let health = Arc::new(Health {
        status: "ok",
        workflows: registry.workflows().into_iter().map(str::to_string).collect(),
        endpoints,
        failures: registry.failures().iter().map(BuildFailure::info).collect(),
    });
    router.route(
        HEALTH_PATH,
        get(move || {
            let body = health.as_ref().clone();
            async move { Json(body) }
        }),
    )
}

fn error_response(error: &NodeflowError) -> Response {
    let status = StatusCode::from_u16(status_for(error)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorReply::from(error))).into_response()
}

async fn sync_reply(executor: Arc<PipelineExecutor>, request: TextRequest) -> Response {
    match executor.run(request.into_seed()).await {
        Ok(store) => Json(AiMessage::from_store(store)).into_response(),
        Err(e) => {
            warn!(workflow = %executor.workflow(), error = %e, "Request failed");
            error_response(&e)
        }
    }
}

async fn stream_reply(executor: Arc<PipelineExecutor>, request: TextRequest) -> Response {
    let snapshots = match executor.run_stream(request.into_seed()) {
        Ok(snapshots) => snapshots,
        Err(e) => return error_response(&e),
    };

    let lines = NdjsonLines {
        executor,
        snapshots,
        last: None,
        done: false,
    };
    let body = Body::from_stream(stream::unfold(lines, NdjsonLines::next_line));
    ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
}

fn encode_line<T: Serialize>(value: &T) -> String {
    let mut line = serde_json::to_string(value).unwrap_or_else(|e| {
        format!(r#"{{"error":{{"code":"ENCODING","message":"{e}"}}}}"#)
    });
    line.push('\n');
    line
}

/// Turns store snapshots into response lines.
///
/// Session turns are recorded only once the snapshots run out. If the client
/// disconnects, the body is dropped first and nothing is recorded.
struct NdjsonLines {
    executor: Arc<PipelineExecutor>,
    snapshots: StoreStream,
    last: Option<VariableStore>,
    done: bool,
}

impl NdjsonLines {
    async fn next_line(mut self) -> Option<(Result<String, Infallible>, Self)> {
        if self.done {
            return None;
        }
        match self.snapshots.next().await {
            Some(Ok(store)) => {
                let line = encode_line(&AiMessage::partial(store.clone()));
                self.last = Some(store);
                Some((Ok(line), self))
            }
            Some(Err(e)) => {
                warn!(workflow = %self.executor.workflow(), error = %e, "Stream failed");
                self.done = true;
                Some((Ok(encode_line(&ErrorReply::from(&e))), self))
            }
            None => {
                if let Some(store) = self.last.take() {
                    self.executor.record_session(&store).await;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use nodeflow::backends::{InMemorySessionStore, SessionStore};
    use nodeflow::nodes::NodeFactory;
    use nodeflow::pipeline::{PipelineDefinition, RegistryResources};
    use nodeflow::testing::ScriptedModelBackend;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CHAT: &str = r#"
workflow: chat
components:
  - Start: {outputs: [input]}
  - LLM: {model_id: m, prompts: [{role: user, prompt: "{input}"}], outputs: [answer]}
  - End: {final_output: $answer}
endpoints:
  - {path: /chat, type: sync}
  - {path: /chat/stream, type: stream}
"#;

    const BROKEN: &str = "workflow: broken\ncomponents:\n  - Foo: {}\n";

    fn app(backend: ScriptedModelBackend, sessions: Arc<InMemorySessionStore>) -> Router {
        let factory = NodeFactory::new()
            .with_model_backend(Arc::new(backend))
            .with_session_store(sessions);
        let definitions = [CHAT, BROKEN].map(|yaml| PipelineDefinition::from_yaml_str(yaml).unwrap());
        router(&PipelineRegistry::build(definitions, &RegistryResources::new(factory)))
    }

    fn post_json(path: &str, body: &Value) -> Request<Body> {
        Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_endpoint_replies_and_records() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let app = app(ScriptedModelBackend::new().with_reply("hello"), sessions.clone());

        let request = json!({"input": "hi", "config": {}, "kwargs": {"session_id": "s-1"}});
        let response = app.oneshot(post_json("/chat", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["content"], json!("hello"));
        assert_eq!(body["type"], json!("ai"));
        assert_eq!(body["additional_kwargs"]["input"], json!("hi"));
        assert!(body.get("is_stream").is_none());
        assert_eq!(sessions.latest_n("s-1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_endpoint_emits_ndjson_then_records() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let app = app(ScriptedModelBackend::new().with_chunks(["a", "b", "c"]), sessions.clone());

        let request = json!({"input": "hi", "kwargs": {"session_id": "s-2"}});
        let response = app.oneshot(post_json("/chat/stream", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], NDJSON);

        let text = body_text(response).await;
        let messages: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let contents: Vec<&Value> = messages.iter().map(|m| &m["content"]).collect();
        assert_eq!(contents, vec![&json!("a"), &json!("b"), &json!("c")]);
        assert!(messages.iter().all(|m| m["is_stream"] == json!(true)));
        assert_eq!(messages[2]["additional_kwargs"]["answer"], json!("abc"));

        let turns = sessions.latest_n("s-2", 2).await.unwrap();
        assert_eq!(turns[1].content, "abc");
    }

    #[tokio::test]
    async fn test_stream_failure_ends_with_error_line() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let backend = ScriptedModelBackend::new()
            .with_chunks(["a", "b"])
            .fail_after(1, "reset");
        let app = app(backend, sessions.clone());

        let response = app
            .oneshot(post_json("/chat/stream", &json!({"input": "hi"})))
            .await
            .unwrap();
        let text = body_text(response).await;
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["content"], json!("a"));
        assert_eq!(lines[1]["error"]["code"], json!("BACKEND_INVOCATION"));
        assert_eq!(sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_bad_gateway() {
        let app = app(
            ScriptedModelBackend::new().failing("down"),
            Arc::new(InMemorySessionStore::new()),
        );
        let response = app.oneshot(post_json("/chat", &json!({"input": "hi"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], json!("BACKEND_INVOCATION"));
    }

    #[tokio::test]
    async fn test_health_lists_workflows_and_failures() {
        let app = app(ScriptedModelBackend::new(), Arc::new(InMemorySessionStore::new()));
        let response = app
            .oneshot(Request::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["workflows"], json!(["chat"]));
        assert_eq!(body["endpoints"].as_array().unwrap().len(), 2);
        assert_eq!(body["endpoints"][1]["type"], json!("stream"));
        assert_eq!(body["failures"][0]["workflow"], json!("broken"));
        assert_eq!(body["failures"][0]["error"]["code"], json!("UNKNOWN_NODE_TYPE"));
    }

    #[tokio::test]
    async fn test_bad_path_fails_only_its_binding() {
        let bad = "workflow: bad\ncomponents:\n  - Start: {outputs: [input]}\n  - End: {final_output: $input}\nendpoints:\n  - {path: \"/chat/:id\"}\n";
        let good = "workflow: good\ncomponents:\n  - Start: {outputs: [input]}\n  - End: {final_output: $input}\nendpoints:\n  - {path: /good}\n";
        let definitions = [bad, good].map(|yaml| PipelineDefinition::from_yaml_str(yaml).unwrap());
        let registry = PipelineRegistry::build(definitions, &RegistryResources::new(NodeFactory::new()));

        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].path.as_deref(), Some("/chat/:id"));

        let app = router(&registry);
        let response = app
            .clone()
            .oneshot(post_json("/good", &json!({"input": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["content"], json!("hi"));

        let health = app
            .oneshot(Request::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_text(health).await).unwrap();
        assert_eq!(body["failures"][0]["workflow"], json!("bad"));
        assert_eq!(body["failures"][0]["path"], json!("/chat/:id"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let app = app(ScriptedModelBackend::new(), Arc::new(InMemorySessionStore::new()));
        let response = app.oneshot(post_json("/missing", &json!({"input": "hi"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
