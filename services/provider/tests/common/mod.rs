#![allow(dead_code)]

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use grantline_model::PolicyDocument;
use provider::reconcile::{Reconciler, RetryPolicy};
use provider::store::memory::InMemoryStore;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
    }
}

pub async fn memory_with_policy(policy_id: &str) -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut document = PolicyDocument::new(format!("{policy_id}-name"));
    document.id = policy_id.to_string();
    store.seed(document).await;
    store
}

pub fn reconciler(store: &InMemoryStore, retry: RetryPolicy) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(Arc::new(store.clone()), retry))
}

#[derive(Default)]
struct RemoteState {
    policies: HashMap<String, (Value, u64)>,
    fail_next: VecDeque<StatusCode>,
    fail_puts: VecDeque<StatusCode>,
    next_id: u64,
    puts: usize,
    reorder_sets: bool,
}

type Shared = Arc<Mutex<RemoteState>>;

/// Policy service double: whole-document GET/PUT with `ETag` / `If-Match`.
pub struct FakeRemote {
    pub base_url: String,
    token: String,
    state: Shared,
}

impl FakeRemote {
    pub async fn spawn(token: &str) -> Self {
        let state: Shared = Arc::default();
        let expected = format!("Bearer {token}");
        let app = Router::new()
            .route("/v1/policies", axum::routing::post(create_policy))
            .route(
                "/v1/policies/{id}",
                get(fetch_policy).put(replace_policy).delete(delete_policy),
            )
            .layer(axum::middleware::from_fn(
                move |request: axum::extract::Request, next: axum::middleware::Next| {
                    let expected = expected.clone();
                    async move {
                        let authorized = request
                            .headers()
                            .get(header::AUTHORIZATION)
                            .and_then(|value| value.to_str().ok())
                            == Some(expected.as_str());
                        if !authorized {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        next.run(request).await
                    }
                },
            ))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake remote");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        Self {
            base_url: format!("http://{addr}/"),
            token: token.to_string(),
            state,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn seed(&self, policy_id: &str, mut document: Value) {
        document["id"] = Value::String(policy_id.to_string());
        let mut state = self.state.lock().expect("remote state");
        let revision = state
            .policies
            .get(policy_id)
            .map(|(_, revision)| revision + 1)
            .unwrap_or(1);
        state
            .policies
            .insert(policy_id.to_string(), (document, revision));
    }

    pub fn document(&self, policy_id: &str) -> Option<Value> {
        let state = self.state.lock().expect("remote state");
        state.policies.get(policy_id).map(|(document, _)| document.clone())
    }

    /// Answer the next request with `status` instead of handling it.
    pub fn fail_next(&self, status: StatusCode) {
        self.state
            .lock()
            .expect("remote state")
            .fail_next
            .push_back(status);
    }

    /// Answer the next PUT with `status`; other requests are handled normally.
    pub fn fail_next_put(&self, status: StatusCode) {
        self.state
            .lock()
            .expect("remote state")
            .fail_puts
            .push_back(status);
    }

    /// Return stored tags reversed, like a service that does not keep set order.
    pub fn reorder_sets(&self) {
        self.state.lock().expect("remote state").reorder_sets = true;
    }

    pub fn puts(&self) -> usize {
        self.state.lock().expect("remote state").puts
    }
}

fn injected(state: &mut RemoteState) -> Option<Response> {
    state
        .fail_next
        .pop_front()
        .map(|status| (status, "injected failure").into_response())
}

fn with_etag(status: StatusCode, revision: u64, document: Value) -> Response {
    (
        status,
        [(header::ETAG, etag(revision))],
        Json(document),
    )
        .into_response()
}

fn etag(revision: u64) -> String {
    format!("\"{revision}\"")
}

async fn fetch_policy(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().expect("remote state");
    if let Some(response) = injected(&mut state) {
        return response;
    }
    let reorder = state.reorder_sets;
    match state.policies.get(&id) {
        Some((document, revision)) => {
            let mut document = document.clone();
            if reorder {
                if let Some(Value::Array(tags)) = document.get_mut("tags") {
                    tags.reverse();
                }
            }
            with_etag(StatusCode::OK, *revision, document)
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn replace_policy(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(document): Json<Value>,
) -> Response {
    let mut state = state.lock().expect("remote state");
    state.puts += 1;
    if let Some(response) = injected(&mut state) {
        return response;
    }
    if let Some(status) = state.fail_puts.pop_front() {
        return (status, "injected failure").into_response();
    }
    let if_match = headers
        .get(header::IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let Some((stored, revision)) = state.policies.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if if_match.as_deref() != Some(etag(*revision).as_str()) {
        return (StatusCode::PRECONDITION_FAILED, "stale version").into_response();
    }
    if document.get("name").and_then(Value::as_str).is_none() {
        return (StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    *stored = document;
    stored["id"] = Value::String(id);
    *revision += 1;
    with_etag(StatusCode::OK, *revision, stored.clone())
}

async fn create_policy(State(state): State<Shared>, Json(mut document): Json<Value>) -> Response {
    let mut state = state.lock().expect("remote state");
    if let Some(response) = injected(&mut state) {
        return response;
    }
    state.next_id += 1;
    let id = format!("remote-{}", state.next_id);
    document["id"] = Value::String(id.clone());
    state.policies.insert(id, (document.clone(), 1));
    with_etag(StatusCode::CREATED, 1, document)
}

async fn delete_policy(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().expect("remote state");
    if let Some(response) = injected(&mut state) {
        return response;
    }
    match state.policies.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
