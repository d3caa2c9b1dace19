use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header::ORIGIN, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use ember_core::{BroadcastEvent, BrokerHandle, BrokerResponse, Envelope, MessageKind, SenderInfo};
use futures_util::stream::{self, Stream};
use log::warn;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;

#[derive(Clone)]
pub struct ApiState {
    broker: BrokerHandle,
    events: broadcast::Sender<BroadcastEvent>,
    allowed_origins: Arc<Vec<String>>,
}

impl ApiState {
    pub fn new(broker: BrokerHandle, events: broadcast::Sender<BroadcastEvent>, allowed_origins: Vec<String>) -> Self {
        Self { broker, events, allowed_origins: Arc::new(allowed_origins) }
    }

    /// Requests carrying an `Origin` header come from a web page; requests
    /// without one come from local tooling acting as the approval surface.
    fn sender(&self, headers: &HeaderMap) -> Result<SenderInfo, AppError> {
        let Some(origin) = headers.get(ORIGIN) else {
            return Ok(SenderInfo::default());
        };
        let origin = origin
            .to_str()
            .map_err(|_| AppError::BadRequest("Origin header is not valid text".to_string()))?;
        if !self.allowed_origins.is_empty() && !self.allowed_origins.iter().any(|o| o == origin) {
            return Err(AppError::Forbidden(origin.to_string()));
        }
        Ok(SenderInfo::page(origin))
    }

    async fn ask(&self, envelope: Envelope, sender: SenderInfo) -> Result<Option<BrokerResponse>, AppError> {
        Ok(self.broker.request(envelope, sender).await?)
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn create_router(state: ApiState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route("/health", get(health_handler))
        .route("/message", post(message_handler))
        .route("/state", get(state_handler))
        .route("/pending", get(pending_handler))
        .route("/events", get(events_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// One envelope in, the broker's answer out. Requests that wait for the
/// user keep the HTTP request open until they are decided or time out.
async fn message_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Result<Response, AppError> {
    let sender = state.sender(&headers)?;
    let envelope = Envelope::from_value(&raw)
        .ok_or_else(|| AppError::BadRequest("unrecognized message type".to_string()))?;
    match state.ask(envelope, sender).await? {
        Some(response) => Ok(Json(response).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn state_handler(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, AppError> {
    let sender = state.sender(&headers)?;
    let response = state
        .ask(Envelope::new(MessageKind::GetState), sender)
        .await?
        .unwrap_or_else(BrokerResponse::done);
    Ok(Json(response.state).into_response())
}

async fn pending_handler(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, AppError> {
    let sender = state.sender(&headers)?;
    let response = state
        .ask(Envelope::new(MessageKind::GetPendingRequests), sender)
        .await?
        .unwrap_or_else(BrokerResponse::done);
    let pending = response.into_result().map_err(|e| AppError::Core(e.into()))?;
    Ok(Json(pending).into_response())
}

/// What a page subscriber may see of a broadcast. Account lists only reach
/// pages through their own connection events and scoped state.
fn visible_to(event: BroadcastEvent, origin: Option<&str>) -> Option<BroadcastEvent> {
    let Some(origin) = origin else {
        return Some(event);
    };
    if !event.concerns(origin) {
        return None;
    }
    match event {
        BroadcastEvent::AccountsChanged { .. } => None,
        BroadcastEvent::StateUpdate { state } => Some(BroadcastEvent::StateUpdate { state: state.scoped_to(origin) }),
        other => Some(other),
    }
}

fn sse_event(event: &BroadcastEvent) -> Event {
    Event::default()
        .event(event.kind().type_name())
        .data(event.to_envelope().to_value().to_string())
}

/// Broker broadcasts as server-sent events.
async fn events_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let origin = match state.sender(&headers)? {
        SenderInfo { origin: Some(origin), .. } => Some(origin),
        _ => None,
    };
    let receiver = state.events.subscribe();
    let stream = stream::unfold((receiver, origin), |(mut receiver, origin)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(event) = visible_to(event, origin.as_deref()) {
                        return Some((Ok(sse_event(&event)), (receiver, origin)));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Event subscriber lagged, skipped {}", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ember_core::native::TokioScheduler;
    use ember_core::{expiry_channel, run, Broker, MemoryStorage, Settings, StateSnapshot, SystemClock};
    use tokio::task::LocalSet;
    use tower::ServiceExt;

    use crate::host::ChannelHost;

    const DAPP: &str = "https://dapp.test";

    async fn start(allowed_origins: Vec<String>) -> Router {
        let (events, _) = broadcast::channel(16);
        let (handle, commands) = BrokerHandle::channel();
        let (expired_tx, expired_rx) = expiry_channel();
        let broker = Broker::load(
            MemoryStorage::new(),
            &Settings::default(),
            Box::new(ChannelHost::new(events.clone())),
            Box::new(TokioScheduler::new(expired_tx)),
            Box::new(SystemClock),
        )
        .await;
        tokio::task::spawn_local(run(broker, commands, expired_rx));
        create_router(ApiState::new(handle, events, allowed_origins))
    }

    fn post(body: Value, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/message")
            .header("content-type", "application/json");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        LocalSet::new()
            .run_until(async {
                let app = start(Vec::new()).await;
                let response = app.oneshot(get("/health")).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                assert_eq!(json_body(response).await["status"], "ok");
            })
            .await;
    }

    #[tokio::test]
    async fn page_connect_is_held_until_approved() {
        LocalSet::new()
            .run_until(async {
                let app = start(Vec::new()).await;
                let unlock = json!({"type": "EMBER_SET_ACCOUNTS", "accounts": ["0xabc"]});
                assert!(app.clone().oneshot(post(unlock, None)).await.unwrap().status().is_success());

                let page = app.clone();
                let connect = tokio::task::spawn_local(async move {
                    page.oneshot(post(json!({"type": "EMBER_CONNECT"}), Some(DAPP))).await.unwrap()
                });

                let mut pending = Value::Null;
                for _ in 0..100 {
                    pending = json_body(app.clone().oneshot(get("/pending")).await.unwrap()).await;
                    if pending.as_array().map(|p| !p.is_empty()).unwrap_or(false) {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                assert_eq!(pending[0]["origin"], DAPP);

                let approve = json!({"type": "EMBER_APPROVE_CONNECTION", "requestId": pending[0]["id"]});
                let decided = app.clone().oneshot(post(approve, None)).await.unwrap();
                assert_eq!(decided.status(), StatusCode::NO_CONTENT);

                let answer = json_body(connect.await.unwrap()).await;
                assert_eq!(answer["success"], true);
                assert_eq!(answer["result"], json!(["0xabc"]));

                let mut scoped = get("/state");
                scoped.headers_mut().insert(ORIGIN, HeaderValue::from_static(DAPP));
                let state: StateSnapshot = serde_json::from_value(json_body(app.oneshot(scoped).await.unwrap()).await).unwrap();
                assert_eq!(state.accounts, vec!["0xabc".to_string()]);
                assert_eq!(state.connected_sites.len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn pages_cannot_send_privileged_messages() {
        LocalSet::new()
            .run_until(async {
                let app = start(Vec::new()).await;
                let forged = json!({"type": "EMBER_SET_ACCOUNTS", "accounts": ["0xevil"]});
                let response = app.clone().oneshot(post(forged, Some(DAPP))).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                assert_eq!(json_body(response).await["error"]["code"], 4100);

                let pending = app.oneshot(get("/pending")).await.unwrap();
                assert_eq!(json_body(pending).await, json!([]));
            })
            .await;
    }

    #[tokio::test]
    async fn unknown_origins_are_refused_when_a_list_is_configured() {
        LocalSet::new()
            .run_until(async {
                let app = start(vec!["http://localhost:3000".to_string()]).await;
                let response = app
                    .oneshot(post(json!({"type": "EMBER_GET_STATE"}), Some("https://evil.test")))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::FORBIDDEN);
            })
            .await;
    }

    #[test]
    fn page_subscribers_never_see_account_lists() {
        let accounts = BroadcastEvent::AccountsChanged { accounts: vec!["0xabc".into()] };
        assert_eq!(visible_to(accounts.clone(), Some(DAPP)), None);
        assert_eq!(visible_to(accounts.clone(), None), Some(accounts));

        let other = BroadcastEvent::ConnectionApproved { origin: "https://other.test".into(), accounts: vec!["0xabc".into()] };
        assert_eq!(visible_to(other, Some(DAPP)), None);

        let chain = BroadcastEvent::ChainChanged { chain_id: "0x89".into() };
        assert_eq!(visible_to(chain.clone(), Some(DAPP)), Some(chain));
    }
}
