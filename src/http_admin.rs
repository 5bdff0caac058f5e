use crate::admin_types::*;
use crate::allowlist::AllowlistStore;
use crate::conn_info::ClientConnInfo;
use crate::error::AppError;
use crate::gateway::GatewayClient;
use crate::model::Ring;
use crate::registry::SubscriberRegistry;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

#[derive(Clone)]
pub struct AdminState {
    pub allowlist: AllowlistStore,
    pub registry: SubscriberRegistry,
    pub gateway: GatewayClient,
    pub trusted_ip: Arc<IpAddr>,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "sms-gateway-proxy admin api", license(name = "Apache-2.0")),
    paths(),
    components(schemas(
        HealthResponse,
        RegisterRequest,
        RegisterResponse,
        AllowlistAddResponse,
        AllowlistRemoveResponse,
        SendRequest,
        crate::model::Subscriber,
        crate::model::Ring,
        crate::model::EventKind,
    ))
)]
struct ApiDoc;

pub fn openapi_json() -> anyhow::Result<String> {
    Ok(ApiDoc::openapi().to_pretty_json()?)
}

/// Builds the Admin API router. Every route behind this router requires
/// the request's local connection address to equal the configured
/// `private_ip`; non-matching requests never reach a handler.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/clients", get(clients))
        .route("/allowlist", post(add_allowlist).get(get_allowlist).delete(remove_allowlist))
        .route("/allowlist/{ring}", get(allowlist_for_ring))
        .route("/send", post(send))
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
        .layer(TraceLayer::new_for_http())
        .route_layer(middleware::from_fn_with_state(state.clone(), trusted_ip_boundary))
        .with_state(state)
}

async fn trusted_ip_boundary(
    State(state): State<AdminState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let local_addr = request
        .extensions()
        .get::<ConnectInfo<ClientConnInfo>>()
        .map(|ci| ci.0.local_addr.ip());

    match local_addr {
        Some(ip) if ip == *state.trusted_ip => next.run(request).await,
        Some(ip) => {
            tracing::warn!("rejecting admin request arriving on untrusted local address {ip}");
            StatusCode::FORBIDDEN.into_response()
        }
        None => {
            tracing::error!("admin request missing connection info; rejecting");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

async fn health(State(state): State<AdminState>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    match state.gateway.health().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            version,
            timestamp: chrono::Utc::now(),
            gateway: "ok",
            error: None,
        })
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "error",
                version,
                timestamp: chrono::Utc::now(),
                gateway: "unreachable",
                error: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn register(
    State(state): State<AdminState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    if req.id.is_empty() || req.id.len() > 128 {
        return Err(AppError::bad_request("id must be 1-128 characters"));
    }
    if req.webhook_url.is_empty() {
        return Err(AppError::bad_request("webhook_url must be non-empty"));
    }

    state
        .registry
        .upsert(req.id.clone(), req.webhook_url.clone(), req.ring, req.kinds());

    Ok(Json(RegisterResponse {
        status: "registered",
        id: req.id,
    }))
}

async fn clients(State(state): State<AdminState>) -> Json<ClientsResponse> {
    Json(state.registry.list())
}

async fn add_allowlist(
    State(state): State<AdminState>,
    Query(q): Query<AllowlistQuery>,
) -> Result<Json<AllowlistAddResponse>, AppError> {
    let ring = q
        .ring
        .ok_or_else(|| AppError::bad_request("ring is required"))?;
    state.allowlist.add(&q.number, ring).await?;
    Ok(Json(AllowlistAddResponse {
        status: "added",
        number: q.number,
        ring,
    }))
}

async fn get_allowlist(State(state): State<AdminState>) -> Json<AllowlistMap> {
    Json(state.allowlist.all())
}

async fn allowlist_for_ring(
    State(state): State<AdminState>,
    Path(ring): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let ring = Ring::from_str_loose(&ring)
        .ok_or_else(|| AppError::bad_request(format!("unknown ring {ring}")))?;
    Ok(Json(state.allowlist.numbers_in(ring)))
}

async fn remove_allowlist(
    State(state): State<AdminState>,
    Query(q): Query<AllowlistQuery>,
) -> Result<Json<AllowlistRemoveResponse>, AppError> {
    if q.number.is_empty() {
        return Err(AppError::bad_request("number is required"));
    }
    state.allowlist.remove(&q.number).await?;
    Ok(Json(AllowlistRemoveResponse {
        status: "removed",
        number: q.number,
    }))
}

async fn send(
    State(state): State<AdminState>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if req.phone_numbers.is_empty() || req.message.is_empty() {
        return Err(AppError::bad_request(
            "phone_numbers must be non-empty and message must be non-empty",
        ));
    }
    let result = state
        .gateway
        .send_message(&req.phone_numbers, &req.message, req.sim_number.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn_info::ClientConnInfo;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::net::{Ipv4Addr, SocketAddr};
    use tower::ServiceExt;

    async fn test_state(trusted_ip: IpAddr) -> (AdminState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let allowlist = AllowlistStore::open(&dir.path().join("a.db")).unwrap();
        let registry = SubscriberRegistry::new();
        let gateway =
            GatewayClient::new("http://127.0.0.1:1".into(), "sms", "pw".into(), None).unwrap();
        (
            AdminState {
                allowlist,
                registry,
                gateway,
                trusted_ip: Arc::new(trusted_ip),
            },
            dir,
        )
    }

    fn request_from(local: SocketAddr, remote: SocketAddr) -> axum::http::Request<Body> {
        let mut req = axum::http::Request::builder()
            .method("GET")
            .uri("/clients")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(ClientConnInfo {
            local_addr: local,
            remote_addr: remote,
        }));
        req
    }

    #[tokio::test]
    async fn matching_local_address_is_allowed() {
        let trusted = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let (state, _dir) = test_state(trusted).await;
        let app = router(state);

        let req = request_from(
            SocketAddr::new(trusted, 8080),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), 54321),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn non_matching_local_address_is_rejected() {
        let trusted = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let (state, _dir) = test_state(trusted).await;
        let app = router(state);

        let req = request_from(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), 8080),
            SocketAddr::new(trusted, 54321),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn register_then_list_round_trips() {
        let trusted = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let (state, _dir) = test_state(trusted).await;
        let app = router(state);

        let body = serde_json::to_vec(&serde_json::json!({
            "id": "sub-a",
            "webhook_url": "http://example.invalid",
            "ring": "prod",
            "sms_received": true,
        }))
        .unwrap();

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/register")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
            .map(|b| b);
        let mut req = req;
        req.extensions_mut().insert(ConnectInfo(ClientConnInfo {
            local_addr: SocketAddr::new(trusted, 8080),
            remote_addr: SocketAddr::new(trusted, 1),
        }));

        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut list_req = axum::http::Request::builder()
            .method("GET")
            .uri("/clients")
            .body(Body::empty())
            .unwrap();
        list_req.extensions_mut().insert(ConnectInfo(ClientConnInfo {
            local_addr: SocketAddr::new(trusted, 8080),
            remote_addr: SocketAddr::new(trusted, 1),
        }));
        let response = app.oneshot(list_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let subs: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0]["id"], "sub-a");
    }
}
