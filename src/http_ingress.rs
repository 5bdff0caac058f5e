use crate::fanout::FanoutEngine;
use crate::model::EventKind;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{post, MethodRouter};
use axum::Router;

/// The loopback-only Ingress listener. Mounts exactly the four routes the
/// gateway is configured (by the reconciler) to call; nothing else is
/// reachable here. One handler factory produces all four routes, each
/// closing over its own `EventKind` rather than four near-identical
/// hand-written functions.
pub fn router(engine: FanoutEngine) -> Router {
    Router::new()
        .route("/webhook/received", webhook_handler(EventKind::Received))
        .route("/webhook/sent", webhook_handler(EventKind::Sent))
        .route("/webhook/delivered", webhook_handler(EventKind::Delivered))
        .route("/webhook/failed", webhook_handler(EventKind::Failed))
        .with_state(engine)
}

fn webhook_handler(kind: EventKind) -> MethodRouter<FanoutEngine> {
    post(move |State(engine): State<FanoutEngine>, body: Bytes| async move {
        engine.handle(kind, body).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::AllowlistStore;
    use crate::dedup::DedupCache;
    use crate::registry::SubscriberRegistry;
    use axum::body::Body;
    use tower::ServiceExt;

    #[tokio::test]
    async fn unknown_route_is_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let allowlist = AllowlistStore::open(&dir.path().join("a.db")).unwrap();
        let engine = FanoutEngine::new(allowlist, SubscriberRegistry::new(), DedupCache::new());
        let app = router(engine);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/unknown")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_with_400() {
        let dir = tempfile::tempdir().unwrap();
        let allowlist = AllowlistStore::open(&dir.path().join("a.db")).unwrap();
        let engine = FanoutEngine::new(allowlist, SubscriberRegistry::new(), DedupCache::new());
        let app = router(engine);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/received")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
