//! The HTTP surface: `/v1/*` job routes plus `/health`, wired with a thin
//! bearer-token auth middleware (spec §6). Storage-agnostic — generic over
//! any `enq_core::Ledger`/`Broker` pair, so `enq-server` plugs in
//! `enq-postgres`/`enq-redis` and this crate's own tests plug in
//! `enq-testing`'s in-memory fakes.

mod auth;
mod dto;
mod error;
mod routes;
mod state;

pub use dto::*;
pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, TenantId};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use enq_core::Coordinator;
    use enq_testing::{InMemoryBroker, InMemoryLedger};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState<InMemoryLedger, InMemoryBroker> {
        let ledger = Arc::new(InMemoryLedger::new());
        // sha256("secret-key"), matching the bearer token the tests below send.
        ledger.seed_tenant(
            "tenant-a",
            "85dbe15d75ef9308c7ae0f33c7a324cc6f4bf519a2ed2f3027bd33c140a4f9aa",
        );
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = Arc::new(Coordinator::new(ledger.clone(), broker.clone()));
        AppState::new(coordinator, ledger, 60)
    }

    #[tokio::test]
    async fn health_does_not_require_auth() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_auth_header_is_rejected_with_challenge() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(axum::http::header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.starts_with("Bearer realm=\"enq\""));
        assert!(challenge.contains("error=\"invalid_request\""));
    }

    #[tokio::test]
    async fn enqueue_then_list_round_trips_through_the_router() {
        let app = build_router(test_state());

        let enqueue_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/jobs")
                    .header("Authorization", "Bearer secret-key")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"type": "send_email", "payload": {"to": "a@example.com"}})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(enqueue_response.status(), StatusCode::CREATED);

        let list_response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/jobs")
                    .header("Authorization", "Bearer secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(list_response.status(), StatusCode::OK);
    }
}
