use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::tunnel::TunnelInfo;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_tunnels: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_tunnels: state.tracker.active_count(),
    })
}

pub async fn get_tunnels(State(state): State<AdminState>) -> Json<Vec<TunnelInfo>> {
    Json(state.registry.snapshot())
}

#[cfg(test)]
mod tests {
    use super::super::{setup_admin_router, AdminState};
    use crate::net::connection::{ConnectionId, ConnectionTracker};
    use crate::tunnel::{SessionRegistry, TunnelMux};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AdminState {
        AdminState {
            registry: Arc::new(SessionRegistry::new()),
            tracker: ConnectionTracker::new(),
            api_key: Arc::from("secret"),
        }
    }

    async fn json(router: axum::Router, path: &str) -> serde_json::Value {
        let response = router
            .oneshot(
                Request::get(path)
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        for header in [None, Some("Bearer wrong"), Some("secret")] {
            let mut request = Request::get("/admin/status");
            if let Some(value) = header {
                request = request.header("authorization", value);
            }
            let response = setup_admin_router(state())
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn status_reports_live_tunnels() {
        let state = state();
        let _guard = state.tracker.track(ConnectionId::new());

        let body = json(setup_admin_router(state), "/admin/status").await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["active_tunnels"], 1);
    }

    #[tokio::test]
    async fn tunnels_lists_registry() {
        let state = state();
        state.registry.add(TunnelMux::new("s1", None, None).0);

        let body = json(setup_admin_router(state), "/admin/tunnels").await;
        assert_eq!(body[0]["session_id"], "s1");
        assert_eq!(body[0]["pending_calls"], 0);
    }
}
