//! fleet-api — HTTP API of the fleet controller.
//!
//! Pipeline stages exchange their records verbatim so an external
//! scheduler can chain them; everything else answers with the
//! `{success, data, error}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | POST | `/fetch` | none | `HostGroupInfoResponse` |
//! | POST | `/scale_down` | `HostGroupInfoResponse` | `ScaleResponse` |
//! | POST | `/terminate` | `ScaleResponse` | `TerminatedInstancesResponse` |
//! | POST | `/transient` | `TerminatedInstancesResponse` | `"no transient errors"` or the list |
//! | POST | `/report` | `{type, hostname, message}` | envelope |
//! | POST | `/protect` | `{vm}` | envelope |
//! | POST | `/join_finalization` | `{name}` | envelope |
//! | POST | `/clusterize` | `{name}` | envelope with the registration outcome |
//! | POST | `/clusterize_finalization` | none | envelope with the committed state |
//! | POST | `/resize` | `{value}` | envelope with old and new size |
//! | POST | `/status` | `{type: status\|progress}` | envelope |
//! | POST | `/cluster_status` | `{method: status}` | envelope with the raw management `status` reply |

pub mod handlers;

use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use fleet_scale::Controller;
use tracing::Instrument;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Controller,
}

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

async fn request_span(request: Request, next: Next) -> Response {
    let req_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!(
        "request",
        req_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    async move {
        let response = next.run(request).await;
        tracing::debug!(status = response.status().as_u16(), "request finished");
        response
    }
    .instrument(span)
    .await
}

/// Build the complete API router.
pub fn build_router(controller: Controller) -> Router {
    let state = ApiState { controller };

    Router::new()
        .route("/fetch", post(handlers::fetch))
        .route("/scale_down", post(handlers::scale_down))
        .route("/terminate", post(handlers::terminate))
        .route("/transient", post(handlers::transient))
        .route("/report", post(handlers::report))
        .route("/protect", post(handlers::protect))
        .route("/join_finalization", post(handlers::join_finalization))
        .route("/clusterize", post(handlers::clusterize))
        .route("/clusterize_finalization", post(handlers::clusterize_finalization))
        .route("/resize", post(handlers::resize))
        .route("/status", post(handlers::status))
        .route("/cluster_status", post(handlers::cluster_status))
        .layer(middleware::from_fn(request_span))
        .with_state(state)
}
