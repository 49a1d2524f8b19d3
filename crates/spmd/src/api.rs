//! Control API served by the running daemon.
//!
//! Registry operations go through the same `StateStore` the health monitor
//! holds, so providers can be registered, updated and removed while probes
//! are in flight.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/providers` | List providers (`?service_type=` filter) |
//! | POST | `/api/v1/providers` | Register, or update the provider with that name |
//! | GET | `/api/v1/providers/{key}` | Get a provider by id or name |
//! | PUT | `/api/v1/providers/{id}` | Update registry fields |
//! | DELETE | `/api/v1/providers/{id}` | Remove a provider |

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use spm_state::{NewProvider, ProviderRecord, Registration, StateError, StateStore};
use tracing::{error, info};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<StateStore>,
}

/// Response envelope used by every route.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Body of a registration response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: Registration,
    pub provider: ProviderRecord,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub service_type: Option<String>,
}

pub fn build_router(store: Arc<StateStore>) -> Router {
    let state = ApiState { store };
    let providers = Router::new()
        .route("/providers", get(list_providers).post(register_provider))
        .route(
            "/providers/{key}",
            get(get_provider)
                .put(update_provider)
                .delete(delete_provider),
        )
        .with_state(state);

    Router::new().nest("/api/v1", providers)
}

fn error_response(e: &StateError) -> axum::response::Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_conflict() => StatusCode::CONFLICT,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "provider store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(e.to_string()),
        }),
    )
        .into_response()
}

/// GET /api/v1/providers
async fn list_providers(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.store.list_providers(params.service_type.as_deref()) {
        Ok(providers) => ApiResponse::ok(providers).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/providers
async fn register_provider(
    State(state): State<ApiState>,
    Json(new): Json<NewProvider>,
) -> impl IntoResponse {
    match state.store.register_or_update(&new) {
        Ok((provider, status)) => {
            info!(id = %provider.id, name = %provider.name, ?status, "provider registration");
            let code = match status {
                Registration::Registered => StatusCode::CREATED,
                Registration::Updated => StatusCode::OK,
            };
            (code, ApiResponse::ok(RegistrationResponse { status, provider })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/providers/{key}
async fn get_provider(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let found = match state.store.get_provider(&key) {
        Ok(None) => state.store.get_provider_by_name(&key),
        other => other,
    };
    match found {
        Ok(Some(provider)) => ApiResponse::ok(provider).into_response(),
        Ok(None) => error_response(&StateError::NotFound(key)),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/v1/providers/{id}
async fn update_provider(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<NewProvider>,
) -> impl IntoResponse {
    match state.store.update_provider(&id, &update) {
        Ok(provider) => {
            info!(%id, name = %provider.name, "provider updated");
            ApiResponse::ok(provider).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/providers/{id}
async fn delete_provider(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_provider(&id) {
        Ok(true) => {
            info!(%id, "provider removed");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response(&StateError::NotFound(id)),
        Err(e) => error_response(&e),
    }
}
