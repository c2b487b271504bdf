//! HTTP surface
//!
//! A thin JSON layer over the lifecycle coordinator. Identity arrives as an
//! `X-Forwarded-User` header set by the auth proxy in front of this service;
//! the handlers validate it and hand it down, nothing more.
//!
//! Routes:
//! - `GET  /api/modules`  - catalog merged with live deployment state
//! - `POST /api/deploy`   - provision a module for the caller
//! - `POST /api/undeploy` - tear down a module for the caller
//! - `GET  /api/config`   - workshop-wide config for the UI

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::catalog::ModuleCatalog;
use crate::client::ResourceClient;
use crate::config::Settings;
use crate::provision::Provisioner;
use crate::status::{aggregate, ChangeSummary, ModuleStatus};
use crate::template::UserIdentity;
use crate::watch::DeletionWatcher;
use crate::Error;

/// Header carrying the pre-authenticated caller identity
pub const IDENTITY_HEADER: &str = "x-forwarded-user";

/// Shared state behind every handler
pub struct AppState {
    client: Arc<dyn ResourceClient>,
    catalog: Arc<ModuleCatalog>,
    settings: Arc<Settings>,
    provisioner: Provisioner,
    watcher: DeletionWatcher,
}

impl AppState {
    /// Wire up the coordinator components and start the deletion watcher
    pub fn new(
        client: Arc<dyn ResourceClient>,
        catalog: Arc<ModuleCatalog>,
        settings: Arc<Settings>,
    ) -> Self {
        let provisioner = Provisioner::new(client.clone(), catalog.clone(), settings.clone());
        let watcher = DeletionWatcher::spawn(client.clone(), catalog.clone(), settings.clone());
        Self {
            client,
            catalog,
            settings,
            provisioner,
            watcher,
        }
    }
}

/// Request-level errors surfaced as HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No identity header and no fallback configured
    #[error("missing x-forwarded-user header")]
    MissingIdentity,

    /// The identity header failed validation
    #[error("invalid user identity: {0}")]
    InvalidIdentity(String),

    /// A coordinator operation failed
    #[error(transparent)]
    Internal(#[from] Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::MissingIdentity => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::InvalidIdentity(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Resolve the caller identity from the request headers
///
/// The fallback identity exists for local development without the auth
/// proxy; when it is not configured, requests without the header are
/// rejected rather than mapped to a default user.
fn caller_identity(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    let raw = match headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(value) => value.to_string(),
        None => match &state.settings.fallback_user {
            Some(fallback) => {
                warn!("Identity header not present, using configured fallback");
                fallback.clone()
            }
            None => return Err(ApiError::MissingIdentity),
        },
    };
    UserIdentity::new(raw).map_err(|e| match e {
        Error::Validation(msg) => ApiError::InvalidIdentity(msg),
        other => ApiError::Internal(other),
    })
}

/// Body of deploy and undeploy requests
#[derive(Debug, Deserialize)]
struct ChangeRequest {
    application: String,
}

/// Body of the module listing response
#[derive(Debug, Serialize)]
struct ModulesResponse {
    modules: Vec<ModuleStatus>,
}

/// Workshop-wide configuration handed to the UI
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlobalConfig {
    allowed_modules_count: u32,
    showroom_url: String,
    user: String,
    password: String,
    cluster_domain: String,
}

async fn list_modules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModulesResponse>, ApiError> {
    let user = caller_identity(&state, &headers)?;
    let namespace = state.settings.gitops_namespace(&user);

    // a failed listing degrades to "nothing deployed" instead of breaking
    // the module overview
    let live = match state.client.list_applications(&namespace).await {
        Ok(applications) => applications,
        Err(e) => {
            error!(user = %user, error = %e, "Listing applications failed");
            Vec::new()
        }
    };

    Ok(Json(ModulesResponse {
        modules: aggregate(&state.catalog, &live),
    }))
}

async fn deploy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChangeRequest>,
) -> Result<Json<ChangeSummary>, ApiError> {
    let user = caller_identity(&state, &headers)?;
    let summary = state
        .provisioner
        .provision(&request.application, &user)
        .await?;
    Ok(Json(summary))
}

async fn undeploy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChangeRequest>,
) -> Result<Json<ChangeSummary>, ApiError> {
    let user = caller_identity(&state, &headers)?;
    let summary = state
        .watcher
        .confirm_and_poll(&request.application, &user)
        .await?;
    Ok(Json(summary))
}

async fn global_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<GlobalConfig>, ApiError> {
    let user = caller_identity(&state, &headers)?;
    Ok(Json(GlobalConfig {
        allowed_modules_count: state.settings.allowed_modules_count,
        showroom_url: state.settings.showroom_url(&user),
        user: user.to_string(),
        password: state.settings.workshop_password.clone(),
        cluster_domain: state.settings.cluster_domain.clone(),
    }))
}

/// Create the API router
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/modules", get(list_modules))
        .route("/api/deploy", post(deploy))
        .route("/api/undeploy", post(undeploy))
        .route("/api/config", get(global_config))
        .with_state(state)
}
