//! HTTP API handlers for Clientele.
//!
//! Every handler logs its outcome through structured tracing and maps
//! failures to a status code. Import failures also carry a single
//! human-readable message in an `{"error": ...}` body.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::aggregation::refresh_all_clients;
use crate::dedup;
use crate::error::ImportError;
use crate::import::import_csv;
use crate::model::{
    CleanReport, Client, ClientDetail, DuplicateReport, ImportReport, ImportRequest, Lifecycle,
    ManualPrestation, Prestation, RefreshResponse, TransferRequest,
};
use crate::records;
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
}

/// Body of failed requests that explain themselves.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Query parameters for GET /clients.
#[derive(Debug, Deserialize)]
pub struct ClientsQuery {
    /// Only clients in this lifecycle state.
    pub lifecycle: Option<Lifecycle>,

    /// Only VIP (`true`) or non-VIP (`false`) clients.
    pub vip: Option<bool>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/import", post(post_import))
        .route("/clients", get(get_clients))
        .route("/clients/refresh", post(post_refresh_clients))
        .route("/clients/:id", get(get_client))
        .route("/prestations", post(post_prestation))
        .route("/prestations/:id", delete(delete_prestation))
        .route("/prestations/:id/transfer", post(post_transfer))
        .route("/duplicates", get(get_duplicates))
        .route("/duplicates/clean", post(post_clean_duplicates))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// POST /import - Import a clients table and a prestations table.
///
/// # Request Body
///
/// ```json
/// {
///     "clients_csv": "nom,adresse\nJean Dupont,Lyon\n",
///     "prestations_csv": "client,date,montant\nACME Corp,15/03/2024,1200\n"
/// }
/// ```
///
/// # Response
///
/// ```json
/// {
///     "clients_upserted": 2,
///     "prestations_upserted": 1,
///     "clients_segmented": 2,
///     "rows_skipped": 0,
///     "batches_committed": 1
/// }
/// ```
///
/// A missing column or malformed CSV answers `422` with `{"error": "..."}`.
#[instrument(skip_all)]
pub async fn post_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportReport>, ApiError> {
    match import_csv(
        &state.storage,
        &request.clients_csv,
        &request.prestations_csv,
        Utc::now(),
    )
    .await
    {
        Ok(report) => {
            info!(
                clients = report.clients_upserted,
                prestations = report.prestations_upserted,
                "Import completed"
            );
            Ok(Json(report))
        }
        Err(e) => {
            warn!(error = %e, "Import rejected");
            let status = match e {
                ImportError::MissingColumn { .. } | ImportError::Csv(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                // A fresh pipeline is never `NotIdle`
                ImportError::Storage(_) | ImportError::NotIdle(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            Err(api_error(status, e))
        }
    }
}

/// GET /clients - List clients, optionally filtered by segment.
#[instrument(skip(state))]
pub async fn get_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientsQuery>,
) -> Result<Json<Vec<Client>>, StatusCode> {
    match state.storage.list_clients().await {
        Ok(clients) => {
            let clients: Vec<Client> = clients
                .into_iter()
                .filter(|c| query.lifecycle.is_none_or(|l| c.segmentation.lifecycle == l))
                .filter(|c| query.vip.is_none_or(|vip| c.segmentation.vip == vip))
                .collect();
            info!(client_count = clients.len(), "Clients listed");
            Ok(Json(clients))
        }
        Err(e) => {
            warn!(error = %e, "Failed to list clients");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /clients/:id - A client with its prestations.
#[instrument(skip(state))]
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientDetail>, StatusCode> {
    let client = match state.storage.get_client(&id).await {
        Ok(Some(client)) => client,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(client_id = %id, error = %e, "Failed to fetch client");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match state.storage.list_client_prestations(&id).await {
        Ok(prestations) => Ok(Json(ClientDetail {
            client,
            prestations,
        })),
        Err(e) => {
            warn!(client_id = %id, error = %e, "Failed to fetch client prestations");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /clients/refresh - Recompute stats and segmentation of every client.
#[instrument(skip(state))]
pub async fn post_refresh_clients(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, StatusCode> {
    match refresh_all_clients(&state.storage, Utc::now()).await {
        Ok(clients_segmented) => Ok(Json(RefreshResponse { clients_segmented })),
        Err(e) => {
            warn!(error = %e, "Failed to refresh clients");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /prestations - Record a prestation by hand.
///
/// # Request Body
///
/// ```json
/// {
///     "client_name": "Claire Martin",
///     "date": "2024-06-01",
///     "amount": 800.0,
///     "invoice_number": "F-2024-001",
///     "reference": "Mariage",
///     "description": "Soirée dansante"
/// }
/// ```
///
/// Returns `201 Created` with the stored prestation.
#[instrument(skip_all)]
pub async fn post_prestation(
    State(state): State<AppState>,
    Json(entry): Json<ManualPrestation>,
) -> Result<(StatusCode, Json<Prestation>), ApiError> {
    if entry.client_name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "client name is required"));
    }

    match records::record_manual_prestation(&state.storage, &entry, Utc::now()).await {
        Ok(prestation) => Ok((StatusCode::CREATED, Json(prestation))),
        Err(e) => {
            warn!(error = %e, "Failed to record prestation");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// DELETE /prestations/:id - Delete a prestation.
#[instrument(skip(state))]
pub async fn delete_prestation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match records::delete_prestation(&state.storage, &id, Utc::now()).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            warn!(prestation_id = %id, error = %e, "Failed to delete prestation");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// POST /prestations/:id/transfer - Move a prestation to another client.
///
/// # Request Body
///
/// ```json
/// { "client_id": "client_0123456789abcdef0123" }
/// ```
///
/// `404` if the prestation or the target client does not exist.
#[instrument(skip(state))]
pub async fn post_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<Prestation>, StatusCode> {
    match records::transfer_prestation(&state.storage, &id, &request.client_id, Utc::now()).await {
        Ok(Some(prestation)) => Ok(Json(prestation)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(prestation_id = %id, error = %e, "Failed to transfer prestation");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /duplicates - Count duplicate prestations without removing them.
///
/// # Response
///
/// ```json
/// { "groups": 1, "duplicates_removable": 1, "total_records": 3 }
/// ```
#[instrument(skip(state))]
pub async fn get_duplicates(
    State(state): State<AppState>,
) -> Result<Json<DuplicateReport>, StatusCode> {
    match dedup::detect(&state.storage).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(error = %e, "Failed to scan for duplicates");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /duplicates/clean - Delete redundant duplicate prestations.
///
/// # Response
///
/// ```json
/// { "deleted": 1, "kept": 2 }
/// ```
#[instrument(skip(state))]
pub async fn post_clean_duplicates(
    State(state): State<AppState>,
) -> Result<Json<CleanReport>, StatusCode> {
    match dedup::clean(&state.storage, Utc::now()).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(error = %e, "Failed to clean duplicates");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
