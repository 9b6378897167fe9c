use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use log::{error, info, warn};
use serde::{Deserialize, Deserializer, de};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cell::first_column;
use crate::config::Config;
use crate::error::BridgeError;
use crate::ledger::{Ledger, ProductionRecord, RecordWriter, parse_count};
use crate::month_sheet::{Provisioner, SheetCache};
use crate::sheets::SheetStore;
use crate::timesheet::{RecordHoursError, TimesheetEntry, record_hours};

const INVALID_DATE: &str = "Invalid date format, expected YYYY-MM-DD";

/// Everything a request handler needs, shared across requests
pub struct AppState<S> {
    pub store: S,
    pub cache: SheetCache,
    pub provisioner: Provisioner,
    pub ledger: Ledger,
    pub workers_range: String,
    pub operations_range: String,
}

impl<S: SheetStore> AppState<S> {
    pub fn new(store: S, cache: SheetCache, config: &Config) -> Self {
        AppState {
            store,
            cache,
            provisioner: Provisioner::new(
                config.timesheet_sheet.clone(),
                config.production_sheet.clone(),
                config.layout(),
                config.visibility_mode,
            ),
            ledger: Ledger::new(config.ledger_strategy, config.production_sheet.clone()),
            workers_range: config.workers_range.clone(),
            operations_range: config.operations_range.clone(),
        }
    }
}

/// Accept a JSON string or number, keep it as text
fn lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("unexpected value {}", other))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductionForm {
    #[serde(default, deserialize_with = "lenient")]
    date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    part_and_operation: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    total_parts: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    defective: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimesheetForm {
    #[serde(default, deserialize_with = "lenient")]
    date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    hours: Option<String>,
}

/// Error reply: a status and a plain-text message
struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError(StatusCode::BAD_REQUEST, message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        if e.is_validation() {
            ApiError::bad_request(e.to_string())
        } else {
            ApiError::internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// The submitted date, or today when none was sent
fn date_or_today(value: &Option<String>) -> Result<NaiveDate, ApiError> {
    match present(value) {
        None => Ok(Local::now().date_naive()),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request(INVALID_DATE)),
    }
}

fn created() -> Response {
    (StatusCode::CREATED, Json(json!({ "status": "success" }))).into_response()
}

/// Build the application router
///
/// # Arguments
/// * `state` - Shared handler state
/// * `static_dir` - Directory served for every path without a route
pub fn router<S: SheetStore + 'static>(state: Arc<AppState<S>>, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/submit-production", post(submit_production::<S>))
        .route("/submit-timesheet", post(submit_timesheet::<S>))
        .route("/health", get(health))
        .route("/get-dropdown-data", get(dropdown_data::<S>))
        .route("/get-operations-data", get(operations_data::<S>))
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on the configured port until Ctrl-C
pub async fn run<S: SheetStore + 'static>(
    state: Arc<AppState<S>>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state, &config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Server starting on port {}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn health() -> &'static str {
    "Service is healthy"
}

async fn submit_production<S: SheetStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Response {
    match handle_production(&state, &body).await {
        Ok(()) => created(),
        Err(e) => e.into_response(),
    }
}

async fn handle_production<S: SheetStore>(
    state: &AppState<S>,
    body: &[u8],
) -> Result<(), ApiError> {
    let form: ProductionForm = serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected production body: {}", e);
        ApiError::bad_request("Invalid request body")
    })?;

    let (Some(name), Some(part), Some(total)) = (
        present(&form.full_name),
        present(&form.part_and_operation),
        present(&form.total_parts),
    ) else {
        return Err(ApiError::bad_request(
            "Missing required fields: fullName, partAndOperation, totalParts",
        ));
    };

    let date = date_or_today(&form.date)?;
    let total = parse_count("totalParts", total)?;
    let defective = present(&form.defective)
        .map(|d| parse_count("defective", d))
        .transpose()?;
    let notes = form.notes.as_deref().unwrap_or_default();
    let record = ProductionRecord::new(date, name, part, total, defective, notes)?;

    state
        .ledger
        .write(&state.store, &state.cache, &record)
        .await
        .map_err(|e| {
            error!("Failed to write production record: {}", e);
            ApiError::internal("Failed to process data")
        })
}

async fn submit_timesheet<S: SheetStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Response {
    match handle_timesheet(&state, &body).await {
        Ok(()) => created(),
        Err(e) => e.into_response(),
    }
}

async fn handle_timesheet<S: SheetStore>(
    state: &AppState<S>,
    body: &[u8],
) -> Result<(), ApiError> {
    let form: TimesheetForm = serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected timesheet body: {}", e);
        ApiError::bad_request("Invalid request body")
    })?;

    let (Some(name), Some(hours)) = (present(&form.full_name), present(&form.hours)) else {
        return Err(ApiError::bad_request(
            "Missing required fields: fullName, hours",
        ));
    };
    let date = date_or_today(&form.date)?;
    let entry = TimesheetEntry::new(date, name, hours)?;

    match record_hours(&state.store, &state.cache, &state.provisioner, &entry).await {
        Ok(_) => Ok(()),
        Err(RecordHoursError::Prepare(e)) => {
            error!("Failed to prepare timesheet for {}: {}", date, e);
            let message = format!("Failed to prepare timesheet: {}", e);
            Err(ApiError::internal(message))
        }
        Err(RecordHoursError::Write(e)) => {
            error!("Failed to record hours for {}: {}", entry.employee_name, e);
            let message = format!("Failed to process data: {}", e);
            Err(ApiError::internal(message))
        }
    }
}

async fn dropdown_data<S: SheetStore + 'static>(State(state): State<Arc<AppState<S>>>) -> Response {
    reference_list(&state.store, &state.workers_range).await
}

async fn operations_data<S: SheetStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Response {
    reference_list(&state.store, &state.operations_range).await
}

/// Non-empty first-column values of `range` as a JSON array
async fn reference_list<S: SheetStore>(store: &S, range: &str) -> Response {
    match store.get_range(range).await {
        Ok(grid) => {
            let values: Vec<String> = first_column(&grid)
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            Json(values).into_response()
        }
        Err(e) => {
            error!("Failed to read {}: {}", range, e);
            ApiError::internal("Failed to get data").into_response()
        }
    }
}
