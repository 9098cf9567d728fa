// Pozo Familiar - Web Server
// Read-only JSON API plus the admin entry form (post/redirect/get).

use axum::{
    extract::{Form, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

use pozo_familiar::{
    delete_movement, find_contributor, insert_movement, insert_transfer, list_contributors,
    list_movements, list_movements_recent, open_ledger, Category, Contributor, Direction,
    LedgerError, Movement, MovementKind, NewMovement, SettlementConfig, SettlementEngine,
    Summary, TransferRequest,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    engine: Arc<SettlementEngine>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Fields posted by the admin entry form. Everything arrives as text and
/// is parsed here, so a bad submission turns into a 400 with a message
/// instead of a rejected extractor.
#[derive(Deserialize)]
struct MovementForm {
    date: String,
    #[serde(default)]
    contributor_id: String,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    kind: String,
    amount_local: String,
    #[serde(default)]
    currency: String,
    fx_rate: String,
    #[serde(default)]
    bank: String,
    #[serde(default)]
    bank_from: String,
    #[serde(default)]
    bank_to: String,
    #[serde(default)]
    description: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/contributors - The fixed family roster
async fn get_contributors(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match list_contributors(&conn) {
        Ok(contributors) => (StatusCode::OK, Json(ApiResponse::ok(contributors))).into_response(),
        Err(e) => {
            tracing::error!("contributor query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<Contributor>>::fail("contributor query failed")),
            )
                .into_response()
        }
    }
}

/// GET /api/movements - Movement history, most recent first
async fn get_movements(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match list_movements_recent(&conn) {
        Ok(movements) => (StatusCode::OK, Json(ApiResponse::ok(movements))).into_response(),
        Err(e) => {
            tracing::error!("movement query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<Movement>>::fail("movement query failed")),
            )
                .into_response()
        }
    }
}

/// GET /api/summary - Full settlement picture, recomputed on every call
async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let loaded = list_contributors(&conn)
        .and_then(|contributors| list_movements(&conn).map(|movements| (contributors, movements)));

    match loaded {
        Ok((contributors, movements)) => {
            let summary = state.engine.settle(&contributors, &movements);
            (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response()
        }
        Err(e) => {
            tracing::error!("settlement query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Summary>::fail("settlement failed")),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Admin Handlers
// ============================================================================

/// POST /admin/movements - Record a movement (or a transfer) and bounce
/// back to the panel
async fn create_movement(
    State(state): State<AppState>,
    Form(form): Form<MovementForm>,
) -> Result<Redirect, Response> {
    let kind = parse_kind(&form.kind).map_err(error_response)?;

    if kind == MovementKind::Transfer {
        // Both transfer legs are attributed to the household contributor;
        // whatever the form's contributor select held is ignored.
        let mut conn = state.db.lock().unwrap();
        let household_name = state.engine.config().household.clone();
        let household = find_contributor(&conn, &household_name)
            .map_err(error_response)?
            .ok_or_else(|| {
                error_response(LedgerError::Validation(format!(
                    "household contributor `{household_name}` is not in the ledger"
                )))
            })?;
        let transfer = parse_transfer(&form, household.id).map_err(error_response)?;
        insert_transfer(&mut conn, &transfer).map_err(error_response)?;
        tracing::info!(
            from = %transfer.bank_from,
            to = %transfer.bank_to,
            amount = transfer.amount_local,
            "transfer recorded"
        );
    } else {
        let entry = parse_movement(&form, kind).map_err(error_response)?;
        let conn = state.db.lock().unwrap();
        let id = insert_movement(&conn, &entry).map_err(error_response)?;
        tracing::info!(movement = id, "movement recorded");
    }

    Ok(Redirect::to("/admin"))
}

/// POST /admin/movements/:id/delete - Remove a movement; deleting an
/// absent id is a no-op so a double-submitted form stays harmless
async fn remove_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Redirect, Response> {
    let conn = state.db.lock().unwrap();
    let removed = delete_movement(&conn, id).map_err(error_response)?;
    if removed {
        tracing::info!(movement = id, "movement deleted");
    } else {
        tracing::warn!(movement = id, "delete of unknown movement ignored");
    }
    Ok(Redirect::to("/admin"))
}

fn error_response(err: LedgerError) -> Response {
    match err {
        LedgerError::Validation(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        other => {
            tracing::error!("ledger write failed: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Form Parsing
// ============================================================================

fn parse_kind(raw: &str) -> Result<MovementKind, LedgerError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(MovementKind::Normal);
    }
    MovementKind::parse_code(raw)
}

fn parse_movement(form: &MovementForm, kind: MovementKind) -> Result<NewMovement, LedgerError> {
    Ok(NewMovement {
        date: parse_date(&form.date)?,
        contributor_id: parse_id(&form.contributor_id)?,
        direction: Direction::parse_code(form.direction.trim())?,
        category: Category::parse_code(form.category.trim())?,
        kind,
        amount_local: parse_number("amount", &form.amount_local)?,
        currency: default_currency(&form.currency),
        fx_rate: parse_number("fx_rate", &form.fx_rate)?,
        bank: some_if_present(&form.bank),
        description: form.description.trim().to_string(),
    })
}

fn parse_transfer(form: &MovementForm, contributor_id: i64) -> Result<TransferRequest, LedgerError> {
    Ok(TransferRequest {
        date: parse_date(&form.date)?,
        contributor_id,
        bank_from: form.bank_from.trim().to_string(),
        bank_to: form.bank_to.trim().to_string(),
        amount_local: parse_number("amount", &form.amount_local)?,
        currency: default_currency(&form.currency),
        fx_rate: parse_number("fx_rate", &form.fx_rate)?,
        description: form.description.trim().to_string(),
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        LedgerError::Validation(format!("invalid date `{raw}` (expected YYYY-MM-DD)"))
    })
}

fn parse_id(raw: &str) -> Result<i64, LedgerError> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Validation(format!("invalid contributor id `{raw}`")))
}

fn parse_number(field: &str, raw: &str) -> Result<f64, LedgerError> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Validation(format!("{field} must be a number, got `{raw}`")))
}

/// The family keeps its books in pesos unless told otherwise.
fn default_currency(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        "ARS".to_string()
    } else {
        raw.to_string()
    }
}

fn some_if_present(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

// ============================================================================
// Pages
// ============================================================================

/// GET / - Serve the family panel
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

/// GET /admin - Serve the entry form
async fn serve_admin() -> impl IntoResponse {
    Html(include_str!("../web/admin.html"))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("🌐 Pozo Familiar - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("POZO_DB").unwrap_or_else(|_| "pozo-familiar.db".to_string());
    let conn = open_ledger(std::path::Path::new(&db_path))?;
    println!("✓ Ledger opened: {db_path}");

    let config = SettlementConfig::from_env()?;
    println!("✓ Settlement policy: {}", config.policy.as_str());

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        engine: Arc::new(SettlementEngine::new(config)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/contributors", get(get_contributors))
        .route("/movements", get(get_movements))
        .route("/summary", get(get_summary));

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/admin", get(serve_admin))
        .route("/admin/movements", post(create_movement))
        .route("/admin/movements/:id/delete", post(remove_movement))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let port: u16 = std::env::var("POZO_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    println!("\n🚀 Server running on http://localhost:{port}");
    println!("   Panel: http://localhost:{port}/");
    println!("   Admin: http://localhost:{port}/admin");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
