// src/main.rs
use anyhow::{Context, Result};
use axum::http::StatusCode as AxumStatusCode;
use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod aggregate;
mod dashboard;
mod filter;
mod ingest;
mod sheets;

mod filter_tests;

use dashboard::{DashboardService, DashboardSnapshot};
use filter::FilterError;
use ingest::{BatchSource, CsvDirSource};
use sheets::{
    SheetsBatchSource, SheetsClient, SheetsConfig, SheetsError, DEFAULT_CACHE_DIR,
    DEFAULT_CACHE_DURATION_SECS,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Sheets client error")]
    Sheets(#[from] SheetsError),
    #[error("Filter error")]
    Filter(#[from] FilterError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        error!("Error occurred: {:?}", self);
        let (status_code, error_message) = match &self {
            AppError::MissingEnvVar(_) => (
                AxumStatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error.".to_string(),
            ),
            AppError::Sheets(sheets_err) => match sheets_err {
                SheetsError::Request(e) => {
                    error!("Network request error to Sheets API: {}", e);
                    (
                        AxumStatusCode::BAD_GATEWAY,
                        "Failed to connect to the spreadsheet backend.".to_string(),
                    )
                }
                SheetsError::ApiError { status, message } => {
                    error!("Sheets API Error: Status={}, Msg={}", status, message);
                    (
                        AxumStatusCode::BAD_GATEWAY,
                        "The spreadsheet backend returned an error.".to_string(),
                    )
                }
                _ => (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error talking to the spreadsheet backend.".to_string(),
                ),
            },
            AppError::Filter(filter_err) => match filter_err {
                FilterError::NoData => (
                    AxumStatusCode::CONFLICT,
                    "No data available for the current dataset.".to_string(),
                ),
                other => (AxumStatusCode::BAD_REQUEST, other.to_string()),
            },
        };
        (
            status_code,
            Html(format!("<h1>Error</h1><p>{}</p>", error_message)),
        )
            .into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<TokioMutex<DashboardService>>,
}

#[derive(Parser, Debug)]
#[command(
    name = "subdash-core",
    about = "Submissions dashboard backend: ingest, filter, aggregate, serve"
)]
struct Cli {
    /// Port for the HTTP API
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Read batches from *.csv files in this directory instead of Google Sheets
    #[arg(long)]
    csv_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    info!("Tracing subscriber initialized.");

    let cli = Cli::parse();
    let sources = build_sources(&cli)?;

    let mut service = DashboardService::new(sources);
    service.load().await;
    let state = AppState {
        dashboard: Arc::new(TokioMutex::new(service)),
    };
    info!("Application state initialized.");

    let filter_routes = Router::new()
        .route("/year", post(handle_set_year))
        .route("/month", post(handle_set_month))
        .route("/employees", post(handle_set_employees))
        .route("/date", post(handle_set_date))
        .route("/clear", post(handle_clear_filters));
    let api_routes = Router::new()
        .route("/dashboard", get(handle_dashboard))
        .route("/refresh", post(handle_refresh))
        .nest("/filters", filter_routes);
    let app = Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Binding listener failed")?;
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}

fn build_sources(cli: &Cli) -> Result<Vec<Box<dyn BatchSource>>, AppError> {
    if let Some(dir) = &cli.csv_dir {
        info!("Using local CSV batches from {}", dir.display());
        return Ok(vec![Box::new(CsvDirSource::new(dir.clone()))]);
    }
    let config = load_sheets_config()?;
    info!(
        "Using spreadsheet {} with {} worksheet tabs",
        config.spreadsheet_id,
        config.worksheets.len()
    );
    let client = SheetsClient::new(config)?;
    Ok(vec![Box::new(SheetsBatchSource::new(client))])
}

fn load_sheets_config() -> Result<SheetsConfig, AppError> {
    let worksheets: Vec<String> = env::var("SHEETS_WORKSHEETS")
        .map_err(|_| AppError::MissingEnvVar("SHEETS_WORKSHEETS".to_string()))?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(SheetsConfig {
        api_key: env::var("SHEETS_API_KEY")
            .map_err(|_| AppError::MissingEnvVar("SHEETS_API_KEY".to_string()))?,
        spreadsheet_id: env::var("SHEETS_SPREADSHEET_ID")
            .map_err(|_| AppError::MissingEnvVar("SHEETS_SPREADSHEET_ID".to_string()))?,
        worksheets,
        cache_dir: PathBuf::from(
            env::var("SHEETS_CACHE_DIR").unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string()),
        ),
        cache_duration_secs: env::var("SHEETS_CACHE_DURATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_DURATION_SECS),
    })
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
struct YearSelection {
    year: i32,
}

#[derive(Debug, Deserialize)]
struct MonthSelection {
    month: String,
}

#[derive(Debug, Deserialize)]
struct EmployeeSelection {
    employees: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DateSelection {
    date: Option<NaiveDate>,
}

// --- Handlers ---

async fn handle_dashboard(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let service = state.dashboard.lock().await;
    Ok(Json(service.snapshot()))
}

async fn handle_refresh(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    info!("Handling /api/refresh request...");
    let mut service = state.dashboard.lock().await;
    service.refresh().await;
    Ok(Json(service.snapshot()))
}

async fn handle_set_year(
    State(state): State<AppState>,
    Json(body): Json<YearSelection>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let mut service = state.dashboard.lock().await;
    service.set_year(body.year)?;
    Ok(Json(service.snapshot()))
}

async fn handle_set_month(
    State(state): State<AppState>,
    Json(body): Json<MonthSelection>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let mut service = state.dashboard.lock().await;
    service.set_month(&body.month)?;
    Ok(Json(service.snapshot()))
}

async fn handle_set_employees(
    State(state): State<AppState>,
    Json(body): Json<EmployeeSelection>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let mut service = state.dashboard.lock().await;
    service.set_employees(body.employees)?;
    Ok(Json(service.snapshot()))
}

async fn handle_set_date(
    State(state): State<AppState>,
    Json(body): Json<DateSelection>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let mut service = state.dashboard.lock().await;
    service.set_date(body.date);
    Ok(Json(service.snapshot()))
}

async fn handle_clear_filters(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let mut service = state.dashboard.lock().await;
    service.clear_filters();
    Ok(Json(service.snapshot()))
}

async fn handle_status(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let service = state.dashboard.lock().await;
    let snapshot = service.snapshot();
    let filters = service.filters();
    let html_body = format!(
        "<h1>Server Status</h1><p>Current Time (Server): {}</p><hr>\
         <p>Dataset rows: {}</p>\
         <p>Employees: {}</p>\
         <p>Selected: year={:?}, month={:?}, employees={}, date={:?}</p>\
         <p>Batch warnings: {}</p>\
         <p>Last refreshed: {}</p>",
        chrono::Local::now().to_rfc3339(),
        service.dataset().rows.len(),
        snapshot.options.employees.len(),
        filters.selected_year,
        filters.selected_month,
        filters.selected_employees.len(),
        filters.selected_date,
        snapshot.warnings.len(),
        snapshot.last_refreshed.as_deref().unwrap_or("never"),
    );
    Ok(Html(html_body))
}
