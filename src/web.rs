use crate::semantic::{Passage, SearchError, SemanticSearchError, SemanticSearchService, ServiceInfo};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<SemanticSearchService>,
}

pub fn router(service: Arc<SemanticSearchService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/info", get(info))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(service: Arc<SemanticSearchService>, addr: &str) -> anyhow::Result<()> {
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Load the search resources, then serve until interrupted.
pub fn start_daemon(service: Arc<SemanticSearchService>, addr: &str) -> anyhow::Result<()> {
    // no point listening if nothing can be served
    service.initialize()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service, addr))
}

#[derive(Debug)]
enum HttpError {
    Service(SemanticSearchError),
    Task(tokio::task::JoinError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            HttpError::Service(SemanticSearchError::Search(
                SearchError::EmptyQuery
                | SearchError::InvalidK { .. }
                | SearchError::DimensionMismatch { .. },
            )) => StatusCode::BAD_REQUEST,
            _ => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match self {
            HttpError::Service(err) => err.to_string(),
            HttpError::Task(err) => err.to_string(),
        };

        (status, Json(json!({"error": message}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SemanticSearchError>,
{
    fn from(err: E) -> Self {
        Self::Service(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    One(String),
    Many(Vec<String>),
}

impl QueryInput {
    fn into_vec(self) -> Vec<String> {
        match self {
            QueryInput::One(query) => vec![query],
            QueryInput::Many(queries) => queries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: QueryInput,

    /// Passages per query. Defaults to the configured count.
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Vec<Passage>>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    let service = state.service.clone();

    log::debug!("payload: {payload:?}");

    let results = tokio::task::spawn_blocking(move || {
        let k = service.resolve_limit(payload.limit)?;
        let queries = payload.query.into_vec();
        service.search(queries.as_slice(), k)
    })
    .await
    .map_err(HttpError::Task)??;

    Ok(Json(SearchResponse { results }))
}

async fn info(State(state): State<Arc<SharedState>>) -> Result<Json<ServiceInfo>, HttpError> {
    let service = state.service.clone();

    let info = tokio::task::spawn_blocking(move || service.info())
        .await
        .map_err(HttpError::Task)??;

    Ok(Json(info))
}
