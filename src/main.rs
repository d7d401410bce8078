use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use scraper::Html;
use serde_json::json;

mod aggregate;
mod cache;
mod config;
mod extract;
mod handoff;
mod models;
mod parse;
mod watcher;

use cache::SummaryCache;
use config::Config;
use extract::ExtractionError;
use handoff::{build_handoff_url, HandoffTarget};
use models::{
    AugmentRequest, AugmentResponse, Command, ExtractReply, ImportFailure, ImportQuery,
    ImportRequest, ImportResponse, PageSource, PrintJobSummary,
};
use watcher::DialogWatcher;

const MAKERWORLD_HOME: &str = "https://makerworld.com";
const STATUS_REDIRECTING: &str = "Data extracted! Redirecting to 3D Print Wrap...";
const STATUS_FAILED: &str = "Failed to extract data. Please try again.";
const STATUS_WRONG_PAGE: &str = "Please navigate to a makerworld.com print page to use this extension.";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    cache: Arc<SummaryCache>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let cache = Arc::new(match &config.cache_path {
        Some(path) => SummaryCache::with_file(path),
        None => SummaryCache::in_memory(),
    });

    if let Some(path) = &config.watch_file {
        let watcher = DialogWatcher::new(path, config.watch_interval, cache.clone());
        tokio::spawn(watcher.run());
    }

    let bind_addr = config.bind_addr;
    let state = AppState { config: Arc::new(config), cache };

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("could not bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("3DPrintWrap: Extension initialized, listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app(state)).await {
        tracing::error!("server error: {}", e);
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/message", post(message_endpoint))
        .route("/import", post(import_endpoint).get(import_redirect))
        .route("/augment", post(augment_endpoint))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Extraction command. Failures are answered as values, never as HTTP errors.
async fn message_endpoint(State(state): State<AppState>, Json(command): Json<Command>) -> Json<ExtractReply> {
    match command {
        Command::Extract(source) => {
            match extract::extract_page(&source, state.config.insecure_ssl).await {
                Ok(summary) => Json(ExtractReply::ok(summary)),
                Err(e) => {
                    tracing::error!("Extraction error: {}", e);
                    Json(ExtractReply::failed(e.to_string()))
                }
            }
        }
    }
}

async fn import_endpoint(State(state): State<AppState>, Json(req): Json<ImportRequest>) -> Response {
    // Posted markup may come from a saved snapshot; anything else must be MakerWorld.
    let url = &req.source.url;
    let local_snapshot = req.source.html.is_some() && extract::is_local_snapshot(url);
    if !local_snapshot && !extract::is_supported_page(url) {
        return failure(StatusCode::BAD_REQUEST, STATUS_WRONG_PAGE, "unsupported page");
    }

    let summary = match extract::extract_page(&req.source, state.config.insecure_ssl).await {
        Ok(summary) => summary,
        Err(e) => return extraction_failure(e),
    };

    match hand_off(&state, &summary, req.target).await {
        Ok(redirect_url) => {
            let response = ImportResponse {
                status: STATUS_REDIRECTING.to_string(),
                redirect_url,
                data: summary,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(detail) => failure(StatusCode::INTERNAL_SERVER_ERROR, STATUS_FAILED, detail),
    }
}

/// Toolbar-style entry point: MakerWorld pages are imported and redirected to
/// the app, anything else is sent to MakerWorld. The server-side fetch only
/// sees the page as served, before any script opens the Print Plates dialog,
/// so live pages usually answer 422; the watcher and `POST /import` with
/// posted markup are the working paths.
async fn import_redirect(State(state): State<AppState>, Query(query): Query<ImportQuery>) -> Response {
    if !extract::is_supported_page(&query.url) {
        return Redirect::to(MAKERWORLD_HOME).into_response();
    }

    let source = PageSource { url: query.url, html: None };
    let summary = match extract::extract_page(&source, state.config.insecure_ssl).await {
        Ok(summary) => summary,
        Err(e) => return extraction_failure(e),
    };

    match hand_off(&state, &summary, HandoffTarget::Home).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(detail) => failure(StatusCode::INTERNAL_SERVER_ERROR, STATUS_FAILED, detail),
    }
}

async fn augment_endpoint(Json(req): Json<AugmentRequest>) -> Json<AugmentResponse> {
    let mut document = Html::parse_document(&req.html);
    let augmented = watcher::augment(&mut document);
    if augmented > 0 {
        tracing::info!("3DPrintWrap: Button injected successfully");
    }
    Json(AugmentResponse { augmented, html: document.html() })
}

/// Store the summary in the cache slot, then build the handoff URL.
async fn hand_off(state: &AppState, summary: &PrintJobSummary, target: HandoffTarget) -> Result<String, String> {
    state.cache.store(summary).await.map_err(|e| e.to_string())?;
    let url = build_handoff_url(summary, target).map_err(|e| e.to_string())?;
    tracing::info!("3DPrintWrap: Redirecting to {}", url);
    Ok(url.to_string())
}

fn extraction_failure(e: ExtractionError) -> Response {
    let status = match &e {
        ExtractionError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        ExtractionError::NotHtml | ExtractionError::DialogNotFound => StatusCode::UNPROCESSABLE_ENTITY,
        ExtractionError::Upstream | ExtractionError::Request(_) => StatusCode::BAD_GATEWAY,
    };
    tracing::error!("Extraction error: {}", e);
    failure(status, STATUS_FAILED, e.to_string())
}

fn failure(status: StatusCode, message: &str, error: impl Into<String>) -> Response {
    let body = ImportFailure { status: message.to_string(), error: error.into() };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    const PAGE: &str = r#"<html><body>
        <h1 class="title-for-share">Planter</h1>
        <div class="swiper-slide swiper-slide-active"><img src="https://cdn.makerworld.com/planter.png"></div>
        <div class="MuiDialog-paper">
          <div class="MuiDialogTitle-root"><p>Print Plates</p></div>
          <div class="MuiDialogContent-root">
            <div class="mw-css-8atqhb">
              <div class="config_info">
                <div class="mw-css-18oolko"><span>2 h 15 min</span></div>
                <div class="mw-css-18oolko"><span>230 g</span></div>
              </div>
              <div class="filaments_info">
                <div class="mw-css-sbssk2" style="background: red"><span class="mw-css-bg3st0">PLA｜</span><span class="mw-css-1qxtz39">50 g</span></div>
              </div>
            </div>
            <div class="mw-css-8atqhb">
              <div class="config_info">
                <div class="mw-css-18oolko"><span>45 min</span></div>
                <div class="mw-css-18oolko"><span>150 g</span></div>
              </div>
              <div class="filaments_info">
                <div class="mw-css-sbssk2" style="background: red"><span class="mw-css-bg3st0">PLA｜</span><span class="mw-css-1qxtz39">50 g</span></div>
              </div>
            </div>
          </div>
        </div>
        </body></html>"#;

    const PAGE_URL: &str = "https://makerworld.com/en/models/4242";

    fn server() -> (TestServer, Arc<SummaryCache>) {
        let config = Config::from_lookup(|_| None).unwrap();
        let cache = Arc::new(SummaryCache::in_memory());
        let state = AppState { config: Arc::new(config), cache: cache.clone() };
        (TestServer::new(app(state)).unwrap(), cache)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (server, _) = server();
        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn extract_message_returns_summary() {
        let (server, _) = server();
        let response = server
            .post("/message")
            .json(&json!({"action": "extract", "url": PAGE_URL, "html": PAGE}))
            .await;
        response.assert_status_ok();

        let reply: ExtractReply = response.json();
        assert!(reply.success);
        let data = reply.data.unwrap();
        assert_eq!(data.print_time, "3 h");
        assert_eq!(data.total_weight, "380 g");
        assert_eq!(data.filaments.len(), 1);
        assert_eq!(data.filaments[0].weight, "100 g");
        assert!(data.nozzle_size.is_none());
    }

    #[tokio::test]
    async fn extract_message_reports_failure_as_value() {
        let (server, _) = server();
        let response = server
            .post("/message")
            .json(&json!({"action": "extract", "url": PAGE_URL, "html": "<p>no dialog</p>"}))
            .await;
        response.assert_status_ok();

        let reply: ExtractReply = response.json();
        assert!(!reply.success);
        assert!(reply.data.is_none());
        assert_eq!(reply.error.as_deref(), Some("Print Plates dialog not found on the page"));
    }

    #[tokio::test]
    async fn import_caches_and_builds_queue_url() {
        let (server, cache) = server();
        let response = server
            .post("/import")
            .json(&json!({"url": PAGE_URL, "html": PAGE, "target": "queue"}))
            .await;
        response.assert_status_ok();

        let body: ImportResponse = response.json();
        assert_eq!(body.status, STATUS_REDIRECTING);
        assert!(body.redirect_url.starts_with("https://app.3dprintwrap.com/queue?title=Planter"));
        assert!(!body.redirect_url.contains("nozzleSize"));
        assert_eq!(cache.latest().await, Some(body.data));
    }

    #[tokio::test]
    async fn import_defaults_to_home_target() {
        let (server, _) = server();
        let response = server.post("/import").json(&json!({"url": PAGE_URL, "html": PAGE})).await;
        let body: ImportResponse = response.json();
        assert!(body.redirect_url.starts_with("https://app.3dprintwrap.com/?printTime="));
        assert!(!body.redirect_url.contains("pageUrl"));
    }

    #[tokio::test]
    async fn import_rejects_other_sites() {
        let (server, cache) = server();
        let response = server.post("/import").json(&json!({"url": "https://example.com/"})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ImportFailure = response.json();
        assert_eq!(body.status, STATUS_WRONG_PAGE);
        assert!(cache.latest().await.is_none());
    }

    #[tokio::test]
    async fn import_rejects_posted_markup_from_other_sites() {
        let (server, cache) = server();
        let response = server
            .post("/import")
            .json(&json!({"url": "https://example.com/", "html": PAGE}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ImportFailure = response.json();
        assert_eq!(body.status, STATUS_WRONG_PAGE);
        assert!(cache.latest().await.is_none());
    }

    #[tokio::test]
    async fn import_accepts_saved_snapshot() {
        let (server, cache) = server();
        let response = server
            .post("/import")
            .json(&json!({"url": "file:///home/me/planter.html", "html": PAGE}))
            .await;
        response.assert_status_ok();
        let body: ImportResponse = response.json();
        assert_eq!(cache.latest().await, Some(body.data));
    }

    #[tokio::test]
    async fn import_without_dialog_is_unprocessable() {
        let (server, _) = server();
        let response = server
            .post("/import")
            .json(&json!({"url": PAGE_URL, "html": "<div class=\"MuiDialog-paper\"></div>"}))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: ImportFailure = response.json();
        assert_eq!(body.status, STATUS_FAILED);
    }

    #[tokio::test]
    async fn redirect_sends_other_sites_to_makerworld() {
        let (server, _) = server();
        let response = server
            .get("/import")
            .add_query_param("url", "https://example.com/thing")
            .await;
        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), MAKERWORLD_HOME);
    }

    #[tokio::test]
    async fn augment_is_idempotent() {
        let (server, _) = server();
        let first: AugmentResponse = server.post("/augment").json(&json!({"html": PAGE})).await.json();
        assert_eq!(first.augmented, 1);

        let second: AugmentResponse = server
            .post("/augment")
            .json(&json!({"html": first.html}))
            .await
            .json();
        assert_eq!(second.augmented, 0);
        assert_eq!(second.html.matches("copy-to-3dprintwrap-btn").count(), 1);
    }
}
