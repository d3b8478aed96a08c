//! Actix-web JSON API over the story store (feature-gated)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, atomic::{AtomicU64, Ordering}};
use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use actix_web::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::persistence::gateway::{GatewayError, LocalGateway, Session, SharedStore, StoryGateway};
use crate::persistence::settings::AppSettings;
use crate::persistence::store::{GameUpdate, PlayResult, SearchQuery};
use crate::story::graph::StoryNode;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_NAME_HEADER: &str = "X-User-Name";
pub const API_KEY_HEADER: &str = "X-API-Key";

// Store server state for stop/restart
struct ServerState {
    handle: Option<actix_web::dev::ServerHandle>,
    runtime: Option<Runtime>,
}

static SERVER_STATE: once_cell::sync::Lazy<Arc<Mutex<ServerState>>> = once_cell::sync::Lazy::new(|| {
    Arc::new(Mutex::new(ServerState { handle: None, runtime: None }))
});

static REQ_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Shared per-app state handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    store: SharedStore,
    api_key: Option<String>,
    log_dir: Option<PathBuf>,
}

impl ApiContext {
    pub fn new(store: SharedStore, api_key: Option<String>, log_dir: Option<PathBuf>) -> Self {
        Self { store, api_key, log_dir }
    }

    fn log(&self, line: &str) {
        log::debug!("{}", line);
        if let Some(dir) = &self.log_dir {
            log_line(dir, line);
        }
    }
}

fn ensure_dir(p: &Path) {
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

fn log_line(dir: &Path, line: &str) {
    use std::io::Write;
    let now = time::OffsetDateTime::now_utc();
    let date = time::macros::format_description!("[year][month][day]");
    let ts = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let fname = match now.format(&date) { Ok(s) => format!("api_{}.log", s), Err(_) => "api.log".to_string() };
    let path = dir.join(fname);
    ensure_dir(&path);
    let ts_s = now.format(&ts).unwrap_or_else(|_| String::new());
    let msg = format!("{} | {}\n", ts_s, line);
    if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        let _ = f.write_all(msg.as_bytes());
    }
}

fn next_request_id() -> String {
    let n = REQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!("{}-{}", now, n)
}

#[derive(Serialize)]
struct ErrorDto {
    error: String,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorDto { error: self.to_string() })
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn check_api_key(req: &HttpRequest, ctx: &ApiContext) -> bool {
    match &ctx.api_key {
        None => true,
        Some(required) => header(req, API_KEY_HEADER).is_some_and(|v| &v == required),
    }
}

/// Session comes from headers set by the auth proxy in front of the API.
fn session_from(req: &HttpRequest) -> Session {
    match header(req, USER_ID_HEADER) {
        Some(user) => Session::authenticated(user, header(req, USER_NAME_HEADER)),
        None => Session::anonymous(),
    }
}

/// Run one gateway call for a request, with key check and traffic logging.
fn respond<T: Serialize>(
    ctx: &ApiContext,
    req: &HttpRequest,
    status: StatusCode,
    call: impl FnOnce(&LocalGateway) -> Result<T, GatewayError>,
) -> HttpResponse {
    let rid = next_request_id();
    let peer = req.peer_addr().map(|a| a.to_string()).unwrap_or_else(|| "unknown".into());
    if !check_api_key(req, ctx) {
        ctx.log(&format!("RID={} {} {} from {} rejected: api key", rid, req.method(), req.path(), peer));
        return HttpResponse::Unauthorized().json(ErrorDto { error: "invalid or missing api key".into() });
    }
    let gateway = LocalGateway::new(ctx.store.clone(), session_from(req));
    let t0 = std::time::Instant::now();
    let out = call(&gateway);
    let dt = t0.elapsed();
    match out {
        Ok(body) => {
            ctx.log(&format!("RID={} {} {} from {} OK dt_ms={}", rid, req.method(), req.path(), peer, dt.as_millis()));
            HttpResponse::build(status).json(body)
        }
        Err(e) => {
            ctx.log(&format!("RID={} {} {} from {} ERR {} dt_ms={}", rid, req.method(), req.path(), peer, e, dt.as_millis()));
            e.error_response()
        }
    }
}

#[derive(Deserialize)]
struct CreateGameBody {
    name: String,
    description: String,
}

#[derive(Deserialize)]
struct SaveNodesBody {
    nodes: Vec<StoryNode>,
}

#[derive(Deserialize)]
struct RecordBody {
    result: PlayResult,
}

#[derive(Deserialize)]
struct RatingBody {
    rating: u8,
}

async fn search_games(ctx: web::Data<ApiContext>, req: HttpRequest, query: web::Query<SearchQuery>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::OK, |g| g.search_games(&query))
}

async fn create_game(ctx: web::Data<ApiContext>, req: HttpRequest, body: web::Json<CreateGameBody>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::CREATED, |g| g.create_game(&body.name, &body.description))
}

async fn find_game(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::OK, |g| g.find_game(*id))
}

async fn update_game(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>, body: web::Json<GameUpdate>) -> HttpResponse {
    let update = body.into_inner();
    respond(&ctx, &req, StatusCode::OK, |g| g.update_game(*id, update))
}

async fn load_game(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::OK, |g| g.load_game(*id))
}

async fn save_nodes(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>, body: web::Json<SaveNodesBody>) -> HttpResponse {
    let nodes = body.into_inner().nodes;
    respond(&ctx, &req, StatusCode::OK, |g| g.save_nodes(*id, nodes))
}

async fn record_play(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>, body: web::Json<RecordBody>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::CREATED, |g| g.record_play(*id, body.result))
}

async fn rate_game(ctx: web::Data<ApiContext>, req: HttpRequest, id: web::Path<Uuid>, body: web::Json<RatingBody>) -> HttpResponse {
    respond(&ctx, &req, StatusCode::CREATED, |g| g.rate_game(*id, body.rating))
}

/// Route table, shared by the server and tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/games")
            .route("", web::get().to(search_games))
            .route("", web::post().to(create_game))
            .route("/{id}", web::get().to(find_game))
            .route("/{id}", web::patch().to(update_game))
            .route("/{id}/nodes", web::get().to(load_game))
            .route("/{id}/nodes", web::put().to(save_nodes))
            .route("/{id}/records", web::post().to(record_play))
            .route("/{id}/ratings", web::post().to(rate_game)),
    );
}

fn context_for(cfg: &AppSettings, store: SharedStore) -> ApiContext {
    ApiContext::new(store, cfg.api_key.clone(), Some(cfg.api_log_dir()))
}

async fn serve(bind: String, ctx: ApiContext, register: bool) -> std::io::Result<()> {
    ctx.log(&format!("Server starting on {}", bind));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ctx.clone()))
            .configure(routes)
    })
    .bind(&bind)?
    .run();
    if register {
        if let Ok(mut st) = SERVER_STATE.lock() {
            st.handle = Some(server.handle());
        }
    }
    server.await
}

/// Start the API on a background thread with its own tokio runtime.
pub fn start_server(cfg: &AppSettings, store: SharedStore) -> anyhow::Result<()> {
    let bind = cfg.api_endpoint();
    let ctx = context_for(cfg, store);
    stop_server();

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build() {
                Ok(r) => r,
                Err(e) => {
                    log::error!("failed to create tokio runtime for API: {}", e);
                    return;
                }
            };

        if let Err(e) = rt.block_on(serve(bind.clone(), ctx, true)) {
            log::error!("API server on {} stopped: {}", bind, e);
        }
        if let Ok(mut st) = SERVER_STATE.lock() {
            st.handle = None;
            st.runtime = Some(rt);
        }
    });
    Ok(())
}

pub fn stop_server() {
    let (handle, rt) = match SERVER_STATE.lock() {
        Ok(mut st) => (st.handle.take(), st.runtime.take()),
        Err(_) => return,
    };
    if let Some(h) = handle {
        let _ = h.stop(false);
    }
    if let Some(r) = rt {
        r.shutdown_timeout(Duration::from_millis(100));
    }
}

pub fn is_running() -> bool {
    SERVER_STATE.lock().map(|st| st.handle.is_some()).unwrap_or(false)
}

/// Serve in the foreground until the process is stopped.
pub fn run_blocking(cfg: &AppSettings, store: SharedStore) -> anyhow::Result<()> {
    let bind = cfg.api_endpoint();
    let ctx = context_for(cfg, store);
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    log::info!("serving story API on {}", bind);
    rt.block_on(serve(bind, ctx, false))?;
    Ok(())
}
