use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Block, Like, Message};
use crate::presence::PresenceRegistry;
use crate::{auth, blocks, db, delivery, likes, messages, users, ws};
use anyhow::Context;
use axum::{
    extract::{Extension, Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<SqliteConnectionManager>,
    pub presence: Arc<PresenceRegistry>,
    pub config: Config,
    pub jwt_secret: Vec<u8>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir).context("create data dir")?;
        let pool = db::open_pool(config.data_dir.join("meetpoint.db"))?;
        // a fresh process has no live connections; durable flags must agree
        let conn = pool.get()?;
        let reset = users::reset_presence(&conn)?;
        drop(conn);
        if reset > 0 {
            tracing::info!(users = reset, "reset stale online flags");
        }
        let jwt_secret = match &config.jwt_secret {
            Some(s) => s.as_bytes().to_vec(),
            None => {
                use rand::RngCore;
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                tracing::warn!(
                    secret = %STANDARD.encode(&secret),
                    "no jwt secret configured, generated a dev secret"
                );
                secret
            }
        };
        Ok(Self {
            pool,
            presence: Arc::new(PresenceRegistry::new()),
            config,
            jwt_secret,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/messages", post(send_message))
        .route("/api/messages/:id/read", post(mark_read))
        .route("/api/conversation/:other_user_id", get(conversation))
        .route("/api/conversations", get(conversations))
        .route("/api/likes", post(like))
        .route("/api/likes/:liked_id", delete(unlike))
        .route("/api/blocks", post(block))
        .route("/api/blocks/:blocked_id", delete(unblock))
        .route("/api/online-status", post(online_status))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: axum::http::Request<B>,
    next: Next<B>,
) -> Result<Response> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let claims = auth::verify_jwt(&state.jwt_secret, token)?;
                req.extensions_mut().insert(claims);
                return Ok(next.run(req).await);
            }
        }
    }
    Err(Error::Unauthenticated)
}

#[derive(Deserialize)]
struct SendMessageReq {
    receiver_id: Uuid,
    content: String,
}

async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<SendMessageReq>,
) -> Result<impl IntoResponse> {
    let sender = claims.user_id()?;
    let msg = delivery::send_message(&state, sender, req.receiver_id, &req.content)?;
    Ok((StatusCode::CREATED, Json(msg)))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>> {
    let reader = claims.user_id()?;
    let conn = state.pool.get()?;
    Ok(Json(messages::mark_read(&conn, id, reader)?))
}

async fn conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(other_user_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>> {
    let user = claims.user_id()?;
    let conn = state.pool.get()?;
    if !users::user_exists(&conn, other_user_id)? {
        return Err(Error::NotFound("user"));
    }
    Ok(Json(messages::conversation_between(
        &conn,
        user,
        other_user_id,
    )?))
}

async fn conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
) -> Result<Json<Vec<Message>>> {
    let user = claims.user_id()?;
    let conn = state.pool.get()?;
    Ok(Json(messages::latest_message_per_counterpart(&conn, user)?))
}

#[derive(Deserialize)]
struct LikeReq {
    liked_id: Uuid,
}

#[derive(Serialize)]
struct LikeResp {
    like: Like,
    is_match: bool,
}

async fn like(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<LikeReq>,
) -> Result<impl IntoResponse> {
    let liker = claims.user_id()?;
    let mut conn = state.pool.get()?;
    let (like, is_match) = likes::like_and_check_match(&mut conn, liker, req.liked_id)?;
    Ok((StatusCode::CREATED, Json(LikeResp { like, is_match })))
}

#[derive(Serialize)]
struct RemovedResp {
    removed: bool,
}

async fn unlike(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(liked_id): Path<Uuid>,
) -> Result<Json<RemovedResp>> {
    let liker = claims.user_id()?;
    let conn = state.pool.get()?;
    let removed = likes::remove_like(&conn, liker, liked_id)?;
    Ok(Json(RemovedResp { removed }))
}

#[derive(Deserialize)]
struct BlockReq {
    blocked_id: Uuid,
}

async fn block(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<BlockReq>,
) -> Result<(StatusCode, Json<Block>)> {
    let blocker = claims.user_id()?;
    let conn = state.pool.get()?;
    let block = blocks::create_block(&conn, blocker, req.blocked_id)?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn unblock(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(blocked_id): Path<Uuid>,
) -> Result<Json<RemovedResp>> {
    let blocker = claims.user_id()?;
    let conn = state.pool.get()?;
    let removed = blocks::remove_block(&conn, blocker, blocked_id)?;
    Ok(Json(RemovedResp { removed }))
}

#[derive(Deserialize)]
struct OnlineStatusReq {
    is_online: bool,
}

#[derive(Serialize)]
struct OkResp {
    ok: bool,
}

/// Manual presence toggle for REST callers without a live connection.
async fn online_status(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Json(req): Json<OnlineStatusReq>,
) -> Result<Json<OkResp>> {
    let user = claims.user_id()?;
    let conn = state.pool.get()?;
    users::set_presence(&conn, user, req.is_online, db::now_millis())?;
    Ok(Json(OkResp { ok: true }))
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> anyhow::Result<()> {
    let bind = config.bind.clone();
    let state = AppState::new(config)?;
    let addr: SocketAddr = bind.parse()?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

// Integration tests live in the tests/ directory
