use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use archive::ZipArchive;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use core_model::{Attachment, StoredMessage};
use serde::{Deserialize, Serialize};
use store_sqlite::SqliteStore;
use tower_http::services::ServeDir;
use tracing::{info, warn};

const UPLOAD_LIMIT: usize = 1024 * 1024 * 1024;
const VIEWER_INDEX: &str = "/static/index.html";

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    /// Browser viewer assets served under `/static`.
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ThreadMessage {
    pub timestamp: u64,
    pub text: String,
    pub user: String,
    pub attachments: Vec<Attachment>,
    pub reacts: BTreeMap<String, Vec<String>>,
    /// Reply that was also broadcast to the channel.
    pub sent: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ParentMessage {
    pub timestamp: u64,
    pub text: String,
    pub user: String,
    pub attachments: Vec<Attachment>,
    pub reacts: BTreeMap<String, Vec<String>>,
    pub thread: Vec<ThreadMessage>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ImportedArchive {
    pub file: String,
    pub channels: usize,
    pub messages: usize,
    pub users: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessagesParams {
    channel: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/channels", get(list_channels))
        .route("/messages", get(get_messages))
        .route("/upload", post(upload));
    if let Some(dir) = &state.static_dir {
        app = app
            .route("/", get(|| async { Redirect::to(VIEWER_INDEX) }))
            .nest_service("/static", ServeDir::new(dir));
    }
    app.layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .with_state(state)
}

/// Serves the read API, and the viewer when `static_dir` is set, on `bind`
/// until ctrl-c.
pub async fn serve(
    store: Arc<SqliteStore>,
    bind: &str,
    static_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, viewer = ?static_dir, "listening");
    axum::serve(listener, router(AppState { store, static_dir }))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn internal(context: &str, err: anyhow::Error) -> (StatusCode, String) {
    warn!(error = %err, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{context}: {err:#}"),
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

async fn list_channels(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    state
        .store
        .list_channels()
        .map(Json)
        .map_err(|err| internal("error listing channels", err))
}

async fn get_messages(
    State(state): State<AppState>,
    Query(params): Query<MessagesParams>,
) -> ApiResult<Vec<ParentMessage>> {
    let channel = params
        .channel
        .filter(|c| !c.is_empty())
        .ok_or_else(|| bad_request("missing channel"))?;
    let from = parse_millis("from", params.from.as_deref())?;
    let to = parse_millis("to", params.to.as_deref())?;

    let parents = state
        .store
        .get_parent_messages(&channel, from, to)
        .map_err(|err| internal("error getting messages", err))?;
    let mut out = Vec::with_capacity(parents.len());
    for parent in parents {
        let replies = state
            .store
            .get_thread_replies(&channel, &parent.timestamp)
            .map_err(|err| internal("error getting messages", err))?;
        out.push(ParentMessage {
            timestamp: whole_seconds(&parent.timestamp),
            text: parent.text,
            user: parent.author,
            attachments: parent.attachments,
            reacts: parent.reactions,
            thread: replies.into_iter().map(thread_message).collect(),
        });
    }
    Ok(Json(out))
}

fn thread_message(reply: StoredMessage) -> ThreadMessage {
    ThreadMessage {
        timestamp: whole_seconds(&reply.timestamp),
        text: reply.text,
        user: reply.author,
        attachments: reply.attachments,
        reacts: reply.reactions,
        sent: reply.is_top_level,
    }
}

fn parse_millis(name: &str, value: Option<&str>) -> Result<DateTime<Utc>, (StatusCode, String)> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request(format!("missing {name}")))?;
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| bad_request(format!("invalid {name}: {value}")))
}

fn whole_seconds(timestamp: &str) -> u64 {
    timestamp
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Vec<ImportedArchive>> {
    let mut imported = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| bad_request(format!("invalid multipart payload: {err}")))?
    {
        let Some(file) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| bad_request(format!("invalid upload {file}: {err}")))?;
        info!(file = %file, bytes = bytes.len(), "archive uploaded");

        let store = state.store.clone();
        let label = file.clone();
        let summary = tokio::task::spawn_blocking(move || {
            let source = ZipArchive::from_bytes(bytes.to_vec(), label)?;
            ingest::import_archive(&source, store.as_ref(), |_| {}).map_err(anyhow::Error::from)
        })
        .await
        .map_err(|err| internal("import task failed", err.into()))?
        .map_err(|err| bad_request(format!("error importing {file}: {err:#}")))?;

        imported.push(ImportedArchive {
            file,
            channels: summary.channels,
            messages: summary.messages,
            users: summary.users,
        });
    }
    if imported.is_empty() {
        return Err(bad_request("no archive in upload"));
    }
    Ok(Json(imported))
}
