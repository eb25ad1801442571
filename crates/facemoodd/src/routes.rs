use crate::engine::{DetectOutcome, EngineError};
use crate::error::AppError;
use crate::flow::{self, Flow, MSG_NO_UPLOAD, MSG_UNSUPPORTED_UPLOAD};
use crate::render::render;
use crate::session::SessionContext;
use crate::state::AppState;
use crate::view::Menu;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use facemood_core::input;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

/// Multipart field carrying the uploaded image.
const UPLOAD_FIELD: &str = "image";

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/logout", post(logout))
        .route("/admin/approve", post(approve))
        .route("/admin/remove", post(remove))
        .route("/detect", post(detect))
        .route("/health", get(health));

    if let Some(path) = &state.config.background_image {
        router = router.route_service("/background", ServeFile::new(path));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct MenuQuery {
    menu: Option<String>,
}

impl MenuQuery {
    fn menu(&self) -> Menu {
        match self.menu.as_deref() {
            Some(m) if m.eq_ignore_ascii_case("register") => Menu::Register,
            _ => Menu::Login,
        }
    }
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct Target {
    username: String,
}

/// Run a transition that reads or writes the user store on the blocking pool.
async fn with_flow<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(Flow<'_>) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let auth = Arc::clone(&state.auth);
    tokio::task::spawn_blocking(move || f(Flow::new(&auth))).await?
}

async fn index(
    State(state): State<AppState>,
    ctx: SessionContext,
    Query(query): Query<MenuQuery>,
) -> Result<Response, AppError> {
    let session = ctx.state.clone();
    let menu = query.menu();
    let view = with_flow(&state, move |flow| flow.show(&session, menu)).await?;
    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

async fn login(
    State(state): State<AppState>,
    mut ctx: SessionContext,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    let mut session = ctx.state.clone();
    let (view, session) = with_flow(&state, move |flow| {
        let view = flow.login(&mut session, &form.username, &form.password)?;
        Ok((view, session))
    })
    .await?;
    ctx.state = session;
    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

async fn register(
    State(state): State<AppState>,
    ctx: SessionContext,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    let session = ctx.state.clone();
    let view = with_flow(&state, move |flow| {
        flow.register(&session, &form.username, &form.password)
    })
    .await?;
    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

async fn logout(State(state): State<AppState>, mut ctx: SessionContext) -> Response {
    let view = state.flow().logout(&mut ctx.state);
    ctx.commit(&state.sessions, render(&view, &state.render_options()))
}

async fn approve(
    State(state): State<AppState>,
    ctx: SessionContext,
    Form(target): Form<Target>,
) -> Result<Response, AppError> {
    let session = ctx.state.clone();
    let view = with_flow(&state, move |flow| flow.approve(&session, &target.username)).await?;
    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

async fn remove(
    State(state): State<AppState>,
    ctx: SessionContext,
    Form(target): Form<Target>,
) -> Result<Response, AppError> {
    let session = ctx.state.clone();
    let view = with_flow(&state, move |flow| flow.remove(&session, &target.username)).await?;
    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

async fn detect(
    State(state): State<AppState>,
    ctx: SessionContext,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let username = flow::require_user(&ctx.state)?.to_string();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid upload: {e}")))?;
        upload = Some((file_name, data));
        break;
    }

    let flow = state.flow();
    let view = match upload {
        Some((file_name, data)) if !data.is_empty() => {
            if !input::has_accepted_extension(&file_name) {
                tracing::info!(username = %username, file_name = %file_name, "upload rejected: unsupported type");
                flow.detect_rejected(&ctx.state, MSG_UNSUPPORTED_UPLOAD.to_string())?
            } else {
                tracing::info!(username = %username, file_name = %file_name, bytes = data.len(), "detect requested");
                match run_upload(&state, &file_name, data).await {
                    Ok(outcome) => flow.detected(&ctx.state, outcome)?,
                    Err(AppError::Engine(EngineError::Input(err))) => {
                        flow.detect_rejected(&ctx.state, format!("Could not read the image: {err}"))?
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        _ => flow.detect_rejected(&ctx.state, MSG_NO_UPLOAD.to_string())?,
    };

    Ok(ctx.commit(&state.sessions, render(&view, &state.render_options())))
}

/// Stage the upload in a scratch file for the engine. The file is removed
/// when this returns, whatever the outcome.
async fn run_upload(state: &AppState, file_name: &str, data: Bytes) -> Result<DetectOutcome, AppError> {
    let suffix = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let scratch = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut scratch = tempfile::Builder::new()
            .prefix("facemood-upload-")
            .suffix(&suffix)
            .tempfile()?;
        scratch.write_all(&data)?;
        scratch.flush()?;
        Ok(scratch)
    })
    .await??;

    Ok(state.engine.detect(scratch.path()).await?)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let auth = Arc::clone(&state.auth);
    let users = tokio::task::spawn_blocking(move || auth.list_all()).await??.len();
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.config.model_path.display().to_string(),
        "labels": state.config.labels.as_slice(),
        "users": users,
        "sessions": state.sessions.len(),
    })))
}
