use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sybil_core::{
    Artifact, ArtifactKind, Error, GenerationRequest, Health, ImageKind, ImageService, Loader,
    ServiceStats, StyleSnapshot, DEFAULT_RECENT_LIMIT,
};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

type AppState<L> = State<Arc<ImageService<L>>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    health: Health,
}

#[derive(Serialize)]
struct GenerationResponse {
    success: bool,
    path: String,
    file_path: String,
    filename: String,
    size: String,
}

#[derive(Serialize)]
struct UnloadResponse {
    success: bool,
    message: &'static str,
}

#[derive(Deserialize)]
struct UpdateStylesRequest {
    avatar_styles: Option<Vec<String>>,
    banner_styles: Option<Vec<String>>,
}

#[derive(Serialize)]
struct UpdateStylesResponse {
    success: bool,
    avatar_styles: usize,
    banner_styles: usize,
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RecentFile {
    filename: String,
    #[serde(rename = "type")]
    kind: ArtifactKind,
    size_kb: f64,
    created_at: String,
}

impl From<Artifact> for RecentFile {
    fn from(artifact: Artifact) -> Self {
        Self {
            size_kb: artifact.size_kb(),
            created_at: artifact.modified.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            filename: artifact.filename,
            kind: artifact.kind,
        }
    }
}

#[derive(Serialize)]
struct RecentResponse {
    files: Vec<RecentFile>,
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    deleted: usize,
}

pub fn router<L: Loader>(service: Arc<ImageService<L>>) -> Router {
    Router::new()
        .route("/health", get(health::<L>))
        .route("/generate-avatar", post(generate_avatar::<L>))
        .route("/generate-banner", post(generate_banner::<L>))
        .route("/unload", post(unload::<L>))
        .route("/styles", get(get_styles::<L>).put(update_styles::<L>))
        .route("/stats", get(stats::<L>))
        .route("/recent", get(recent::<L>))
        .route("/clear-output", post(clear_output::<L>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health<L: Loader>(State(service): AppState<L>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        health: service.health(),
    })
}

async fn generate_avatar<L: Loader>(
    State(service): AppState<L>,
    Json(req): Json<GenerationRequest>,
) -> ApiResult<GenerationResponse> {
    generate(service, ImageKind::Avatar, req).await
}

async fn generate_banner<L: Loader>(
    State(service): AppState<L>,
    Json(req): Json<GenerationRequest>,
) -> ApiResult<GenerationResponse> {
    generate(service, ImageKind::Banner, req).await
}

async fn generate<L: Loader>(
    service: Arc<ImageService<L>>,
    kind: ImageKind,
    req: GenerationRequest,
) -> ApiResult<GenerationResponse> {
    // Detached so a client hanging up does not abandon a render half way
    // through saving it.
    let generation = tokio::spawn(async move { service.generate(kind, &req).await })
        .await
        .map_err(|e| Error::GenerationFailed(e.into()))??;

    let path = generation.artifact.path.display().to_string();
    Ok(Json(GenerationResponse {
        success: true,
        file_path: path.clone(),
        path,
        filename: generation.artifact.filename,
        size: kind.size_label(),
    }))
}

async fn unload<L: Loader>(State(service): AppState<L>) -> Json<UnloadResponse> {
    service.unload().await;
    Json(UnloadResponse {
        success: true,
        message: "Model unloaded",
    })
}

async fn get_styles<L: Loader>(State(service): AppState<L>) -> Json<StyleSnapshot> {
    Json(service.styles())
}

async fn update_styles<L: Loader>(
    State(service): AppState<L>,
    Json(req): Json<UpdateStylesRequest>,
) -> ApiResult<UpdateStylesResponse> {
    let counts = service.set_styles(req.avatar_styles, req.banner_styles)?;
    Ok(Json(UpdateStylesResponse {
        success: true,
        avatar_styles: counts.avatar_styles,
        banner_styles: counts.banner_styles,
    }))
}

async fn stats<L: Loader>(State(service): AppState<L>) -> ApiResult<ServiceStats> {
    Ok(Json(service.stats().await?))
}

async fn recent<L: Loader>(
    State(service): AppState<L>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<RecentResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let files = service
        .recent(limit)
        .await?
        .into_iter()
        .map(RecentFile::from)
        .collect();
    Ok(Json(RecentResponse { files }))
}

async fn clear_output<L: Loader>(State(service): AppState<L>) -> ApiResult<ClearResponse> {
    let deleted = service.clear_output().await?;
    Ok(Json(ClearResponse {
        success: true,
        deleted,
    }))
}
