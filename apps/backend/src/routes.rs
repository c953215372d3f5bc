use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    response::Response,
    Json,
};
use promptdeck_catalog::{JobKind, JobStatus};
use promptdeck_scan::{loras, LoraListing, ReferencePage, ReferenceQuery};
use promptdeck_storage::PromptEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;
use crate::error::AppError;
use crate::files;

type ApiResult<T> = Result<Json<T>, AppError>;

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Value> {
    let library = state.references.clone();
    let categories = tokio::task::spawn_blocking(move || library.categories()).await?;
    Ok(Json(json!({ "categories": categories })))
}

pub async fn list_references(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ReferencePage> {
    let query = ReferenceQuery::from_raw(
        params.get("category").cloned(),
        params.get("search").cloned(),
        params.get("offset").map(String::as_str),
        params.get("limit").map(String::as_str),
    );
    let page = state.references.query(&query).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct PathParams {
    path: Option<String>,
}

pub async fn serve_image(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Response, AppError> {
    let path = files::resolve(
        state.references.root(),
        params.path.as_deref(),
        files::IMAGE_EXTENSIONS,
    )?;
    files::serve(&path).await
}

pub async fn serve_lora_preview(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Response, AppError> {
    let path = files::resolve(
        &state.lora_dir,
        params.path.as_deref(),
        files::PREVIEW_EXTENSIONS,
    )?;
    files::serve(&path).await
}

pub async fn list_loras(State(state): State<AppState>) -> ApiResult<LoraListing> {
    let root = state.lora_dir.clone();
    let listing = tokio::task::spawn_blocking(move || loras::list_loras(&root)).await?;
    Ok(Json(listing))
}

#[derive(Deserialize)]
pub struct ModelParams {
    id: Option<u64>,
}

/// Full catalog record for a model id, proxied as-is.
pub async fn catalog_model(
    State(state): State<AppState>,
    Query(params): Query<ModelParams>,
) -> ApiResult<Value> {
    let id = params
        .id
        .ok_or_else(|| AppError::BadRequest("Missing id parameter".into()))?;
    let model = state.jobs.catalog().model(id).await?;
    Ok(Json(model))
}

pub async fn get_prompts(State(state): State<AppState>) -> ApiResult<Vec<PromptEntry>> {
    Ok(Json(state.prompts.get().await?))
}

pub async fn save_prompts(
    State(state): State<AppState>,
    Json(entries): Json<Vec<PromptEntry>>,
) -> ApiResult<Vec<PromptEntry>> {
    Ok(Json(state.prompts.save(entries).await?))
}

pub async fn add_prompt(
    State(state): State<AppState>,
    Json(entry): Json<PromptEntry>,
) -> ApiResult<Vec<PromptEntry>> {
    Ok(Json(state.prompts.add(entry).await?))
}

/// `{"index": 0, "text": "..."}`: every key besides `index` is the patch.
#[derive(Deserialize)]
pub struct UpdateRequest {
    index: i64,
    #[serde(flatten)]
    patch: PromptEntry,
}

pub async fn update_prompt(
    State(state): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Vec<PromptEntry>> {
    Ok(Json(state.prompts.update(req.index, req.patch).await?))
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    index: i64,
}

pub async fn delete_prompt(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Vec<PromptEntry>> {
    Ok(Json(state.prompts.delete(req.index).await?))
}

#[derive(Deserialize)]
pub struct StartParams {
    kind: Option<String>,
}

pub async fn start_download(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> ApiResult<Value> {
    let kind: JobKind = params
        .kind
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing kind parameter".into()))?
        .parse()?;
    state.jobs.start(kind)?;
    info!("{kind} download started");
    Ok(Json(json!({ "started": true, "kind": kind })))
}

pub async fn download_status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.jobs.status())
}

pub async fn cancel_download(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cancelled": state.jobs.cancel() }))
}
