use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use promptdeck_catalog::{CivitaiClient, DownloadJobs, JobSettings, ModelCatalog};
use promptdeck_config::AppConfig;
use promptdeck_scan::ReferenceLibrary;
use promptdeck_storage::{CacheManager, PromptStore};
use tower_http::cors::CorsLayer;

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<PromptStore>,
    pub references: Arc<ReferenceLibrary>,
    pub lora_dir: PathBuf,
    pub jobs: DownloadJobs,
}

impl AppState {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog: Arc<dyn ModelCatalog> = Arc::new(CivitaiClient::new(
            config.catalog_url.clone(),
            Duration::from_secs(config.catalog_timeout_secs),
            Duration::from_secs(config.download_timeout_secs),
        )?);
        Self::build(config, catalog).await
    }

    pub async fn build(config: &AppConfig, catalog: Arc<dyn ModelCatalog>) -> Result<Self> {
        let prompts = PromptStore::open(&config.prompts_file, &config.default_prompts_file).await?;
        let cache = Arc::new(CacheManager::new(&config.cache_dir));
        let references = ReferenceLibrary::new(&config.references_dir, cache);
        let jobs = DownloadJobs::new(
            catalog,
            JobSettings {
                lora_dir: config.lora_dir.clone(),
                references_dir: config.references_dir.clone(),
                max_preview_images: config.max_preview_images,
            },
        );

        Ok(Self {
            prompts: Arc::new(prompts),
            references: Arc::new(references),
            lora_dir: config.lora_dir.clone(),
            jobs,
        })
    }
}

pub fn build_router(state: AppState, api_key: Option<String>) -> Router {
    let cors = CorsLayer::permissive();
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/api/categories", get(routes::list_categories))
        .route("/api/references", get(routes::list_references))
        .route("/api/image", get(routes::serve_image))
        .route("/prompt_manage/get", post(routes::get_prompts))
        .route("/prompt_manage/save", post(routes::save_prompts))
        .route("/prompt_manage/add", post(routes::add_prompt))
        .route("/prompt_manage/update", post(routes::update_prompt))
        .route("/prompt_manage/delete", post(routes::delete_prompt))
        .route("/prompt_manage/lora/list", get(routes::list_loras))
        .route("/prompt_manage/lora/preview", get(routes::serve_lora_preview))
        .route("/prompt_manage/lora/model", get(routes::catalog_model))
        .route("/prompt_manage/lora/download/start", get(routes::start_download))
        .route("/prompt_manage/lora/download/status", get(routes::download_status))
        .route("/prompt_manage/lora/download/cancel", get(routes::cancel_download))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn_with_state(api_key, enforce_api_key))
}

async fn enforce_api_key(
    State(expected): State<Option<String>>,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Result<axum::response::Response, StatusCode> {
    if let Some(expected_key) = expected {
        let provided = req.headers().get("x-api-key").and_then(|h| h.to_str().ok());
        if provided != Some(expected_key.as_str()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use promptdeck_catalog::CatalogError;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct OfflineCatalog;

    #[async_trait]
    impl ModelCatalog for OfflineCatalog {
        async fn model_version_by_hash(&self, _sha256: &str) -> Result<Value, CatalogError> {
            Err(CatalogError::NotFound)
        }

        async fn model(&self, id: u64) -> Result<Value, CatalogError> {
            match id {
                7 => Ok(json!({"id": 7, "name": "Ink"})),
                _ => Err(CatalogError::NotFound),
            }
        }

        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, CatalogError> {
            Err(CatalogError::Status(503))
        }
    }

    struct TestApp {
        dir: TempDir,
        router: Router,
    }

    async fn app(api_key: Option<&str>) -> TestApp {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::from_vars(|key| {
            let sub = match key {
                "PROMPTDECK_DATA_DIR" => "data",
                "PROMPTDECK_REFERENCES_DIR" => "refs",
                "PROMPTDECK_CACHE_DIR" => "cache",
                "PROMPTDECK_LORA_DIR" => "loras",
                _ => return None,
            };
            Some(dir.path().join(sub).display().to_string())
        })
        .unwrap();
        let state = AppState::build(&config, Arc::new(OfflineCatalog)).await.unwrap();
        TestApp {
            router: build_router(state, api_key.map(str::to_string)),
            dir,
        }
    }

    async fn call(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = call(router, req).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
        let (status, bytes) = call(router, Request::get(uri).body(Body::empty()).unwrap()).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn prompt_crud_over_http() {
        let t = app(None).await;

        let (status, body) = post_json(&t.router, "/prompt_manage/get", json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (_, body) =
            post_json(&t.router, "/prompt_manage/add", json!({"name": "a", "text": "x"})).await;
        assert_eq!(
            body,
            json!([{"name": "a", "direction": "无", "type": "其它", "note": "", "text": "x"}])
        );

        let (_, body) = post_json(
            &t.router,
            "/prompt_manage/update",
            json!({"index": 0, "text": "y"}),
        )
        .await;
        assert_eq!(body[0]["text"], "y");
        assert_eq!(body[0]["direction"], "无");

        let (_, body) = post_json(&t.router, "/prompt_manage/delete", json!({"index": 9})).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let saved = json!([{"name": "b", "custom": 1}]);
        let (_, body) = post_json(&t.router, "/prompt_manage/save", saved.clone()).await;
        assert_eq!(body, saved);
        let (_, body) = post_json(&t.router, "/prompt_manage/get", json!(null)).await;
        assert_eq!(body, saved);
    }

    #[tokio::test]
    async fn prompt_values_keep_their_json_types() {
        let t = app(None).await;

        let (status, body) = post_json(
            &t.router,
            "/prompt_manage/add",
            json!({"name": "n", "note": 3, "text": null}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["note"], 3);
        assert_eq!(body[0]["text"], Value::Null);
        assert_eq!(body[0]["type"], "其它");

        let (_, body) = post_json(
            &t.router,
            "/prompt_manage/update",
            json!({"index": 0, "note": null, "weight": 0.5}),
        )
        .await;
        assert_eq!(body[0]["note"], Value::Null);
        assert_eq!(body[0]["weight"], 0.5);

        let saved = json!([{"name": 1, "note": null, "tags": ["a"]}]);
        let (status, body) = post_json(&t.router, "/prompt_manage/save", saved.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, saved);
    }

    #[tokio::test]
    async fn references_and_images() {
        let t = app(None).await;
        let style = t.dir.path().join("refs/style");
        std::fs::create_dir_all(&style).unwrap();
        std::fs::write(style.join("ink_0.png"), b"png bytes").unwrap();
        std::fs::write(style.join("ink_0.json"), r#"{"prompt": "ink wash", "steps": 20}"#).unwrap();
        std::fs::write(t.dir.path().join("secret.png"), b"secret").unwrap();

        let (status, body) = get_json(&t.router, "/api/categories").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["categories"], json!(["root", "style"]));

        let (_, page) = get_json(&t.router, "/api/references?category=style&limit=abc").await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["limit"], 200);
        assert_eq!(page["references"][0]["steps"], "20");
        let image_url = page["references"][0]["image_url"].as_str().unwrap().to_string();

        let resp = t
            .router
            .clone()
            .oneshot(Request::get(image_url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/png");

        let (status, _) = get_json(&t.router, "/api/image").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = get_json(&t.router, "/api/image?path=..%2Fsecret.png").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Access denied");
        let (status, _) = get_json(&t.router, "/api/image?path=style%2Fmissing.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json(&t.router, "/api/image?path=style%2Fink_0.json").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn lora_listing_and_catalog_proxy() {
        let t = app(None).await;
        let loras = t.dir.path().join("loras");
        std::fs::create_dir_all(&loras).unwrap();
        std::fs::write(loras.join("ink.safetensors"), b"x").unwrap();
        std::fs::write(loras.join("ink.webm"), b"video").unwrap();

        let (_, body) = get_json(&t.router, "/prompt_manage/lora/list").await;
        assert_eq!(body["categories"], json!(["root"]));
        let preview = body["loras"][0]["preview_url"].as_str().unwrap().to_string();

        let resp = t
            .router
            .clone()
            .oneshot(Request::get(preview).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()["content-type"], "video/webm");

        let (status, body) = get_json(&t.router, "/prompt_manage/lora/model?id=7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ink");
        let (status, _) = get_json(&t.router, "/prompt_manage/lora/model?id=8").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_job_endpoints() {
        let t = app(None).await;

        let (status, _) = get_json(&t.router, "/prompt_manage/lora/download/start?kind=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(&t.router, "/prompt_manage/lora/download/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);

        let (_, body) = get_json(&t.router, "/prompt_manage/lora/download/cancel").await;
        assert_eq!(body["cancelled"], false);

        let (status, body) =
            get_json(&t.router, "/prompt_manage/lora/download/start?kind=metadata").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "metadata");
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_configured() {
        let t = app(Some("s3cret")).await;
        let (status, _) = call(&t.router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::get("/health")
            .header("x-api-key", "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&t.router, req).await;
        assert_eq!(status, StatusCode::OK);
    }
}
