pub mod err;
pub mod models;
pub mod pages;
pub mod register;
pub mod store;
pub mod templates;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Router};

use crate::store::{FsRecordStore, FsUploadStore, RecordStore, UploadStore};

/// Shared server state, injected into handlers via `Extension`.
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub uploads: Arc<dyn UploadStore>,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
    pub upload_dir: PathBuf,
}

impl AppState {
    /// Filesystem-backed state rooted at `base_dir`, creating the upload
    /// directory if needed.
    pub async fn prepare(base_dir: &Path) -> anyhow::Result<Self> {
        let upload_dir = base_dir.join("uploads");
        store::prepare_dirs(&upload_dir).await?;
        Ok(Self {
            records: Arc::new(FsRecordStore::new(base_dir.join("registrations.csv"))),
            uploads: Arc::new(FsUploadStore::new(&upload_dir)),
            template_dir: base_dir.join("templates"),
            static_dir: base_dir.join("static"),
            upload_dir,
        })
    }
}

/// Build the application router.
///
/// Unknown paths and unsupported methods on known paths both fall back to
/// the same 404 handler; the route table makes no 404/405 distinction.
pub fn app(state: Arc<AppState>) -> Router {
    let not_found = err::handler404.into_service();
    Router::new()
        .route("/", get(pages::index).fallback(not_found.clone()))
        .route("/index.html", get(pages::index).fallback(not_found.clone()))
        .route("/admin", get(pages::admin).fallback(not_found.clone()))
        .route(
            "/register",
            post(register::handle_register).fallback(not_found.clone()),
        )
        .route(
            "/static/*path",
            get(pages::static_asset).fallback(not_found.clone()),
        )
        .route(
            "/uploads/*path",
            get(pages::uploaded_file).fallback(not_found.clone()),
        )
        .fallback(not_found)
        .layer(Extension(state))
}
