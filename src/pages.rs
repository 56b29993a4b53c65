use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Html;
use axum::Extension;
use serde::Deserialize;

use crate::err::Error;
use crate::models::Registration;
use crate::store::RecordStore;
use crate::templates::{html_escape, render_file};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct IndexParams {
    error: Option<String>,
}

/// GET / and GET /index.html
pub async fn index(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<IndexParams>,
) -> Result<Html<String>, Error> {
    let banner = match params.error.as_deref() {
        Some(message) if !message.is_empty() => format!(
            r#"<div class="flash-messages"><li>{}</li></div>"#,
            html_escape(message)
        ),
        _ => String::new(),
    };
    let page = render_file(
        &state.template_dir,
        "index.html",
        &[("error_message", &banner)],
    )
    .await?;
    Ok(Html(page))
}

/// GET /admin
pub async fn admin(Extension(state): Extension<Arc<AppState>>) -> Result<Html<String>, Error> {
    let entries = state.records.list_all().await?;
    let table = admin_table(&entries);
    let page = render_file(&state.template_dir, "admin.html", &[("table_rows", &table)]).await?;
    Ok(Html(page))
}

/// GET /static/*path
pub async fn static_asset(
    Extension(state): Extension<Arc<AppState>>,
    Path(rest): Path<String>,
) -> Result<(HeaderMap, Vec<u8>), Error> {
    serve_file(&state.static_dir, &rest).await
}

/// GET /uploads/*path
pub async fn uploaded_file(
    Extension(state): Extension<Arc<AppState>>,
    Path(rest): Path<String>,
) -> Result<(HeaderMap, Vec<u8>), Error> {
    serve_file(&state.upload_dir, &rest).await
}

/// Serve one file from under `root`, guessing the Content-Type from its
/// extension. Directories and traversal attempts are forbidden; the policy
/// is the same for the static and upload trees.
async fn serve_file(root: &FsPath, rest: &str) -> Result<(HeaderMap, Vec<u8>), Error> {
    // The wildcard capture keeps its leading slash; joining an absolute
    // path would discard `root` and serve files from anywhere on disk.
    let rest = rest.trim_start_matches('/');
    if rest.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(Error::forbidden("Forbidden"));
    }
    let path = root.join(rest);
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| Error::not_found("Not Found"))?;
    if meta.is_dir() {
        return Err(Error::forbidden("Forbidden"));
    }
    let bytes = tokio::fs::read(&path).await?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(|err| Error::InternalError {
            kind: "HeaderError",
            message: err.to_string(),
        })?,
    );
    Ok((headers, bytes))
}

/// Build the admin table fragment: text columns HTML-escaped, filenames
/// URL-encoded for the link attributes.
fn admin_table(entries: &[Registration]) -> String {
    if entries.is_empty() {
        return "<p>No registrations yet.</p>".to_string();
    }
    let mut html = String::from(
        "<table class=\"admin-table\">\n\
         \x20 <thead><tr><th>Timestamp</th><th>First Name</th><th>Last Name</th>\
         <th>ID Type</th><th>ID Front</th><th>ID Back</th></tr></thead>\n\
         \x20 <tbody>",
    );
    for entry in entries {
        let front = urlencoding::encode(&entry.front_filename);
        let back = urlencoding::encode(&entry.back_filename);
        html.push_str(&format!(
            "<tr>\
             <td>{ts}</td>\
             <td>{first}</td>\
             <td>{last}</td>\
             <td>{id_type}</td>\
             <td><a href=\"/uploads/{front}\" target=\"_blank\">\
             <img src=\"/uploads/{front}\" alt=\"ID front\" class=\"thumb\"></a></td>\
             <td><a href=\"/uploads/{back}\" target=\"_blank\">\
             <img src=\"/uploads/{back}\" alt=\"ID back\" class=\"thumb\"></a></td>\
             </tr>",
            ts = html_escape(&entry.timestamp),
            first = html_escape(&entry.first_name),
            last = html_escape(&entry.last_name),
            id_type = html_escape(&entry.id_type),
        ));
    }
    html.push_str("  </tbody>\n</table>");
    html
}
