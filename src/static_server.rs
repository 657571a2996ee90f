use http::StatusCode;
use mime_guess::from_path;
use rust_embed::RustEmbed;

use crate::config::media_key;
use crate::context::RequestContext;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::Response;
use crate::templates;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

fn with_guessed_type(path: &str, body: Vec<u8>) -> Response {
    let mime = from_path(path).first_or_octet_stream();
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::OK;
    if let Ok(value) = http::HeaderValue::from_str(mime.as_ref()) {
        resp.headers_mut().insert(http::header::CONTENT_TYPE, value);
    }
    resp
}

pub fn serve_static(path: &str) -> Result<Response> {
    let file = Assets::get(path).ok_or_else(|| AppError::not_found(format!("No asset {}", path)))?;
    Ok(with_guessed_type(path, file.data.into_owned()))
}

/// Uploaded images live in the key-value store under `media:`.
pub fn serve_media(db: &Db, path: &str) -> Result<Response> {
    let data = db
        .get_bytes(&media_key(path))?
        .ok_or_else(|| AppError::not_found(format!("No media {}", path)))?;
    Ok(with_guessed_type(path, data))
}

pub fn about_page(rc: &RequestContext, template: &str, title: &str) -> Result<Response> {
    templates::render_simple(rc, template, title)
}
