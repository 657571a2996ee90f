//! Form binding and input cleaning for posts and comments.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::MIN_TEXT_LENGTH;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{header_str, Request};
use crate::core::query_params::parse_form_body;
use crate::groups;

pub const REQUIRED: &str = "Обязательное поле.";
pub const TEXT_TOO_SHORT: &str = "Не меньше 10 символов.";
pub const INVALID_CHOICE: &str =
    "Выберите корректный вариант. Вашего варианта нет среди допустимых значений.";
pub const INVALID_IMAGE: &str =
    "Загрузите правильное изображение. Файл, который вы загрузили, поврежден или не является изображением.";

/// Field name -> messages, in field order.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub name: String,
    pub data: Vec<u8>,
}

/// Submitted fields, whichever encoding they came in.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    image: Option<std::result::Result<ImageUpload, ()>>,
}

impl FormData {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Deserialize)]
struct JsonImage {
    name: String,
    data: String,
}

fn decode_image(name: &str, data: &str) -> std::result::Result<ImageUpload, ()> {
    // Accept both bare base64 and data URLs.
    let payload = data.split_once(";base64,").map(|(_, p)| p).unwrap_or(data);
    let bytes = STANDARD.decode(payload.trim()).map_err(|_| ())?;
    Ok(ImageUpload {
        name: name.to_string(),
        data: bytes,
    })
}

pub fn parse_form(req: &Request) -> Result<FormData> {
    let content_type = header_str(req, "Content-Type").unwrap_or("");

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(req.body())
            .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Expected a JSON object".to_string()))?;

        let mut form = FormData::default();
        for (key, value) in object {
            match (key.as_str(), value) {
                ("image", serde_json::Value::Null) => {}
                ("image", image) => {
                    form.image = Some(
                        serde_json::from_value::<JsonImage>(image.clone())
                            .map_err(|_| ())
                            .and_then(|img| decode_image(&img.name, &img.data)),
                    );
                }
                (_, serde_json::Value::String(s)) => {
                    form.fields.insert(key.clone(), s.clone());
                }
                (_, serde_json::Value::Null) => {}
                (_, other) => {
                    form.fields.insert(key.clone(), other.to_string());
                }
            }
        }
        return Ok(form);
    }

    let mut fields = parse_form_body(req.body());
    let image = match (fields.remove("image_name"), fields.remove("image_data")) {
        (Some(name), Some(data)) if !data.is_empty() => Some(decode_image(&name, &data)),
        _ => None,
    };
    Ok(FormData { fields, image })
}

// === Validators ===

/// The shared post/comment text rule: at least 10 characters once trimmed.
/// Returns the trimmed text.
pub fn clean_text(raw: Option<&str>) -> std::result::Result<String, &'static str> {
    let text = raw.unwrap_or("").trim();
    if text.is_empty() {
        return Err(REQUIRED);
    }
    if text.chars().count() < MIN_TEXT_LENGTH {
        return Err(TEXT_TOO_SHORT);
    }
    Ok(text.to_string())
}

/// The format of `data` when it decodes completely as one of the accepted
/// image types. A matching signature alone is not enough.
pub fn image_format(data: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(data).ok()?;
    let name = match format {
        ImageFormat::Gif => "gif",
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::WebP => "webp",
        _ => return None,
    };
    image::load_from_memory_with_format(data, format).ok()?;
    Some(name)
}

/// What a form re-render needs: the submitted values and the errors.
#[derive(Debug, Default, Serialize)]
pub struct BoundForm {
    pub values: BTreeMap<String, String>,
    pub errors: FormErrors,
}

impl BoundForm {
    pub fn value(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug)]
pub struct PostInput {
    pub text: String,
    pub group_id: Option<u64>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug)]
pub struct CommentInput {
    pub text: String,
}

pub fn validate_post_form(db: &Db, data: &FormData) -> Result<std::result::Result<PostInput, BoundForm>> {
    let mut errors = FormErrors::default();

    let text = clean_text(data.field("text"))
        .map_err(|msg| errors.add("text", msg))
        .ok();

    let group_raw = data.field("group").unwrap_or("").trim();
    let group_id = if group_raw.is_empty() {
        None
    } else {
        match group_raw.parse::<u64>() {
            Ok(id) if groups::get_group(db, id)?.is_some() => Some(id),
            _ => {
                errors.add("group", INVALID_CHOICE);
                None
            }
        }
    };

    let image = match &data.image {
        None => None,
        Some(Ok(upload)) if image_format(&upload.data).is_some() => Some(upload.clone()),
        Some(_) => {
            errors.add("image", INVALID_IMAGE);
            None
        }
    };

    match text {
        Some(text) if errors.is_empty() => Ok(Ok(PostInput {
            text,
            group_id,
            image,
        })),
        _ => {
            let mut values = BTreeMap::new();
            values.insert("text".to_string(), data.field("text").unwrap_or("").to_string());
            values.insert("group".to_string(), group_raw.to_string());
            Ok(Err(BoundForm { values, errors }))
        }
    }
}

pub fn validate_comment_form(data: &FormData) -> std::result::Result<CommentInput, BoundForm> {
    match clean_text(data.field("text")) {
        Ok(text) => Ok(CommentInput { text }),
        Err(msg) => {
            let mut form = BoundForm::default();
            form.values
                .insert("text".to_string(), data.field("text").unwrap_or("").to_string());
            form.errors.add("text", msg);
            Err(form)
        }
    }
}

/// A 2x1 PNG for tests that need a real upload.
#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    image::RgbImage::new(2, 1)
        .write_to(&mut out, ImageFormat::Png)
        .expect("PNG encoding should succeed");
    out.into_inner()
}
