use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http::error::ApiError;
use crate::http::state::HttpState;
use crate::inference::PointPrompt;
use crate::report::write_report;
use crate::storage::validate_filename;

const INDEX_HTML: &str = include_str!("../../static/index.html");
pub const DETECTION_COMPLETE: &str = "Detection complete";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub area: f64,
    pub message: &'static str,
}

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

/// Fields read from the upload form. `x`/`y` override the default prompt
/// point when both are present.
#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    x: Option<f32>,
    y: Option<f32>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                    return Err(ApiError::Status(e.status(), e.body_text()));
                }
                // A truncated or empty body still means there is no usable file.
                Err(e) if form.file.is_none() => {
                    debug!(error = %e, "unreadable multipart body");
                    return Err(ApiError::no_file());
                }
                Err(e) => return Err(ApiError::Status(e.status(), e.body_text())),
            };

            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("file") => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Status(e.status(), e.body_text()))?;
                    if !filename.is_empty() {
                        form.file = Some(UploadedFile {
                            filename,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                Some(axis @ ("x" | "y")) => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::Status(e.status(), e.body_text()))?;
                    let value = text
                        .trim()
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| {
                            ApiError::BadRequest(format!("Invalid prompt coordinate {axis}"))
                        })?;
                    if axis == "x" {
                        form.x = Some(value);
                    } else {
                        form.y = Some(value);
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn prompt(&self) -> PointPrompt {
        match (self.x, self.y) {
            (Some(x), Some(y)) => PointPrompt::foreground(x, y),
            _ => PointPrompt::default(),
        }
    }
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Backend running" }))
}

pub async fn upload(
    State(st): State<HttpState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "upload without a multipart body");
        ApiError::no_file()
    })?;

    let form = UploadForm::read(&mut multipart).await?;
    let prompt = form.prompt();
    let file = form.file.ok_or_else(ApiError::no_file)?;
    validate_filename(&file.filename)?;

    info!(filename = %file.filename, bytes = file.bytes.len(), ?prompt, "upload received");
    let record = st.detection.detect(&file.filename, &file.bytes, prompt).await?;

    Ok(Json(UploadResponse {
        filename: record.filename,
        area: record.area,
        message: DETECTION_COMPLETE,
    }))
}

pub async fn download_pdf(
    State(st): State<HttpState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    validate_filename(&filename)?;
    let (_, bytes) = write_report(st.detection.uploads().root(), &filename).await?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        bytes,
    )
        .into_response())
}

/// `Content-Disposition` for `<filename>.pdf`, dropping characters that cannot
/// appear in a quoted header value.
fn attachment(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() && *c != '"' && *c != '\\') || *c == ' ')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}.pdf\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_header() {
        assert_eq!(
            attachment("leaf.png"),
            HeaderValue::from_static("attachment; filename=\"leaf.png.pdf\"")
        );
        assert_eq!(
            attachment("qu\"ote ü.png"),
            HeaderValue::from_static("attachment; filename=\"quote .png.pdf\"")
        );
    }

    #[test]
    fn test_prompt_needs_both_coordinates() {
        let form = UploadForm {
            x: Some(12.0),
            ..UploadForm::default()
        };
        assert_eq!(form.prompt(), PointPrompt::default());

        let form = UploadForm {
            x: Some(12.0),
            y: Some(34.0),
            ..UploadForm::default()
        };
        assert_eq!(form.prompt(), PointPrompt::foreground(12.0, 34.0));
    }
}
