use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the area detection service.
///
/// Each variant carries the context of its error domain (filesystem, model,
/// database, etc.) so callers and logs get a diagnostic without parsing
/// strings. The HTTP layer decides which of these become a 400 and which a 500.
#[derive(Error, Debug)]
pub enum SamAreaError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Inference error: {message}")]
    Inference { message: String },

    #[error("Download error: fetching {url} failed")]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Database error: {operation} failed")]
    Database {
        operation: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("Report error: rendering report for {filename} failed")]
    Report {
        filename: String,
        #[source]
        source: BoxError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SamAreaError>;

impl SamAreaError {
    pub(crate) fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn filesystem(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }
}

/// Fallback for I/O errors without path context. Code that knows the path
/// should build `SamAreaError::FileSystem` directly.
impl From<std::io::Error> for SamAreaError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SamAreaError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SamAreaError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only show up while reshaping model tensors, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for SamAreaError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let err: SamAreaError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        match err {
            SamAreaError::FileSystem {
                path, operation, ..
            } => {
                assert_eq!(path, PathBuf::from("unknown"));
                assert_eq!(operation, "unknown");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_validation_display() {
        let err = SamAreaError::Validation {
            field: "filename".to_string(),
            reason: "contains a path separator".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error: filename contains a path separator"
        );
    }
}
