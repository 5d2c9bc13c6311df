use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, SamAreaError};

/// Check that a client-supplied name is a single plain path component.
///
/// Upload names double as disk paths and report names, so anything that could
/// escape the upload directory is refused.
pub fn validate_filename(name: &str) -> Result<&str> {
    let invalid = |reason: &str| SamAreaError::Validation {
        field: "filename".to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("is empty"));
    }
    if name.contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("contains a path separator"));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid("is not a plain file name")),
    }
}

/// Directory holding uploaded images and generated reports.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| SamAreaError::filesystem(&self.root, "upload directory creation", e))
    }

    /// Path for `filename`, after validation.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_filename(filename)?))
    }

    /// Write `bytes` under `filename`, replacing any previous upload of the
    /// same name.
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(filename)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SamAreaError::filesystem(&path, "upload write", e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "upload saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_names_accepted() -> Result<()> {
        for name in ["leaf.png", "IMG 0001.JPG", ".hidden", "a..b.png", "leaf"] {
            assert_eq!(validate_filename(name)?, name);
        }
        Ok(())
    }

    #[test]
    fn test_traversal_rejected() {
        for name in ["", ".", "..", "../leaf.png", "a/b.png", "..\\leaf.png", "/etc/passwd", "bad\0.png"] {
            assert!(
                matches!(validate_filename(name), Err(SamAreaError::Validation { .. })),
                "accepted unsafe name {name:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_save_overwrites_same_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let uploads = UploadDir::new(temp_dir.path().join("uploads"));
        uploads.ensure()?;

        let first = uploads.save("leaf.png", b"one").await?;
        let second = uploads.save("leaf.png", b"two").await?;

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second)?, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn test_save_refuses_escape() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let uploads = UploadDir::new(temp_dir.path());
        assert!(uploads.save("../escape.png", b"x").await.is_err());
        assert!(!temp_dir.path().parent().unwrap().join("escape.png").exists());
        Ok(())
    }
}
