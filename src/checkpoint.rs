//! Local availability of model checkpoints.
//!
//! A checkpoint that is missing, or smaller than its expected minimum size,
//! is fetched again from its remote URL. Download failures never abort
//! startup here; the load step that follows is where a bad file becomes fatal.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::errors::{Result, SamAreaError};

/// A checkpoint file together with where to fetch it and how large a complete
/// copy must at least be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub path: PathBuf,
    pub url: String,
    pub min_bytes: u64,
}

impl ModelArtifact {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>, min_bytes: u64) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            min_bytes,
        }
    }

    /// True when the file exists and is at least `min_bytes` long.
    pub fn is_complete(&self) -> bool {
        fs::metadata(&self.path)
            .map(|meta| meta.is_file() && meta.len() >= self.min_bytes)
            .unwrap_or(false)
    }
}

/// Make sure `artifact` is on disk, downloading it if needed, and return its
/// local path.
///
/// Errors are logged, not returned.
pub fn ensure_model_available(artifact: &ModelArtifact) -> PathBuf {
    if artifact.is_complete() {
        info!(path = %artifact.path.display(), "model checkpoint present");
        return artifact.path.clone();
    }

    info!(
        path = %artifact.path.display(),
        url = %artifact.url,
        "model checkpoint missing or truncated, downloading"
    );
    match download(&artifact.url, &artifact.path) {
        Ok(bytes) if bytes < artifact.min_bytes => warn!(
            path = %artifact.path.display(),
            bytes,
            expected = artifact.min_bytes,
            "downloaded checkpoint is smaller than expected"
        ),
        Ok(bytes) => info!(path = %artifact.path.display(), bytes, "model checkpoint downloaded"),
        Err(e) => error!(url = %artifact.url, error = %e, "failed to download model checkpoint"),
    }

    artifact.path.clone()
}

fn download(url: &str, path: &Path) -> Result<u64> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| SamAreaError::Download {
            url: url.to_string(),
            source: Box::new(e),
        })?;

    let total = response
        .header("Content-Length")
        .and_then(|len| len.parse::<u64>().ok());

    write_streamed(response.into_reader(), path, total)
}

/// Stream `reader` to `<path>.part`, then move it over `path`.
fn write_streamed<R: io::Read>(reader: R, path: &Path, total: Option<u64>) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| SamAreaError::filesystem(parent, "checkpoint directory creation", e))?;
    }

    let partial = partial_path(path);
    let progress_bar = download_progress(total);
    let reader = progress_bar.wrap_read(reader);

    let result = copy_to_file(reader, &partial).and_then(|n| {
        fs::rename(&partial, path)
            .map(|_| n)
            .map_err(|e| SamAreaError::filesystem(path, "checkpoint rename", e))
    });
    let written = match result {
        Ok(n) => n,
        Err(e) => {
            progress_bar.abandon();
            if let Err(remove_err) = fs::remove_file(&partial) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %partial.display(),
                        error = %remove_err,
                        "failed to remove partial download"
                    );
                }
            }
            return Err(e);
        }
    };
    progress_bar.finish();

    Ok(written)
}

fn copy_to_file<R: io::Read>(mut reader: R, path: &Path) -> Result<u64> {
    let file = File::create(path)
        .map_err(|e| SamAreaError::filesystem(path, "checkpoint file creation", e))?;
    let mut writer = BufWriter::new(file);
    io::copy(&mut reader, &mut writer)
        .and_then(|n| writer.flush().map(|_| n))
        .map_err(|e| SamAreaError::filesystem(path, "checkpoint download", e))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn download_progress(total: Option<u64>) -> ProgressBar {
    match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec} {eta})",
            ) {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        }
        None => ProgressBar::new_spinner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_complete_respects_minimum_size() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("model.onnx");
        let artifact = ModelArtifact::new(&path, "http://127.0.0.1:9/model.onnx", 16);

        assert!(!artifact.is_complete());

        fs::write(&path, [0u8; 8])?;
        assert!(!artifact.is_complete());

        fs::write(&path, [0u8; 16])?;
        assert!(artifact.is_complete());
        Ok(())
    }

    #[test]
    fn test_present_model_is_not_downloaded() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, b"complete checkpoint")?;

        // Port 9 is discard; any download attempt would fail and leave a .part file.
        let artifact = ModelArtifact::new(&path, "http://127.0.0.1:9/model.onnx", 4);
        assert_eq!(ensure_model_available(&artifact), path);
        assert_eq!(fs::read(&path)?, b"complete checkpoint");
        assert!(!partial_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_download_failure_is_swallowed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("missing.onnx");
        let artifact = ModelArtifact::new(&path, "http://127.0.0.1:1/missing.onnx", 1024);

        assert_eq!(ensure_model_available(&artifact), path);
        assert!(!path.exists());
        Ok(())
    }

    /// Yields `remaining` bytes, then fails like a dropped connection.
    struct BrokenReader {
        remaining: usize,
    }

    impl io::Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(1);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_interrupted_download_leaves_no_partial_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, b"trunc")?;

        let result = write_streamed(BrokenReader { remaining: 10_000 }, &path, Some(1 << 20));

        assert!(matches!(result, Err(SamAreaError::FileSystem { .. })));
        assert!(!partial_path(&path).exists());
        assert_eq!(fs::read(&path)?, b"trunc");
        Ok(())
    }

    #[test]
    fn test_write_streamed_overwrites_truncated_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("model.onnx");
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, b"trunc")?;

        let payload = vec![7u8; 4096];
        let written = write_streamed(payload.as_slice(), &path, Some(payload.len() as u64))?;

        assert_eq!(written, 4096);
        assert_eq!(fs::read(&path)?, payload);
        assert!(!partial_path(&path).exists());
        Ok(())
    }
}
