use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::checkpoint::ModelArtifact;
use crate::errors::{Result, SamAreaError};
use crate::persistence::DatabaseSettings;

pub const DEFAULT_SECRET_KEY: &str = "dev-secret-key";

pub const DEFAULT_ENCODER_URL: &str =
    "https://huggingface.co/vietanhdev/segment-anything-onnx-models/resolve/main/sam_vit_b_01ec64.encoder.onnx";
pub const DEFAULT_DECODER_URL: &str =
    "https://huggingface.co/vietanhdev/segment-anything-onnx-models/resolve/main/sam_vit_b_01ec64.decoder.onnx";

/// Anything below this is a truncated encoder download.
pub const MIN_ENCODER_BYTES: u64 = 300_000_000;
pub const MIN_DECODER_BYTES: u64 = 4_000_000;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    #[arg(short, long, env = "UPLOAD_FOLDER", default_value = "uploads")]
    pub upload_folder: PathBuf,

    #[arg(long, env = "SECRET_KEY", default_value = DEFAULT_SECRET_KEY, hide_env_values = true)]
    pub secret_key: String,

    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    #[arg(long, env = "SAM_ENCODER_PATH", default_value = "models/sam_vit_b_01ec64.encoder.onnx")]
    pub encoder_path: PathBuf,

    #[arg(long, env = "SAM_ENCODER_URL", default_value = DEFAULT_ENCODER_URL)]
    pub encoder_url: String,

    #[arg(long, env = "SAM_DECODER_PATH", default_value = "models/sam_vit_b_01ec64.decoder.onnx")]
    pub decoder_path: PathBuf,

    #[arg(long, env = "SAM_DECODER_URL", default_value = DEFAULT_DECODER_URL)]
    pub decoder_url: String,

    /// Independent predictors kept in the inference pool
    #[arg(long, env = "INFERENCE_WORKERS", default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub inference_workers: u16,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| SamAreaError::Configuration {
                message: format!("invalid bind address {}:{}: {e}", self.host, self.port),
            })
    }

    pub fn encoder_artifact(&self) -> ModelArtifact {
        ModelArtifact::new(&self.encoder_path, &self.encoder_url, MIN_ENCODER_BYTES)
    }

    pub fn decoder_artifact(&self) -> ModelArtifact {
        ModelArtifact::new(&self.decoder_path, &self.decoder_url, MIN_DECODER_BYTES)
    }

    pub fn database(&self) -> DatabaseSettings {
        DatabaseSettings {
            host: self.db_host.clone(),
            port: self.db_port,
            name: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
        }
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["sam-area-rs"]);
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_port, 5432);
        assert_eq!(config.upload_folder, PathBuf::from("uploads"));
        assert_eq!(config.inference_workers, 1);
        assert!(config.uses_default_secret());
    }

    #[test]
    fn test_bind_addr() -> Result<()> {
        let config = Config::parse_from(["sam-area-rs", "--host", "127.0.0.1", "--port", "8080"]);
        assert_eq!(config.bind_addr()?, "127.0.0.1:8080".parse().unwrap());

        let config = Config::parse_from(["sam-area-rs", "--host", "not a host"]);
        assert!(config.bind_addr().is_err());
        Ok(())
    }

    #[test]
    fn test_artifacts_use_minimum_sizes() {
        let config = Config::parse_from(["sam-area-rs", "--encoder-path", "/tmp/enc.onnx"]);
        let encoder = config.encoder_artifact();
        assert_eq!(encoder.path, PathBuf::from("/tmp/enc.onnx"));
        assert_eq!(encoder.min_bytes, MIN_ENCODER_BYTES);
        assert_eq!(config.decoder_artifact().min_bytes, MIN_DECODER_BYTES);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Config::try_parse_from(["sam-area-rs", "--inference-workers", "0"]).is_err());
    }
}
