//! Environment-driven configuration.
//!
//! All knobs come from the process environment (optionally seeded from a
//! `.env` file by the binary). Nothing here depends on specific values
//! beyond presence/absence; defaults are suitable for local development.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How the service executes jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Upload/enqueue in the server process; a separate `docsight worker`
    /// process pulls from the queue.
    Queued,
    /// The server process also runs the worker loop (single-process
    /// deployment).
    Inline,
}

impl ExecutionMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }
}

/// Service settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of durable file storage (`raw/` and `processed/` live under it).
    pub storage_root: PathBuf,
    /// SQLite database file (documents + job queue).
    pub database_path: PathBuf,
    /// Bearer token granting the `admin` role.
    pub admin_token: String,
    /// Bearer token granting the `user` role.
    pub user_token: String,
    /// Model identifier sent to the inference backend.
    pub model_id: String,
    /// OpenAI-compatible chat-completions endpoint.
    pub inference_url: String,
    /// Optional API key for the inference backend.
    pub inference_api_key: Option<String>,
    /// Maximum new tokens per generation.
    pub max_new_tokens: u32,
    /// PDF rasterization resolution.
    pub render_dpi: u32,
    /// Prompt used when the enqueue request carries none.
    pub default_prompt: String,
    pub execution_mode: ExecutionMode,
    /// Worker queue poll interval.
    pub poll_interval: Duration,
    /// Documents stuck in `processing` longer than this are requeued.
    pub stale_processing_timeout: Duration,
    /// Queue claim TTL; expired claims are redelivered.
    pub claim_ttl: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {v:?}")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Resolve settings from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let storage_root = PathBuf::from(env_or("STORAGE_PATH", "./data"));
        let database_path = match env::var("DATABASE_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => storage_root.join("docsight.db"),
        };

        let mode_raw = env_or("EXECUTION_MODE", "queued");
        let execution_mode = ExecutionMode::from_str(&mode_raw)
            .ok_or_else(|| anyhow::anyhow!("invalid EXECUTION_MODE: {mode_raw:?}"))?;

        Ok(Self {
            storage_root,
            database_path,
            admin_token: env_or("ADMIN_TOKEN", "admintoken"),
            user_token: env_or("USER_TOKEN", "usertoken"),
            model_id: env_or("MODEL_ID", "Qwen/Qwen3-VL-30B-A3B-Instruct"),
            inference_url: env_or("INFERENCE_URL", "http://localhost:8080/v1/chat/completions"),
            inference_api_key: env::var("INFERENCE_API_KEY").ok(),
            max_new_tokens: env_parse("MAX_NEW_TOKENS", 4096)?,
            render_dpi: env_parse("RENDER_DPI", 300)?,
            default_prompt: env_or("DEFAULT_PROMPT", "Extract OCR JSON"),
            execution_mode,
            poll_interval: Duration::from_secs(env_parse("WORKER_POLL_INTERVAL_SECS", 2)?),
            stale_processing_timeout: Duration::from_secs(env_parse(
                "STALE_PROCESSING_TIMEOUT_SECS",
                1800,
            )?),
            claim_ttl: Duration::from_secs(env_parse("QUEUE_CLAIM_TTL_SECS", 1800)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_parses() {
        assert_eq!(ExecutionMode::from_str("queued"), Some(ExecutionMode::Queued));
        assert_eq!(ExecutionMode::from_str("Inline"), Some(ExecutionMode::Inline));
        assert_eq!(ExecutionMode::from_str("celery"), None);
    }
}
