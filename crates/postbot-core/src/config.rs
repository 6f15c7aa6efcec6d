use std::{env, fs, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
const DEFAULT_TEXT_MODEL: &str = "mistral-large-latest";
const DEFAULT_AGENT_MODEL: &str = "mistral-medium-latest";

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    /// Empty means the bot answers everyone.
    pub telegram_allowed_users: Vec<i64>,

    // Mistral
    pub mistral_api_key: String,
    pub mistral_base_url: String,
    pub mistral_text_model: String,
    pub mistral_agent_model: String,
    pub mistral_agent_id: Option<String>,
    pub mistral_timeout: Duration,

    // Runtime
    pub temp_dir: PathBuf,

    // Telegram limits
    pub telegram_message_limit: usize,
    pub telegram_caption_limit: usize,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    ///
    /// Variables already set in the environment win over `.env` entries.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("failed to read .env: {e}"))),
        }

        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        fs::create_dir_all(&cfg.temp_dir)?;
        Ok(cfg)
    }

    /// Build a config from an arbitrary key lookup. Does not touch the filesystem.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_token = get("TELEGRAM_TOKEN")
            .or_else(|| get("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_TOKEN environment variable is required".to_string())
            })?;
        let mistral_api_key = get("MISTRAL_API_KEY").ok_or_else(|| {
            Error::Config("MISTRAL_API_KEY environment variable is required".to_string())
        })?;

        let telegram_allowed_users = parse_csv_i64(get("TELEGRAM_ALLOWED_USERS"));

        let mistral_base_url = get("MISTRAL_BASE_URL")
            .unwrap_or_else(|| DEFAULT_MISTRAL_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let mistral_text_model =
            get("MISTRAL_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        let mistral_agent_model =
            get("MISTRAL_AGENT_MODEL").unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string());
        let mistral_agent_id = get("MISTRAL_AGENT_ID");
        let mistral_timeout =
            Duration::from_secs(parse_u64(get("MISTRAL_TIMEOUT_SECS")).unwrap_or(120));

        let temp_dir = get("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("postbot"));

        let telegram_message_limit = parse_usize(get("TELEGRAM_MESSAGE_LIMIT")).unwrap_or(4000);
        let telegram_caption_limit = parse_usize(get("TELEGRAM_CAPTION_LIMIT")).unwrap_or(1024);

        let audit_log_path = get("AUDIT_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("postbot-audit.log"));
        let audit_log_json = parse_bool(get("AUDIT_LOG_JSON")).unwrap_or(false);

        let rate_limit_enabled = parse_bool(get("RATE_LIMIT_ENABLED")).unwrap_or(true);
        let rate_limit_requests = parse_u64(get("RATE_LIMIT_REQUESTS"))
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(5);
        let rate_limit_window =
            Duration::from_secs(parse_u64(get("RATE_LIMIT_WINDOW")).unwrap_or(60));

        Ok(Self {
            telegram_token,
            telegram_allowed_users,
            mistral_api_key,
            mistral_base_url,
            mistral_text_model,
            mistral_agent_model,
            mistral_agent_id,
            mistral_timeout,
            temp_dir,
            telegram_message_limit,
            telegram_caption_limit,
            audit_log_path,
            audit_log_json,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_usize(v: Option<String>) -> Option<usize> {
    v.and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
