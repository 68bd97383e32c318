//! Configuration — environment-driven settings and domain constants.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default AI model for draft generation.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Chat transport API base (Graph API style).
pub const DEFAULT_CHAT_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Business-listing API base (local posts, reviews).
pub const DEFAULT_LISTING_API_BASE: &str = "https://mybusiness.googleapis.com/v4";

/// Business-listing performance metrics API base.
pub const DEFAULT_METRICS_API_BASE: &str = "https://businessprofileperformance.googleapis.com/v1";

/// Static-site contents API base.
pub const DEFAULT_SITE_API_BASE: &str = "https://api.github.com";

/// Max characters of a draft shown in a chat preview before truncation.
pub const DRAFT_PREVIEW_MAX: usize = 900;

/// Max characters of a list-message body; longer confirmations are split.
pub const MENU_BODY_MAX: usize = 1024;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// Path to the local database file.
    pub db_path: String,
    /// Token echoed back during webhook subscription verification.
    pub verify_token: String,
    /// Shared secret for inbound payload signatures.
    pub app_secret: SecretString,
    /// Bearer token for the outbound chat transport.
    pub access_token: SecretString,
    /// Sender phone number id on the chat transport.
    pub phone_id: String,
    /// API key for draft generation.
    pub anthropic_api_key: SecretString,
    /// Model used for draft generation.
    pub model: String,
    /// Chat transport API base URL.
    pub chat_api_base: String,
    /// Listing platform API base URL.
    pub listing_api_base: String,
    /// Listing performance metrics API base URL.
    pub metrics_api_base: String,
    /// Bearer token for the listing platform.
    pub listing_token: SecretString,
    /// Static-site contents API base URL.
    pub site_api_base: String,
    /// Token for the static-site contents API; site publishing is
    /// skipped when unset.
    pub site_token: Option<SecretString>,
    /// Hours before a pending review reply expires.
    pub review_expiry_hours: i64,
    /// Minutes of look-back when polling for new reviews. Wider than the
    /// poll cadence to tolerate scheduler jitter.
    pub review_lookback_minutes: i64,
    /// Days an offer stays valid by default.
    pub offer_duration_days: i64,
    /// UTC offset (hours) applied to the weekly digest schedule.
    pub digest_utc_offset_hours: i32,
    /// Max width for re-encoded photos.
    pub image_max_width: u32,
    /// JPEG quality for re-encoded photos.
    pub image_jpeg_quality: u8,
    /// Max accepted inbound image size in bytes.
    pub image_max_bytes: usize,
}

impl Config {
    /// Build configuration from environment variables.
    ///
    /// Secrets are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_parse("LOCAL_ENGINE_PORT", 8080)?,
            db_path: env_or("LOCAL_ENGINE_DB_PATH", "./data/local-engine.db"),
            verify_token: env_required("CHAT_VERIFY_TOKEN")?,
            app_secret: SecretString::from(env_required("CHAT_APP_SECRET")?),
            access_token: SecretString::from(env_required("CHAT_ACCESS_TOKEN")?),
            phone_id: env_required("CHAT_PHONE_ID")?,
            anthropic_api_key: SecretString::from(env_required("ANTHROPIC_API_KEY")?),
            model: env_or("LOCAL_ENGINE_MODEL", DEFAULT_MODEL),
            chat_api_base: env_or("CHAT_API_BASE", DEFAULT_CHAT_API_BASE),
            listing_api_base: env_or("LISTING_API_BASE", DEFAULT_LISTING_API_BASE),
            metrics_api_base: env_or("LISTING_METRICS_BASE", DEFAULT_METRICS_API_BASE),
            listing_token: SecretString::from(env_required("LISTING_ACCESS_TOKEN")?),
            site_api_base: env_or("SITE_API_BASE", DEFAULT_SITE_API_BASE),
            site_token: std::env::var("SITE_API_TOKEN").ok().map(SecretString::from),
            review_expiry_hours: env_parse("LOCAL_ENGINE_REVIEW_EXPIRY_HOURS", 48)?,
            review_lookback_minutes: env_parse("LOCAL_ENGINE_REVIEW_LOOKBACK_MIN", 30)?,
            offer_duration_days: env_parse("LOCAL_ENGINE_OFFER_DURATION_DAYS", 14)?,
            digest_utc_offset_hours: env_parse("LOCAL_ENGINE_DIGEST_UTC_OFFSET_HOURS", 0)?,
            image_max_width: env_parse("LOCAL_ENGINE_IMAGE_MAX_WIDTH", 1920)?,
            image_jpeg_quality: env_parse("LOCAL_ENGINE_IMAGE_QUALITY", 80)?,
            image_max_bytes: env_parse("LOCAL_ENGINE_IMAGE_MAX_BYTES", 20 * 1024 * 1024)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
