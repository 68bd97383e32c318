//! Error types for LocalEngine.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Site error: {0}")]
    Site(#[from] SiteError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    /// Whether this error is a uniqueness-constraint violation.
    ///
    /// libsql surfaces constraint failures as query errors with the SQLite
    /// message text, so both the typed variant and the message are checked.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::Constraint(_) => true,
            DatabaseError::Query(msg) => {
                msg.contains("UNIQUE constraint failed") || msg.contains("SQLITE_CONSTRAINT")
            }
            _ => false,
        }
    }
}

/// Errors from the inbound webhook boundary.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Unparsable payload: {0}")]
    BadPayload(String),
}

/// Errors from the outbound chat transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Transport request failed: {0}")]
    Request(String),

    #[error("Media download failed: {0}")]
    Media(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the business-listing platform.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("Listing API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Listing request failed: {0}")]
    Request(String),

    #[error("Client {client_id} has no listing location configured")]
    NotConfigured { client_id: i64 },
}

impl ListingError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ListingError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_rate_limit(&self) -> bool {
        self.status() == Some(429)
    }
}

/// Errors from AI draft generation.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    #[error("Generator returned empty text")]
    EmptyResponse,
}

/// Errors from the static-site publisher.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Site API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Site request failed: {0}")]
    Request(String),

    #[error("Client {client_id} has no site repository configured")]
    NotConfigured { client_id: i64 },
}

impl SiteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SiteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Workflow-engine errors (image handling, malformed references).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Malformed action id: {0}")]
    BadActionId(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_detected_from_message() {
        let err = DatabaseError::Query(
            "insert_item: UNIQUE constraint failed: workflow_items.client_id".to_string(),
        );
        assert!(err.is_unique_violation());

        let err = DatabaseError::Constraint("duplicate".to_string());
        assert!(err.is_unique_violation());

        let err = DatabaseError::Query("no such table: clients".to_string());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn listing_error_status_helpers() {
        let err = ListingError::Api {
            status: 401,
            detail: "token expired".to_string(),
        };
        assert!(err.is_auth());
        assert!(!err.is_rate_limit());

        let err = ListingError::Request("connection reset".to_string());
        assert_eq!(err.status(), None);
    }
}
