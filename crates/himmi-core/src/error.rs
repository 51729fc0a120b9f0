use thiserror::Error;

/// Unified error type for the entire gateway.
///
/// The first group of variants is terminal for a request and maps to a client
/// status code; the rest are internal faults that either surface as a 403
/// upstream error or are swallowed by the stage that raised them.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ── Request-terminal errors ────────────────────────────────
    #[error("Missing or invalid Authorization header")]
    MalformedAuth,

    #[error("Invalid or disabled API Key")]
    InvalidKey,

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("User configuration error (no tenant)")]
    TenantMisconfigured,

    #[error("Model not supported or mapping missing")]
    ModelUnsupported,

    #[error("LLM Provider Error: {0}")]
    Upstream(String),

    // ── Non-fatal faults (recorded, never returned to the client) ──
    #[error("credential decrypt failed: {0}")]
    CredentialDecrypt(String),

    #[error("cache error: {0}")]
    Cache(String),

    // ── Infrastructure errors ──────────────────────────────────
    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// HTTP status code this error surfaces as when it terminates a request.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::MalformedAuth => 401,
            GatewayError::InvalidKey
            | GatewayError::InsufficientCredits
            | GatewayError::TenantMisconfigured
            | GatewayError::ModelUnsupported
            | GatewayError::Upstream(_) => 403,
            _ => 500,
        }
    }

    /// The `{detail}` string returned to the client.
    pub fn detail(&self) -> String {
        self.to_string()
    }

    /// Only upstream-tagged errors are eligible for the fallback branch.
    pub fn is_upstream(&self) -> bool {
        matches!(self, GatewayError::Upstream(_))
    }

    /// Whether a request terminated by this error still gets a RequestLog
    /// row. Key-level failures carry no identity, so there is nothing to
    /// attribute the row to.
    pub fn is_logged(&self) -> bool {
        !matches!(self, GatewayError::MalformedAuth | GatewayError::InvalidKey)
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
