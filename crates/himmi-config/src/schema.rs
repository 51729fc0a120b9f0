use serde::{Deserialize, Serialize};

/// Root configuration — maps to `himmi.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub shadow: ShadowConfig,
    pub logging: LoggingConfig,
    /// Simulator mode: short-circuit upstream calls with a deterministic
    /// canned response. For offline testing only.
    pub simulator: bool,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:8000".
    pub listen: String,
    /// Permissive CORS for browser clients.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".into(),
            cors: true,
        }
    }
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string. Required in production.
    pub url: Option<String>,
    /// Upper bound on the process-wide connection pool.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 16,
        }
    }
}

// ── Security ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// 32-byte base64 key for tenant-credential encryption at rest.
    /// Required in production.
    pub encryption_key: Option<String>,
}

// ── Semantic cache ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection string. Absent means caching is disabled.
    pub redis_url: Option<String>,
    /// Maximum cosine distance for a cache hit.
    pub distance_threshold: f32,
    /// Key prefix for cache entries.
    pub index: String,
    /// Entries scanned per lookup; oldest beyond this are evicted.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            distance_threshold: 0.04,
            index: "himmi_cache".into(),
            max_entries: 512,
        }
    }
}

// ── Upstream providers ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-call timeout for upstream requests, in seconds.
    pub timeout_secs: u64,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub xai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    /// Base URL for a local Ollama daemon.
    pub ollama_base_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
            groq_api_key: None,
            mistral_api_key: None,
            perplexity_api_key: None,
            xai_api_key: None,
            deepseek_api_key: None,
            ollama_base_url: "http://localhost:11434".into(),
        }
    }
}

impl UpstreamConfig {
    /// Platform key for a canonical provider family, if configured.
    pub fn platform_key(&self, canonical: &str) -> Option<&str> {
        match canonical {
            "openai" => self.openai_api_key.as_deref(),
            "anthropic" => self.anthropic_api_key.as_deref(),
            "gemini" => self.gemini_api_key.as_deref(),
            "groq" => self.groq_api_key.as_deref(),
            "mistral" => self.mistral_api_key.as_deref(),
            "perplexity" => self.perplexity_api_key.as_deref(),
            "xai" => self.xai_api_key.as_deref(),
            "deepseek" => self.deepseek_api_key.as_deref(),
            _ => None,
        }
    }
}

// ── Shadow mode ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Model the shadow branch calls. Small and fast by default.
    pub model: String,
    /// Canonical provider family serving the shadow model.
    pub provider: String,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            model: "llama3-8b-8192".into(),
            provider: "groq".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "himmi=debug,sqlx=warn".
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Validate the config. Returns warnings for suspicious-but-workable
    /// settings; errors only for settings that cannot be used at all.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        use base64::Engine;

        let mut warnings = Vec::new();

        if let Some(ref key) = self.security.encryption_key {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key)
                .map_err(|e| format!("security.encryption_key is not valid base64: {e}"))?;
            if decoded.len() != 32 {
                return Err(format!(
                    "security.encryption_key must decode to 32 bytes, got {}",
                    decoded.len()
                ));
            }
        } else {
            warnings.push("no encryption key configured — tenant provider credentials are unavailable".into());
        }

        if self.database.url.is_none() && !self.simulator {
            warnings.push("no database URL configured — only simulator mode can run without one".into());
        }

        if self.cache.redis_url.is_none() {
            warnings.push("no Redis URL configured — semantic cache disabled".into());
        }

        if !(0.0..=1.0).contains(&self.cache.distance_threshold) {
            return Err(format!(
                "cache.distance_threshold must be within [0, 1], got {}",
                self.cache.distance_threshold
            ));
        }

        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".into());
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = GatewayConfig::default();
        let warnings = config.validate().unwrap();
        // No DB, no cache, no vault key: three warnings, no errors.
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_bad_encryption_key_rejected() {
        let mut config = GatewayConfig::default();
        config.security.encryption_key = Some("too-short".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_good_encryption_key_accepted() {
        use base64::Engine;
        let mut config = GatewayConfig::default();
        config.security.encryption_key =
            Some(base64::engine::general_purpose::STANDARD.encode([7u8; 32]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_platform_key_lookup() {
        let mut upstream = UpstreamConfig::default();
        upstream.groq_api_key = Some("gsk-test".into());
        assert_eq!(upstream.platform_key("groq"), Some("gsk-test"));
        assert_eq!(upstream.platform_key("openai"), None);
        assert_eq!(upstream.platform_key("unknown"), None);
    }
}
