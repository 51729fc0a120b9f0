use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::GatewayConfig;

/// Loads the gateway configuration from disk and the environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config path: explicit path > HIMMI_CONFIG env > ./himmi.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("HIMMI_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("himmi.toml")
    }

    /// Load the config from disk, falling back to defaults, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> himmi_core::Result<GatewayConfig> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<GatewayConfig>(&raw).map_err(|e| {
                himmi_core::GatewayError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            GatewayConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(himmi_core::GatewayError::Config(e));
            }
        }

        Ok(config)
    }

    /// Apply env var overrides. Env wins over the file for deployment
    /// essentials; provider API keys fill in only when the file leaves
    /// them unset.
    fn apply_env_overrides(mut config: GatewayConfig) -> GatewayConfig {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database.url = Some(v);
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY") {
            config.security.encryption_key = Some(v);
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            config.cache.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("HIMMI_SIMULATOR") {
            config.simulator = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("HIMMI_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("HIMMI_LOG_LEVEL") {
            config.logging.level = v;
        }

        // Provider keys: config file takes priority, env is the fallback.
        let key_vars: [(&str, &mut Option<String>); 8] = [
            ("OPENAI_API_KEY", &mut config.upstream.openai_api_key),
            ("ANTHROPIC_API_KEY", &mut config.upstream.anthropic_api_key),
            ("GEMINI_API_KEY", &mut config.upstream.gemini_api_key),
            ("GROQ_API_KEY", &mut config.upstream.groq_api_key),
            ("MISTRAL_API_KEY", &mut config.upstream.mistral_api_key),
            ("PERPLEXITY_API_KEY", &mut config.upstream.perplexity_api_key),
            ("XAI_API_KEY", &mut config.upstream.xai_api_key),
            ("DEEPSEEK_API_KEY", &mut config.upstream.deepseek_api_key),
        ];
        for (var, slot) in key_vars {
            if slot.is_none() {
                if let Ok(v) = std::env::var(var) {
                    *slot = Some(v);
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ConfigLoader::load(Some(Path::new("/nonexistent/himmi.toml"))).unwrap();
        assert_eq!(config.upstream.timeout_secs, 30);
        assert!(!config.simulator);
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "simulator = true\n[server]\nlisten = \"127.0.0.1:9000\"\n[upstream]\ntimeout_secs = 5"
        )
        .unwrap();
        let config = ConfigLoader::load(Some(f.path())).unwrap();
        assert!(config.simulator);
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.upstream.timeout_secs, 5);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[[[not toml").unwrap();
        assert!(ConfigLoader::load(Some(f.path())).is_err());
    }
}
