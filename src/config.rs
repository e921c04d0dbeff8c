use std::env;
use std::time::Duration;

/// Server configuration, loaded from the environment with one typed
/// section per component.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub asr: AsrConfig,
    pub pool: PoolSettings,
    pub llm: LlmConfig,
    pub audio: AudioConfig,
    pub sessions: SessionSettings,
}

/// ASR backend endpoint and TLS settings.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Validate the backend certificate when connecting over TLS.
    pub tls_verify: bool,
}

impl AsrConfig {
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// ASR connection pool bounds.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Use the shared pool; false gives every session a dedicated connection.
    pub enabled: bool,
    pub min_connections: usize,
    pub max_connections: usize,
    pub max_idle: Duration,
}

/// LLM completion provider settings (OpenAI-compatible API).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// Audio normalization settings.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub target_sample_rate: u32,
}

/// Session and history bookkeeping settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_conversation_turns: usize,
    pub cleanup_after: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let asr = AsrConfig {
            host: env::var("ASR_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: parse_var("ASR_PORT", 10095)?,
            use_tls: flag_var("ASR_USE_TLS", false),
            tls_verify: flag_var("ASR_TLS_VERIFY", false),
        };

        let pool = PoolSettings {
            enabled: flag_var("USE_CONNECTION_POOL", true),
            min_connections: parse_var("POOL_MIN_CONNECTIONS", 2)?,
            max_connections: parse_var("POOL_MAX_CONNECTIONS", 20)?,
            max_idle: Duration::from_secs(parse_var("POOL_MAX_IDLE_SECS", 300u64)?),
        };
        if pool.max_connections == 0 || pool.min_connections > pool.max_connections {
            return Err(format!(
                "Invalid pool bounds: min {} must not exceed max {}",
                pool.min_connections, pool.max_connections
            )
            .into());
        }

        let llm = LlmConfig {
            api_base: env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
            api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            model: env::var("LLM_MODEL").unwrap_or_default(),
        };

        let audio = AudioConfig {
            target_sample_rate: parse_var("AUDIO_TARGET_SAMPLE_RATE", 16000u32)?,
        };

        let sessions = SessionSettings {
            max_conversation_turns: parse_var("MAX_CONVERSATION_TURNS", 5)?,
            cleanup_after: Duration::from_secs(parse_var("SESSION_CLEANUP_HOURS", 1u64)? * 3600),
        };

        Ok(ServerConfig {
            host,
            port,
            asr,
            pool,
            llm,
            audio,
            sessions,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| format!("Invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}

fn flag_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            asr: AsrConfig {
                host: "localhost".to_string(),
                port: 10095,
                use_tls: false,
                tls_verify: false,
            },
            pool: PoolSettings {
                enabled: true,
                min_connections: 2,
                max_connections: 20,
                max_idle: Duration::from_secs(300),
            },
            llm: LlmConfig {
                api_base: "http://localhost:11434/v1".to_string(),
                api_key: String::new(),
                model: "test".to_string(),
            },
            audio: AudioConfig {
                target_sample_rate: 16000,
            },
            sessions: SessionSettings {
                max_conversation_turns: 5,
                cleanup_after: Duration::from_secs(3600),
            },
        }
    }

    #[test]
    fn test_address_formatting() {
        let config = test_config();
        assert_eq!(config.address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_asr_url_scheme_follows_tls_flag() {
        let mut config = test_config();
        assert_eq!(config.asr.url(), "ws://localhost:10095");

        config.asr.use_tls = true;
        assert_eq!(config.asr.url(), "wss://localhost:10095");
    }

    #[test]
    fn test_flag_var_accepts_common_truthy_values() {
        // Unset variables fall back to the default
        assert!(flag_var("VOXRELAY_TEST_UNSET_FLAG", true));
        assert!(!flag_var("VOXRELAY_TEST_UNSET_FLAG", false));
    }
}
