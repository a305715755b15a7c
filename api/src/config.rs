use std::time::Duration;

use tutor_core::conversation::DEFAULT_HISTORY_WINDOW;

use crate::store::RetryPolicy;

/// Runtime settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent in dev mode: documents then live in process memory.
    pub database_url: Option<String>,
    pub port: u16,
    pub ollama_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    /// Attempts and base backoff for each LLM call.
    pub llm_retry: RetryPolicy,
    pub save_retry: RetryPolicy,
    pub history_window: usize,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let defaults = RetryPolicy::default();
        let save_retry = RetryPolicy {
            attempts: parsed("TUTOR_SAVE_ATTEMPTS")
                .map(|n| n.clamp(1, 10) as u32)
                .unwrap_or(defaults.attempts),
            delay: parsed("TUTOR_SAVE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
        };

        let llm_retry = RetryPolicy {
            attempts: parsed("TUTOR_LLM_ATTEMPTS")
                .map(|n| n.clamp(1, 10) as u32)
                .unwrap_or(3),
            delay: Duration::from_millis(parsed("TUTOR_LLM_RETRY_DELAY_MS").unwrap_or(500)),
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            ollama_base_url: lookup("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            llm_model: lookup("TUTOR_LLM_MODEL").unwrap_or_else(|| "llama3".to_string()),
            llm_timeout: Duration::from_secs(parsed("TUTOR_LLM_TIMEOUT_SECS").unwrap_or(30)),
            llm_retry,
            save_retry,
            history_window: parsed("TUTOR_HISTORY_WINDOW")
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_HISTORY_WINDOW),
            cors_origins: lookup("TUTOR_CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.llm_model, "llama3");
        assert_eq!(cfg.llm_timeout, Duration::from_secs(30));
        assert_eq!(cfg.llm_retry.attempts, 3);
        assert_eq!(cfg.llm_retry.delay, Duration::from_millis(500));
        assert_eq!(cfg.save_retry.attempts, 3);
        assert_eq!(cfg.save_retry.delay, Duration::from_millis(100));
        assert_eq!(cfg.history_window, 20);
        assert_eq!(cfg.cors_origins, vec!["http://localhost:3000".to_string()]);
    }

    #[test]
    fn overrides_are_parsed_and_bad_values_ignored() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/tutor"),
            ("PORT", "not-a-port"),
            ("TUTOR_SAVE_ATTEMPTS", "5"),
            ("TUTOR_SAVE_RETRY_DELAY_MS", "0"),
            ("TUTOR_HISTORY_WINDOW", "0"),
            ("TUTOR_LLM_ATTEMPTS", "99"),
            ("TUTOR_CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ]);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/tutor"));
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.save_retry.attempts, 5);
        assert_eq!(cfg.save_retry.delay, Duration::ZERO);
        assert_eq!(cfg.history_window, 20);
        assert_eq!(cfg.llm_retry.attempts, 10);
        assert_eq!(cfg.cors_origins.len(), 2);
    }
}
