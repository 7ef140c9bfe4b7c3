//! Runner configuration: router settings plus the provider set to register.
//!
//! ```toml
//! [router]
//! analytics_enabled = true
//!
//! [[providers]]
//! name = "echo"
//! kind = "noop"
//!
//! [[providers]]
//! name = "llama"
//! kind = "http"
//! base_url = "http://localhost:8080/v1"
//! model = "qwen2.5-coder"
//! cost_per_token = 0.00002
//! ```

use anyhow::{bail, Context, Result};
use routing::{
    HttpProvider, HttpProviderConfig, LocalEngineConfig, LocalEngineProvider, NoopProvider,
    ProviderProfile, RouterConfig, SharedProvider,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub router: RouterConfig,
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    /// Overrides the class default used before any response-time sample exists.
    #[serde(default)]
    pub default_response_ms: Option<u64>,
    #[serde(flatten)]
    pub backend: Backend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    Http(HttpProviderConfig),
    Local(LocalEngineConfig),
    Noop {
        #[serde(default)]
        prefix: Option<String>,
    },
}

impl RunnerConfig {
    /// Parse, apply `ROUTER_*` environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_overrides(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_overrides<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.router.apply_overrides_from(lookup);
        config
            .router
            .validate()
            .with_context(|| format!("invalid router settings in {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a document without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        config.router.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: RunnerConfig = toml::from_str(content)?;

        let mut seen = HashSet::new();
        for entry in &config.providers {
            if entry.name.trim().is_empty() {
                bail!("provider name must not be empty");
            }
            if !seen.insert(entry.name.as_str()) {
                bail!("provider '{}' configured twice", entry.name);
            }
        }
        Ok(config)
    }

    /// Single no-op provider on environment-derived router settings.
    pub fn fallback() -> Result<Self> {
        Ok(Self {
            router: RouterConfig::from_env()?,
            providers: vec![ProviderEntry {
                name: "echo".to_string(),
                default_response_ms: None,
                backend: Backend::Noop { prefix: None },
            }],
        })
    }
}

impl ProviderEntry {
    pub fn profile(&self) -> ProviderProfile {
        let profile = match &self.backend {
            Backend::Http(http) => match http.cost_per_token {
                Some(rate) => ProviderProfile::remote(rate),
                None => ProviderProfile::default(),
            },
            Backend::Local(_) => ProviderProfile::local(),
            Backend::Noop { .. } => ProviderProfile::noop(),
        };
        match self.default_response_ms {
            Some(ms) => profile.with_default_response_ms(ms),
            None => profile,
        }
    }

    pub fn build(&self) -> Result<SharedProvider> {
        let provider: SharedProvider = match &self.backend {
            Backend::Http(http) => Arc::new(
                HttpProvider::new(http.clone())
                    .with_context(|| format!("failed to build http provider '{}'", self.name))?,
            ),
            Backend::Local(local) => Arc::new(LocalEngineProvider::new(local.clone())),
            Backend::Noop { prefix: Some(p) } => Arc::new(NoopProvider::with_prefix(p.clone())),
            Backend::Noop { prefix: None } => Arc::new(NoopProvider::new()),
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::{LoadBalancingStrategy, ProviderClass};
    use std::io::Write;

    const SAMPLE: &str = r#"
[router]
analytics_enabled = true
default_strategy = "round_robin"

[[providers]]
name = "echo"
kind = "noop"
prefix = "echo: "

[[providers]]
name = "llama"
kind = "http"
base_url = "http://localhost:8080/v1"
model = "qwen2.5-coder"
cost_per_token = 0.00002
default_response_ms = 1500

[[providers]]
name = "engine"
kind = "local"
program = "/usr/local/bin/engine"
args = ["--stdin"]
"#;

    #[test]
    fn test_parses_all_backends() {
        let config = RunnerConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.router.analytics_enabled);
        assert_eq!(config.router.default_strategy, LoadBalancingStrategy::RoundRobin);
        assert_eq!(config.providers.len(), 3);

        assert!(matches!(config.providers[0].backend, Backend::Noop { prefix: Some(_) }));
        match &config.providers[1].backend {
            Backend::Http(http) => {
                assert_eq!(http.model, "qwen2.5-coder");
                assert_eq!(http.max_tokens, 2048);
            }
            other => panic!("expected http backend, got {other:?}"),
        }
        match &config.providers[2].backend {
            Backend::Local(local) => assert_eq!(local.args, vec!["--stdin".to_string()]),
            other => panic!("expected local backend, got {other:?}"),
        }
    }

    #[test]
    fn test_profiles_follow_backend_kind() {
        let config = RunnerConfig::from_toml_str(SAMPLE).unwrap();
        let echo = config.providers[0].profile();
        assert_eq!(echo.class, ProviderClass::Noop);
        assert_eq!(echo.cost_per_token, 0.0);

        let llama = config.providers[1].profile();
        assert_eq!(llama.class, ProviderClass::Remote);
        assert!((llama.cost_per_token - 0.00002).abs() < 1e-12);
        assert_eq!(llama.default_response_ms, 1500);

        assert_eq!(config.providers[2].profile().class, ProviderClass::Local);
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let toml = r#"
[[providers]]
name = "a"
kind = "noop"

[[providers]]
name = "a"
kind = "noop"
"#;
        let err = RunnerConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = r#"
[[providers]]
name = "a"
kind = "carrier-pigeon"
"#;
        assert!(RunnerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.providers[0].name, "echo");
        assert!(config.providers.iter().all(|p| p.build().is_ok()));
    }

    #[test]
    fn test_env_override_applies_before_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[router.retry]\ndefault_max_attempts = 0\n").unwrap();

        assert!(RunnerConfig::load_with_overrides(file.path(), |_| None).is_err());
        let config = RunnerConfig::load_with_overrides(file.path(), |k| {
            (k == "ROUTER_MAX_ATTEMPTS").then(|| "2".to_string())
        })
        .unwrap();
        assert_eq!(config.router.retry.default_max_attempts, 2);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunnerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_fallback_registers_echo() {
        let config = RunnerConfig::fallback().unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].profile().class, ProviderClass::Noop);
    }
}
