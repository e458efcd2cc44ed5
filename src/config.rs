use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskmasterConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentDefConfig,
    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    8000
}
fn default_bind() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Overrides the provider's API URL (proxies, local gateways, tests).
    pub endpoint: Option<String>,
}

impl Default for AgentDefConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            endpoint: None,
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Memory update rounds allowed per inbound message.
    #[serde(default = "default_max_update_rounds")]
    pub max_update_rounds: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_update_rounds: default_max_update_rounds(),
        }
    }
}

fn default_max_update_rounds() -> u32 {
    1
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `TASKMASTER_CONFIG` env var
/// 2. `~/.taskmaster/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<TaskmasterConfig> {
    let path = config_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config = parse(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
        resolve_api_key(&mut config);

        info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        info!("no config file found, using zero-config defaults");
        let mut config = TaskmasterConfig::default();
        resolve_api_key(&mut config);
        Ok(config)
    }
}

/// Parse and validate a TOML config document.
pub fn parse(content: &str) -> anyhow::Result<TaskmasterConfig> {
    let config: TaskmasterConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TASKMASTER_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".taskmaster").join("config.toml")
}

/// Resolve API key from environment variables if not set in config.
fn resolve_api_key(config: &mut TaskmasterConfig) {
    if config.agent.api_key.is_none() {
        config.agent.api_key = match config.agent.provider.as_str() {
            "anthropic" => std::env::var("ANTHROPIC_API_KEY").ok(),
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        };
    }
}

/// Validate the config and return clear error messages.
fn validate(config: &TaskmasterConfig) -> anyhow::Result<()> {
    let valid_providers = ["anthropic", "openai"];
    if !valid_providers.contains(&config.agent.provider.as_str()) {
        anyhow::bail!(
            "invalid provider '{}': must be one of {:?}",
            config.agent.provider,
            valid_providers
        );
    }

    if config.agent.max_tokens == 0 {
        anyhow::bail!("agent.max_tokens must be > 0");
    }

    if let Some(endpoint) = &config.agent.endpoint {
        let scheme = url::Url::parse(endpoint)
            .map(|u| u.scheme().to_string())
            .unwrap_or_default();
        if scheme != "http" && scheme != "https" {
            anyhow::bail!("agent.endpoint must be an http(s) URL, got '{endpoint}'");
        }
    }

    Ok(())
}
