//! Text-generation provider abstraction.
//!
//! [`GenerationProvider`] is the black-box contract the condenser
//! consumes: system instruction + user prompt in, generated text out.
//! Providers are held in a [`ProviderRegistry`] keyed by logical id,
//! built once at startup from configuration and passed by reference to
//! whatever needs to issue generation calls.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;

#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Logical id used for registry lookup (e.g. `"long-context"`).
    fn id(&self) -> &str;

    /// Human-readable name for display.
    fn name(&self) -> &str;

    async fn generate(&self, params: &GenerateParams) -> Result<GenerateResult>;
}

/// Capability-keyed provider map. Construct once, pass by reference.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn GenerationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Build a registry from the configured provider list.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(HttpChatProvider::new(config)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn GenerationProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn GenerationProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Generation provider \"{}\" not registered", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Provider for an OpenAI-compatible `POST {base_url}/chat/completions`
/// endpoint, collected (non-streamed) output.
pub struct HttpChatProvider {
    client: reqwest::Client,
    id: String,
    name: String,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpChatProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.model.clone()),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl GenerationProvider for HttpChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, params: &GenerateParams) -> Result<GenerateResult> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": params.system_prompt },
                { "role": "user", "content": params.user_prompt },
            ],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid generation response: missing message content"))?
            .to_string();

        let usage = TokenUsage {
            input_tokens: json
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: json
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        };

        Ok(GenerateResult { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider {
        id: String,
    }

    #[async_trait]
    impl GenerationProvider for EchoProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, params: &GenerateParams) -> Result<GenerateResult> {
            Ok(GenerateResult {
                content: params.user_prompt.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    #[test]
    fn registry_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider {
            id: "echo".to_string(),
        }));

        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_ok());
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn register_replaces_same_id() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider {
            id: "echo".to_string(),
        }));
        registry.register(Arc::new(EchoProvider {
            id: "echo".to_string(),
        }));
        assert_eq!(registry.len(), 1);
    }
}
