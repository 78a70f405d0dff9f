use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub condenser: CondenserConfig,
    /// Generation providers available for lookup by logical id.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_chunk_tokens() -> usize {
    500
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_similarity_threshold() -> f64 {
    0.3
}

/// Token allocation for prompt assembly.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_system_prompt_tokens")]
    pub system_prompt_tokens: usize,
    #[serde(default = "default_prompt_template_tokens")]
    pub prompt_template_tokens: usize,
    #[serde(default = "default_max_fact_tokens")]
    pub max_fact_tokens: usize,
    #[serde(default = "default_max_notes_tokens")]
    pub max_notes_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            system_prompt_tokens: default_system_prompt_tokens(),
            prompt_template_tokens: default_prompt_template_tokens(),
            max_fact_tokens: default_max_fact_tokens(),
            max_notes_tokens: default_max_notes_tokens(),
        }
    }
}

fn default_max_input_tokens() -> usize {
    12000
}
fn default_system_prompt_tokens() -> usize {
    800
}
fn default_prompt_template_tokens() -> usize {
    500
}
fn default_max_fact_tokens() -> usize {
    3000
}
fn default_max_notes_tokens() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    10
}
fn default_api_key_env() -> String {
    "DOSSIER_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Average extracted characters per page below which a PDF is
    /// judged image-based and routed to OCR.
    #[serde(default = "default_text_density_threshold")]
    pub text_density_threshold: f64,
    #[serde(default = "default_render_dpi")]
    pub render_dpi: f32,
    #[serde(default = "default_ocr_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key_env: default_api_key_env(),
            text_density_threshold: default_text_density_threshold(),
            render_dpi: default_render_dpi(),
            max_output_tokens: default_ocr_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_text_density_threshold() -> f64 {
    50.0
}
fn default_render_dpi() -> f32 {
    150.0
}
fn default_ocr_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct CondenserConfig {
    /// Provider id looked up in the registry. `None` disables
    /// condensation and the chunk retriever is used directly.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_condenser_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for CondenserConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_output_tokens: default_condenser_max_output_tokens(),
        }
    }
}

fn default_condenser_max_output_tokens() -> u32 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_tokens == 0 {
        anyhow::bail!("chunking.max_chunk_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_chunk_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_chunk_tokens");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }

    let overhead = config.budget.system_prompt_tokens + config.budget.prompt_template_tokens;
    if overhead >= config.budget.max_input_tokens {
        anyhow::bail!("budget.max_input_tokens must exceed the reserved prompt overhead");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.ocr.text_density_threshold < 0.0 {
        anyhow::bail!("ocr.text_density_threshold must be >= 0");
    }

    if let Some(ref id) = config.condenser.model {
        if !config.providers.iter().any(|p| &p.id == id) {
            anyhow::bail!("condenser.model '{}' is not a configured provider", id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[storage]
db_path = "/tmp/dossier.sqlite"
upload_dir = "/tmp/uploads"

[embedding]
base_url = "http://localhost:8080/v1"
model = "text-embedding-v3"
"#
        .to_string()
    }

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_applied() {
        let config = parse(&base_toml()).unwrap();
        assert_eq!(config.chunking.max_chunk_tokens, 500);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.retrieval.top_k, 8);
        assert!((config.retrieval.similarity_threshold - 0.3).abs() < 1e-9);
        assert_eq!(config.budget.max_input_tokens, 12000);
        assert_eq!(config.embedding.batch_size, 10);
        assert_eq!(config.embedding.dims, 1024);
        assert!(config.condenser.model.is_none());
        assert!((config.ocr.text_density_threshold - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let toml_str = format!(
            "{}\n[chunking]\nmax_chunk_tokens = 100\noverlap_tokens = 100\n",
            base_toml()
        );
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn rejects_unregistered_condenser_model() {
        let toml_str = format!("{}\n[condenser]\nmodel = \"long-context\"\n", base_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn accepts_registered_condenser_model() {
        let toml_str = format!(
            r#"{}
[condenser]
model = "long-context"

[[providers]]
id = "long-context"
base_url = "http://localhost:8080/v1"
model = "qwen-long"
"#,
            base_toml()
        );
        let config = parse(&toml_str).unwrap();
        assert_eq!(config.condenser.model.as_deref(), Some("long-context"));
        assert_eq!(config.providers.len(), 1);
    }
}
