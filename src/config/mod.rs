// Configuration management module
// Loads TOML settings and applies environment overrides

pub mod settings;

pub use settings::{
    CONFIG_FILE_NAME, Config, ConfigError, DEFAULT_PROMPT_TEMPLATE, EmbeddingConfig,
    GenerationConfig, HttpConfig, IndexBackend, IndexConfig, KnowledgeConfig, OllamaConfig,
    OpenAiConfig, ProviderKind, RetrievalConfig, SourceKind,
};
