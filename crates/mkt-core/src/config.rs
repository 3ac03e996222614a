//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. marketer.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::prompt::DEFAULT_TEMPLATE;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "marketer.toml";

/// How the conversation is handed to the model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Render history and question into one templated user message
    #[default]
    Template,
    /// Send the system prompt, each turn and the question as native messages
    Native,
}

impl PromptMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "template" => Some(Self::Template),
            "native" | "messages" => Some(Self::Native),
            _ => None,
        }
    }
}

/// LLM configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider API key
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request a streamed response and join the deltas
    pub stream: bool,

    /// Prompt assembly strategy
    pub prompt_mode: PromptMode,

    /// Prompt template (`{chat_history}` and `{user_question}` placeholders)
    pub template: String,

    /// Outbound request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: false,
            prompt_mode: PromptMode::Template,
            template: DEFAULT_TEMPLATE.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("prompt_mode", &self.prompt_mode)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port for HTTP API server
    pub port: u16,

    /// Allowed CORS origins. `None` allows any origin.
    pub allowed_origins: Option<Vec<String>>,

    /// Directory holding `index.html` and the frontend assets
    pub static_dir: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            allowed_origins: None,
            static_dir: default_static_dir(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// LLM configuration
    pub llm: LlmConfig,

    /// HTTP API configuration
    pub api: ApiConfig,
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_api_port() -> u16 {
    8000
}

fn default_static_dir() -> String {
    "static".to_string()
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Some(env_value) = lookup(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// 設定を読み込む
    ///
    /// `path` が指定されていればそのファイルを、なければカレントディレクトリの
    /// `marketer.toml` を試し、どちらもなければ環境変数のみを使います。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(DEFAULT_CONFIG_FILE)
            }
            None => Self::from_env(),
        }
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後、環境変数による上書きが適用されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content, |key| std::env::var(key).ok())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content, then apply overrides from `lookup`
    pub fn from_toml_str(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = Self::expand_env_vars(content, &lookup);

        let toml: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        let mut config = Self::from_toml_config(toml)?;
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 構造から Config を構築
    fn from_toml_config(toml: TomlConfig) -> Result<Self> {
        let defaults = Config::default();

        let llm = toml.llm.unwrap_or_default();
        let prompt_mode = match llm.prompt_mode {
            Some(mode) => PromptMode::parse(&mode)
                .ok_or_else(|| Error::Config(format!("Unknown prompt_mode: {}", mode)))?,
            None => defaults.llm.prompt_mode,
        };

        let llm_config = LlmConfig {
            api_key: llm.api_key.unwrap_or_default(),
            model: llm.model.unwrap_or(defaults.llm.model),
            base_url: llm.base_url.unwrap_or(defaults.llm.base_url),
            max_tokens: llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
            temperature: llm.temperature.unwrap_or(defaults.llm.temperature),
            stream: llm.stream.unwrap_or(defaults.llm.stream),
            prompt_mode,
            template: llm.template.unwrap_or(defaults.llm.template),
            timeout_secs: llm.timeout_secs.unwrap_or(defaults.llm.timeout_secs),
        };

        let api = toml.api.unwrap_or_default();
        let api_config = ApiConfig {
            port: api.port.unwrap_or(defaults.api.port),
            allowed_origins: api.allowed_origins,
            static_dir: api.static_dir.unwrap_or(defaults.api.static_dir),
        };

        Ok(Config {
            llm: llm_config,
            api: api_config,
        })
    }

    /// 環境変数で設定を上書きする
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // GROQ_API_KEY が優先、なければ API_KEY
        if let Some(key) = non_empty("GROQ_API_KEY").or_else(|| non_empty("API_KEY")) {
            self.llm.api_key = key;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = non_empty("LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(value) = non_empty("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_var("LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = non_empty("LLM_TEMPERATURE") {
            self.llm.temperature = parse_var("LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = non_empty("LLM_STREAM") {
            self.llm.stream = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = non_empty("LLM_PROMPT_MODE") {
            self.llm.prompt_mode = PromptMode::parse(&value)
                .ok_or_else(|| Error::Config(format!("Unknown LLM_PROMPT_MODE: {}", value)))?;
        }
        if let Some(value) = non_empty("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_var("LLM_TIMEOUT_SECS", &value)?;
        }

        // PORT はホスティング環境 (Railway 等) が設定する
        if let Some(port) = non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            self.api.port = parse_var("PORT", &port)?;
        }
        if let Some(origins) = non_empty("API_ALLOWED_ORIGINS") {
            self.api.allowed_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(dir) = non_empty("STATIC_DIR") {
            self.api.static_dir = dir;
        }

        Ok(())
    }

    /// Reject configurations the service cannot serve chat requests with
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(Error::Config(
                "GROQ_API_KEY (or API_KEY) not set".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::Config("LLM model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, value)))
}

// ============================================================================
// TOML 構造体定義（ファイル解析用）
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    llm: Option<TomlLlmConfig>,
    api: Option<TomlApiConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    stream: Option<bool>,
    /// "template" または "native"
    #[serde(default)]
    prompt_mode: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlApiConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    allowed_origins: Option<Vec<String>>,
    #[serde(default)]
    static_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "llama-3.3-70b-versatile");
        assert_eq!(config.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.prompt_mode, PromptMode::Template);
        assert!(!config.stream);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_api_config_default() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert!(config.allowed_origins.is_none());
        assert_eq!(config.static_dir, "static");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let result = Config::from_lookup(vars(&[("PORT", "9000")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_blank_api_key_is_config_error() {
        let result = Config::from_lookup(vars(&[("GROQ_API_KEY", "   ")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_api_key_fallback() {
        let config = Config::from_lookup(vars(&[("API_KEY", "legacy")])).unwrap();
        assert_eq!(config.llm.api_key, "legacy");

        let config = Config::from_lookup(vars(&[
            ("API_KEY", "legacy"),
            ("GROQ_API_KEY", "groq"),
        ]))
        .unwrap();
        assert_eq!(config.llm.api_key, "groq");
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(vars(&[
            ("GROQ_API_KEY", "k"),
            ("PORT", "9000"),
            ("LLM_STREAM", "true"),
            ("LLM_PROMPT_MODE", "native"),
            ("LLM_MAX_TOKENS", "64"),
            ("API_ALLOWED_ORIGINS", "http://a.example, http://b.example"),
        ]))
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert!(config.llm.stream);
        assert_eq!(config.llm.prompt_mode, PromptMode::Native);
        assert_eq!(config.llm.max_tokens, 64);
        assert_eq!(
            config.api.allowed_origins,
            Some(vec!["http://a.example".to_string(), "http://b.example".to_string()])
        );
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = Config::from_lookup(vars(&[("GROQ_API_KEY", "k"), ("PORT", "eighty")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_expand_env_vars() {
        let lookup = vars(&[("MKT_TEST_VAR", "test_value")]);

        let result = Config::expand_env_vars("prefix_${MKT_TEST_VAR}_suffix", &lookup);
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${NONEXISTENT_VAR}_suffix", &lookup);
        assert_eq!(result, "prefix__suffix");

        let result = Config::expand_env_vars("no_vars_here", &lookup);
        assert_eq!(result, "no_vars_here");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[llm]
api_key = "${SECRET}"
model = "llama-3.1-8b-instant"
max_tokens = 256
temperature = 0.2
stream = true
prompt_mode = "native"

[api]
port = 8080
allowed_origins = ["https://marketer.example"]
static_dir = "/srv/static"
"#;

        let config = Config::from_toml_str(toml_content, vars(&[("SECRET", "from_env")])).unwrap();

        assert_eq!(config.llm.api_key, "from_env");
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.llm.max_tokens, 256);
        assert!(config.llm.stream);
        assert_eq!(config.llm.prompt_mode, PromptMode::Native);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.static_dir, "/srv/static");
    }

    #[test]
    fn test_env_wins_over_toml() {
        let toml_content = r#"
[llm]
api_key = "file_key"
model = "from-file"
"#;
        let config = Config::from_toml_str(
            toml_content,
            vars(&[("LLM_MODEL", "from-env"), ("PORT", "7000")]),
        )
        .unwrap();

        assert_eq!(config.llm.api_key, "file_key");
        assert_eq!(config.llm.model, "from-env");
        assert_eq!(config.api.port, 7000);
    }

    #[test]
    fn test_unknown_prompt_mode_in_toml() {
        let toml_content = r#"
[llm]
api_key = "k"
prompt_mode = "freestyle"
"#;
        let result = Config::from_toml_str(toml_content, vars(&[]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marketer.toml");
        std::fs::write(&path, "[llm]\napi_key = \"file_key\"\n\n[api]\nstatic_dir = \"web\"\n")
            .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert!(!config.llm.api_key.is_empty());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = LlmConfig {
            api_key: "gsk_secret".to_string(),
            ..LlmConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("gsk_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
