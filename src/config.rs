//! Configuration management
//!
//! Priority (highest to lowest): environment variables, config file, defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::auth::AuthMode;
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Directory tools operate in
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Replaces the built-in system prompt when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Maximum provider calls per user turn that may request tools
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// OpenAI-compatible endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Extra headers merged after authentication (custom headers win)
    #[serde(default, alias = "auth_headers")]
    pub custom_headers: BTreeMap<String, String>,

    /// Extra body parameters (temperature, max_tokens, ...)
    #[serde(default)]
    pub extra_params: Map<String, Value>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Request streamed completions and render text as it arrives
    #[serde(default = "default_stream")]
    pub stream: bool,
}

/// Authentication mode selection and token source settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Explicit mode; derived from the flags below when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AuthMode>,

    #[serde(default)]
    pub use_sso: bool,

    #[serde(default)]
    pub server_side_token_refresh: bool,

    /// OAuth2 token endpoint used by SSO and client-side refresh modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Fixed SSO bearer token, used instead of a token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_token: Option<String>,

    /// Pre-encoded basic credentials, used instead of client id/secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_credentials: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_timeout() -> f64 {
    120.0
}

fn default_stream() -> bool {
    true
}

fn default_max_iterations() -> usize {
    10
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            custom_headers: BTreeMap::new(),
            extra_params: Map::new(),
            timeout: default_timeout(),
            stream: default_stream(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            working_dir: default_working_dir(),
            system_prompt: None,
            max_iterations: default_max_iterations(),
        }
    }
}

impl Config {
    /// Request timeout as a [`Duration`].
    ///
    /// Zero, negative, non-finite and out-of-range values are rejected.
    pub fn timeout(&self) -> Result<Duration> {
        let seconds = self.llm.timeout;
        if seconds.is_nan() || seconds <= 0.0 {
            return Err(Error::Config(format!(
                "llm.timeout must be a positive number of seconds, got {}",
                seconds
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| Error::Config(format!("llm.timeout {} is out of range: {}", seconds, e)))
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("AUTO_CODER_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = non_empty("AUTO_CODER_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = non_empty("AUTO_CODER_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if self.llm.api_key.is_none() {
            if let Some(key) = non_empty("OPENAI_API_KEY") {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(flag) = non_empty("USE_SSO") {
            self.auth.use_sso = flag.eq_ignore_ascii_case("true");
        }
        if let Some(flag) = non_empty("SERVER_SIDE_TOKEN_REFRESH") {
            self.auth.server_side_token_refresh = flag.eq_ignore_ascii_case("true");
        }
    }

    /// Save configuration as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Get the user config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("auto-coder")
}

/// Candidate config files, in lookup order
pub fn search_paths() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

    vec![
        cwd.join(".auto-coder.yaml"),
        cwd.join(".auto-coder.yml"),
        config_dir().join("config.yaml"),
        home.join(".auto-coder.yaml"),
    ]
}

/// Load configuration from `path`, or the first existing search path,
/// then apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let file = match path {
        Some(p) if !p.exists() => {
            return Err(Error::Config(format!("Config not found at {:?}", p)));
        }
        Some(p) => Some(p.to_path_buf()),
        None => search_paths().into_iter().find(|p| p.exists()),
    };

    let mut config = match file {
        Some(file) => {
            tracing::debug!("Loading config from {:?}", file);
            from_file(&file)?
        }
        None => Config::default(),
    };

    config.apply_env();
    config.timeout()?;
    Ok(config)
}

/// Parse a YAML config file without applying environment overrides
pub fn from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}

/// Interactive setup wizard that writes a config file
pub fn init(path: Option<&Path>) -> Result<PathBuf> {
    use crate::ui;
    use inquire::{Confirm, Password, Select, Text};

    let prompt_err = |e: inquire::InquireError| Error::Config(format!("Prompt failed: {}", e));

    ui::print_header("Setup Wizard", "local");
    println!("  Let's point auto-coder at an OpenAI-compatible endpoint.\n");

    let mut config = Config::default();

    config.llm.base_url = Text::new("Base URL:")
        .with_default(&config.llm.base_url)
        .prompt()
        .map_err(prompt_err)?;

    config.llm.model = Text::new("Model:")
        .with_default(&config.llm.model)
        .prompt()
        .map_err(prompt_err)?;

    let modes = vec![
        "API key (static)",
        "SSO bearer token",
        "Basic credentials (server-side refresh)",
        "Client-side token refresh",
        "None (local endpoint)",
    ];
    let choice = Select::new("Authentication:", modes).prompt().map_err(prompt_err)?;

    match choice {
        c if c.starts_with("API key") => {
            let key = Password::new("API key:")
                .without_confirmation()
                .prompt()
                .map_err(prompt_err)?;
            config.llm.api_key = Some(key);
            config.auth.mode = Some(AuthMode::Static);
        }
        c if c.starts_with("SSO") => {
            config.auth.mode = Some(AuthMode::Sso);
            prompt_oauth_client(&mut config.auth)?;
        }
        c if c.starts_with("Basic") => {
            config.auth.mode = Some(AuthMode::Basic);
            prompt_oauth_client(&mut config.auth)?;
        }
        c if c.starts_with("Client-side") => {
            config.auth.mode = Some(AuthMode::ClientRefresh);
            prompt_oauth_client(&mut config.auth)?;
        }
        _ => config.auth.mode = Some(AuthMode::Static),
    }

    ui::print_step(&format!("Working directory is {:?}", config.working_dir));
    let keep_dir = Confirm::new("Use the current directory as the default working directory?")
        .with_default(true)
        .prompt()
        .map_err(prompt_err)?;
    if !keep_dir {
        let dir = Text::new("Working directory:").prompt().map_err(prompt_err)?;
        config.working_dir = PathBuf::from(dir);
    }

    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_dir().join("config.yaml"));

    ui::print_thinking("Saving configuration");
    config.save(&target)?;
    ui::print_success(&format!("Configuration written to {:?}", target));

    Ok(target)
}

fn prompt_oauth_client(auth: &mut AuthConfig) -> Result<()> {
    use inquire::{Password, Text};

    let prompt_err = |e: inquire::InquireError| Error::Config(format!("Prompt failed: {}", e));

    auth.token_url = Some(Text::new("Token URL:").prompt().map_err(prompt_err)?);
    auth.client_id = Some(Text::new("Client ID:").prompt().map_err(prompt_err)?);
    auth.client_secret = Some(
        Password::new("Client secret:")
            .without_confirmation()
            .prompt()
            .map_err(prompt_err)?,
    );
    Ok(())
}
