//! Configuration file support for quire.
//!
//! All quire data is stored in a `.quire/` directory:
//! - `.quire/config.toml` - Configuration file
//! - `.quire/logs/` - Log files when file logging is enabled
//!
//! Config discovery searches for `.quire/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use quire_prompt::{
    HandlerDeps, InMemoryWikiService, InMemoryWorkspaceService, PromptEngine,
    StaticFunctionExecutor, StaticMcpClient, ToolRegistry, Workspace,
};
use serde::{Deserialize, Serialize};

/// The quire data directory name.
pub const QUIRE_DIR: &str = ".quire";
/// The config file name within the quire directory.
pub const CONFIG_FILE: &str = "config.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    /// Workspaces visible to the wiki tool list.
    pub workspaces: Vec<WorkspaceConfig>,
    /// Tiddlers served by the in-memory wiki.
    pub tiddlers: Vec<TiddlerConfig>,
    /// Static outputs keyed by function id.
    pub functions: HashMap<String, String>,
    /// Static outputs keyed by protocol server id.
    pub mcp: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `--verbose` nor `RUST_LOG` is set.
    pub level: String,
    /// Directory for daily log files, relative to `.quire/` unless absolute.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    pub id: String,
    pub name: String,
    /// Set for wiki workspaces.
    #[serde(default)]
    pub wiki_folder_location: Option<String>,
}

impl From<&WorkspaceConfig> for Workspace {
    fn from(config: &WorkspaceConfig) -> Self {
        Workspace {
            id: config.id.clone(),
            name: config.name.clone(),
            wiki_folder_location: config.wiki_folder_location.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TiddlerConfig {
    /// Id of the owning workspace.
    pub workspace: String,
    pub title: String,
    #[serde(default)]
    pub text: String,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config and the `.quire` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let quire_dir = dir.join(QUIRE_DIR);
            let config_path = quire_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, quire_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve the log directory relative to the .quire directory.
    pub fn resolve_log_dir(&self, quire_dir: Option<&Path>) -> Option<PathBuf> {
        let directory = self.logging.directory.as_ref()?;
        if directory.is_absolute() {
            Some(directory.clone())
        } else {
            Some(
                quire_dir
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(QUIRE_DIR))
                    .join(directory),
            )
        }
    }

    /// Build a prompt engine over the configured workspaces, tiddlers and
    /// static function and protocol-server outputs.
    pub fn build_engine(&self) -> PromptEngine {
        let workspaces = Arc::new(InMemoryWorkspaceService::new(
            self.workspaces.iter().map(Workspace::from).collect(),
        ));
        let wiki = Arc::new(self.tiddlers.iter().fold(InMemoryWikiService::new(), |wiki, t| {
            wiki.with_tiddler(&t.workspace, &t.title, &t.text)
        }));

        let tools = Arc::new(ToolRegistry::with_builtin_tools(
            workspaces.clone(),
            wiki.clone(),
        ));
        let deps = HandlerDeps::new(workspaces, wiki)
            .with_agent_definitions(tools.clone())
            .with_functions(Arc::new(StaticFunctionExecutor::new(self.functions.clone())))
            .with_mcp(Arc::new(StaticMcpClient::new(self.mcp.clone())));

        tracing::debug!(
            workspaces = self.workspaces.len(),
            tiddlers = self.tiddlers.len(),
            functions = self.functions.len(),
            mcp_servers = self.mcp.len(),
            "Prompt engine configured"
        );
        PromptEngine::new(&deps, tools)
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ConfigValidationError {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid level '{}'. Expected one of: {}.",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        let mut ids = HashSet::new();
        for (i, workspace) in self.workspaces.iter().enumerate() {
            if workspace.id.is_empty() {
                errors.push(ConfigValidationError {
                    field: format!("workspaces[{}].id", i),
                    message: "Workspace id cannot be empty.".to_string(),
                });
            } else if !ids.insert(workspace.id.as_str()) {
                errors.push(ConfigValidationError {
                    field: format!("workspaces[{}].id", i),
                    message: format!("Duplicate workspace id '{}'.", workspace.id),
                });
            }
        }

        for (i, tiddler) in self.tiddlers.iter().enumerate() {
            if !ids.contains(tiddler.workspace.as_str()) {
                errors.push(ConfigValidationError {
                    field: format!("tiddlers[{}].workspace", i),
                    message: format!("Unknown workspace '{}'.", tiddler.workspace),
                });
            }
        }

        errors
    }
}
