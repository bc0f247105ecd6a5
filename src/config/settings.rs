use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Token budget watcher for a browser AI chat tab")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Browser DevTools WebSocket endpoint (printed by the browser when
    /// started with --remote-debugging-port)
    #[arg(short = 'b', long)]
    pub browser_ws: Option<String>,

    /// URL fragment identifying the tab to observe
    #[arg(short = 'p', long)]
    pub page: Option<String>,

    /// Path to a model-rules override file
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the current token budget of a running tokwatch instance
    Status,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if running in status mode
    pub fn is_status_mode(&self) -> bool {
        matches!(self.command, Some(Command::Status))
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Browser DevTools WebSocket endpoint
    #[serde(default = "default_browser_ws")]
    pub browser_ws: String,

    /// URL fragment identifying the tab to observe
    #[serde(default = "default_page_fragment")]
    pub page_fragment: String,

    /// URL fragment of the chat service's generate endpoint
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Bounded wait for one response-body fetch (milliseconds)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Model-rules override file (embedded table when unset)
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Persisted state file (platform data dir when unset)
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

fn default_browser_ws() -> String {
    "ws://127.0.0.1:9222/devtools/browser".to_string()
}

fn default_page_fragment() -> String {
    "gemini.google.com".to_string()
}

fn default_api_path() -> String {
    "batchexecute".to_string()
}

fn default_fetch_timeout() -> u64 {
    tokwatch_core::fetch::DEFAULT_FETCH_TIMEOUT.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser_ws: default_browser_ws(),
            page_fragment: default_page_fragment(),
            api_path: default_api_path(),
            fetch_timeout_ms: default_fetch_timeout(),
            rules_path: None,
            state_path: None,
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {:?}", p))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", p));
            }
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("tokwatch/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/tokwatch/config.toml")),
            dirs::home_dir().map(|p| p.join(".tokwatch.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(browser_ws) = &cli.browser_ws {
            self.browser_ws = browser_ws.clone();
        }
        if let Some(page) = &cli.page {
            self.page_fragment = page.clone();
        }
        if let Some(rules) = &cli.rules {
            self.rules_path = Some(rules.clone());
        }
    }

    /// Validate and normalize settings values
    ///
    /// Keeps the fetch timeout above a floor so in-flight bodies get a
    /// real chance to arrive.
    pub fn validate(&mut self) {
        const MIN_FETCH_TIMEOUT_MS: u64 = 100;

        if self.fetch_timeout_ms < MIN_FETCH_TIMEOUT_MS {
            self.fetch_timeout_ms = MIN_FETCH_TIMEOUT_MS;
        }
    }
}
