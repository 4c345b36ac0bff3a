use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mode::AiMode;
use crate::orchestrator::OrchestratorConfig;
use crate::safety::SafetyGate;
use crate::session::{Geometry, Theme};

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// OpenAI-compatible endpoint URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    /// Shell to spawn. Falls back to $SHELL, then /bin/bash.
    #[serde(default)]
    pub shell: Option<String>,
    /// AI mode at startup. Default: disabled.
    #[serde(default)]
    pub mode: AiMode,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_true")]
    pub syntax_highlighting: bool,
    /// In auto mode, ask the model for a follow-up after each command you run
    #[serde(default = "default_true")]
    pub auto_suggest: bool,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Seconds to wait for a y/n before treating the command as rejected
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    /// Output is considered complete after this much shell silence
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Hard cap on waiting for a command's output
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// How many recent commands (with output) are sent to the model
    #[serde(default = "default_history_context")]
    pub history_context: usize,
    /// Extra regexes whose matches are always blocked
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    /// Extra regexes whose matches need a y/n first
    #[serde(default)]
    pub confirm_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    25
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_settle_ms() -> u64 {
    150
}

fn default_max_wait_ms() -> u64 {
    2000
}

fn default_history_context() -> usize {
    5
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            api_key: None,
            shell: None,
            mode: AiMode::default(),
            theme: Theme::default(),
            syntax_highlighting: true,
            auto_suggest: true,
            cols: default_cols(),
            rows: default_rows(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            settle_ms: default_settle_ms(),
            max_wait_ms: default_max_wait_ms(),
            history_context: default_history_context(),
            blocked_patterns: Vec::new(),
            confirm_patterns: Vec::new(),
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    pub fn write_default_to(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write config file at {}", path.display()))
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }

    /// Profile names, sorted.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    pub shell: String,
    pub mode: AiMode,
    pub theme: Theme,
    pub syntax_highlighting: bool,
    pub auto_suggest: bool,
    pub cols: u16,
    pub rows: u16,
    pub confirm_timeout: Duration,
    pub settle: Duration,
    pub max_wait: Duration,
    pub history_context: usize,
    pub blocked_patterns: Vec<String>,
    pub confirm_patterns: Vec<String>,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
        api_key_override: Option<&str>,
        mode_override: Option<AiMode>,
        shell_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        let shell = shell_override
            .map(str::to_string)
            .or(base.shell)
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string());

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            model: model_override
                .map(str::to_string)
                .unwrap_or(base.model),
            api_key: api_key_override
                .map(str::to_string)
                .or(base.api_key),
            profile_name,
            shell,
            mode: mode_override.unwrap_or(base.mode),
            theme: base.theme,
            syntax_highlighting: base.syntax_highlighting,
            auto_suggest: base.auto_suggest,
            cols: base.cols,
            rows: base.rows,
            confirm_timeout: Duration::from_secs(base.confirm_timeout_secs),
            settle: Duration::from_millis(base.settle_ms),
            max_wait: Duration::from_millis(base.max_wait_ms),
            history_context: base.history_context,
            blocked_patterns: base.blocked_patterns,
            confirm_patterns: base.confirm_patterns,
        }
    }

    /// Built-in rules plus the profile's patterns. A bad regex is a config error.
    pub fn safety_gate(&self) -> Result<SafetyGate> {
        SafetyGate::new()
            .with_patterns(&self.blocked_patterns, &self.confirm_patterns)
            .with_context(|| format!("Invalid safety pattern in profile '{}'", self.profile_name))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            settle: self.settle,
            max_wait: self.max_wait,
            confirm_timeout: self.confirm_timeout,
            history_context: self.history_context,
            auto_suggest: self.auto_suggest,
        }
    }

    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.cols, self.rows)
            .with_context(|| format!("Invalid terminal size in profile '{}'", self.profile_name))
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellpilot")
        .join("config.toml")
}

/// Where the log file lives.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellpilot")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# shellpilot configuration
# Run `shellpilot --init` to regenerate this file.

default_profile = "local"

# ── Local Ollama (default) ────────────────────────────────────────────────────
[profiles.local]
endpoint = "http://localhost:11434"
model    = "qwen2.5-coder:7b"
# api_key is not needed for Ollama

# AI mode at startup: disabled | auto | dispatch | command | code
#   disabled  AI off, your input runs as typed
#   auto      model answers are shown as suggestions only
#   dispatch  model answers run after the safety gate
#   command   your input goes through the safety gate; model answers are suggestions
#   code      model answers are code snippets, never run
mode = "disabled"

# theme = "dark"                # dark | light | high_contrast
# syntax_highlighting = true
# auto_suggest = true           # auto mode: suggest a follow-up after each command
# shell = "/bin/zsh"            # default: $SHELL, then /bin/bash
# cols = 80
# rows = 25

# ── Dispatch tuning ───────────────────────────────────────────────────────────
# confirm_timeout_secs = 60     # unanswered confirmations count as rejected
# settle_ms = 150               # output is complete after this much silence
# max_wait_ms = 2000            # hard cap on waiting for a command's output
# history_context = 5           # recent commands sent to the model

# ── Extra safety rules (regex, matched against the whole command) ─────────────
# blocked_patterns = ['\bterraform\s+destroy\b']
# confirm_patterns = ['\bkubectl\s+delete\b', '\bdocker\s+system\s+prune\b']

# ── Another local model example ───────────────────────────────────────────────
# [profiles.small]
# endpoint = "http://localhost:11434"
# model    = "qwen2.5-coder:1.5b"
# mode     = "auto"

# ── llama.cpp server / LM Studio ──────────────────────────────────────────────
# [profiles.llamacpp]
# endpoint = "http://localhost:8080"
# model    = "local"
"#;

// ── Tests ─────────────────────────────────────────────────────────────────────
