//! Pipeline configuration.
//!
//! Built once at process start and passed by reference.  Nothing in this
//! crate reads the environment directly: the binary hands its variable
//! lookup to [`PipelineConfig::apply_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use proofflow_adapters::CommandLine;

use crate::error::{IntentError, Result};

/// How commands reach the step graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerMode {
    /// Non-complex commands try the rule-based shortcut first.
    #[default]
    Gated,
    /// Every command goes to the completion provider.
    AlwaysLlm,
}

/// What happens when a compiled graph violates causal ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Refuse to execute.
    #[default]
    Block,
    /// Log the violations and execute anyway.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: String,
    pub compile_timeout_secs: u64,
    pub compiler_mode: CompilerMode,
    pub validation_policy: ValidationPolicy,

    /// Executor invocation; `--parsed-file <artifact>` is appended.
    pub executor: CommandLine,
    pub executor_working_dir: Option<PathBuf>,
    pub execute_timeout_secs: u64,
    /// Scratch directory for per-workflow artifacts.
    pub artifact_dir: PathBuf,
    /// Characters of executor stdout kept in the result.
    pub log_tail_chars: usize,

    /// Status lookup invocation; the transfer id and ledger tag are appended.
    pub status_command: CommandLine,
    pub status_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".into(),
            compile_timeout_secs: 35,
            compiler_mode: CompilerMode::default(),
            validation_policy: ValidationPolicy::default(),
            executor: CommandLine::from_program("node", ["../parsers/workflow/workflowCLI.js"]),
            executor_working_dir: None,
            execute_timeout_secs: 300,
            artifact_dir: std::env::temp_dir().join("proofflow"),
            log_tail_chars: 1000,
            status_command: CommandLine::from_program("node", ["check-transfer-status.js"]),
            status_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| IntentError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| IntentError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Apply `PROOFFLOW_*` overrides through `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(model) = var("PROOFFLOW_MODEL") {
            self.model = model;
        }
        if let Some(cmd) = var("PROOFFLOW_EXECUTOR") {
            self.executor = CommandLine::parse(&cmd)?;
        }
        if let Some(cmd) = var("PROOFFLOW_STATUS_COMMAND") {
            self.status_command = CommandLine::parse(&cmd)?;
        }
        if let Some(dir) = var("PROOFFLOW_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("PROOFFLOW_EXECUTOR_DIR") {
            self.executor_working_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = var("PROOFFLOW_COMPILER_MODE") {
            self.compiler_mode = match mode.trim() {
                "gated" => CompilerMode::Gated,
                "always_llm" => CompilerMode::AlwaysLlm,
                other => {
                    return Err(IntentError::Config {
                        reason: format!("unknown compiler mode `{other}`"),
                    });
                }
            };
        }
        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_budgets() {
        let config = PipelineConfig::default();
        assert_eq!(config.compile_timeout(), Duration::from_secs(35));
        assert_eq!(config.execute_timeout(), Duration::from_secs(300));
        assert_eq!(config.status_timeout(), Duration::from_secs(10));
        assert_eq!(config.log_tail_chars, 1000);
        assert_eq!(config.compiler_mode, CompilerMode::Gated);
        assert_eq!(config.validation_policy, ValidationPolicy::Block);
        assert_eq!(config.executor.program(), "node");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            compiler_mode = "always_llm"
            validation_policy = "advisory"
            executor = ["sh", "run.sh"]
            execute_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.compiler_mode, CompilerMode::AlwaysLlm);
        assert_eq!(config.validation_policy, ValidationPolicy::Advisory);
        assert_eq!(config.executor.to_string(), "sh run.sh");
        assert_eq!(config.execute_timeout_secs, 60);
        assert_eq!(config.compile_timeout_secs, 35);
    }

    #[test]
    fn empty_executor_is_rejected() {
        assert!(PipelineConfig::from_toml_str("executor = []").is_err());
        assert!(PipelineConfig::from_toml_str("compiler_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proofflow.toml");
        std::fs::write(&path, "model = \"gpt-4o-mini\"\nlog_tail_chars = 50\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.log_tail_chars, 50);
    }

    #[test]
    fn overrides_from_lookup() {
        let vars = HashMap::from([
            ("PROOFFLOW_MODEL", "gpt-4o"),
            ("PROOFFLOW_EXECUTOR", "node  workflowCLI.js"),
            ("PROOFFLOW_ARTIFACT_DIR", "/tmp/wf"),
            ("PROOFFLOW_STATUS_COMMAND", "   "),
            ("PROOFFLOW_COMPILER_MODE", "always_llm"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.executor.args(), ["workflowCLI.js"]);
        assert_eq!(config.artifact_dir, PathBuf::from("/tmp/wf"));
        assert_eq!(config.status_command, PipelineConfig::default().status_command);
        assert_eq!(config.compiler_mode, CompilerMode::AlwaysLlm);
    }

    #[test]
    fn bad_compiler_mode_override_is_config_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "PROOFFLOW_COMPILER_MODE").then(|| "fast".to_owned()))
            .unwrap_err();
        assert!(matches!(err, IntentError::Config { .. }));
    }
}
