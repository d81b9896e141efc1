//! Remediation configuration.
//!
//! Settings come from three layers: built-in defaults, an optional TOML file,
//! and environment variables / CLI flags. Each layer is a [`RawConfig`]; the
//! layers are merged and resolved once into an immutable [`RemediationConfig`]
//! that is passed explicitly to the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::ai::DEFAULT_API_BASE;
use crate::error::{Error, Result};
use crate::fix::{default_models, DEFAULT_SYSTEM_PROMPT};
use crate::session::{Mode, SessionPolicy};
use crate::tool::{CommandTable, IacTool};
use crate::vcs::CommentTarget;

/// Default number of retries after the first fix attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
/// Default base branch for pull requests.
pub const DEFAULT_BASE_BRANCH: &str = "main";
/// Default prefix of session branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "iac-autofix";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// How the session's tool is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolOverride {
    /// Detect from marker files.
    #[default]
    Auto,
    /// Use this tool regardless of the project contents.
    Tool(IacTool),
}

impl FromStr for ToolOverride {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(ToolOverride::Auto);
        }
        Ok(ToolOverride::Tool(trimmed.parse()?))
    }
}

impl fmt::Display for ToolOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOverride::Auto => f.write_str("auto"),
            ToolOverride::Tool(tool) => write!(f, "{}", tool),
        }
    }
}

/// One configuration layer. Every field is optional; unset fields fall
/// through to the layer below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RawConfig {
    pub project_dir: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub rollback_enabled: Option<bool>,
    pub auto_merge_enabled: Option<bool>,
    pub tool_override: Option<String>,
    pub max_attempts: Option<u32>,
    pub base_branch: Option<String>,
    pub branch_prefix: Option<String>,
    pub models: Option<Vec<String>>,
    pub ai_api_base: Option<String>,
    pub system_prompt: Option<String>,
    pub run_init: Option<bool>,
    pub fix_timeout_secs: Option<u64>,
    pub notify_target: Option<String>,
    pub initial_diagnostic: Option<String>,
    pub run_id: Option<String>,
    /// `[commands.<tool>]` tables of `action = "command"` overrides.
    pub commands: HashMap<String, HashMap<String, String>>,
}

impl RawConfig {
    /// Parses a TOML configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    /// Reads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Layers `over` on top of `self`. Set fields in `over` win; command
    /// overrides are merged per tool and action.
    pub fn merge(mut self, over: RawConfig) -> RawConfig {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if over.$field.is_some() { self.$field = over.$field; } )*
            };
        }
        take!(
            project_dir,
            mode,
            rollback_enabled,
            auto_merge_enabled,
            tool_override,
            max_attempts,
            base_branch,
            branch_prefix,
            models,
            ai_api_base,
            system_prompt,
            run_init,
            fix_timeout_secs,
            notify_target,
            initial_diagnostic,
            run_id
        );

        for (tool, actions) in over.commands {
            self.commands.entry(tool).or_default().extend(actions);
        }
        self
    }

    /// Resolves this layer against the built-in defaults.
    ///
    /// A missing run identifier is replaced by a fresh UUID.
    pub fn resolve(self) -> Result<RemediationConfig> {
        let tool_override = match self.tool_override.as_deref() {
            Some(value) => value.parse()?,
            None => ToolOverride::Auto,
        };
        let notify_target = match self.notify_target.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Some(value.parse()?),
            _ => None,
        };
        let run_id = self
            .run_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RemediationConfig {
            project_dir: self.project_dir.unwrap_or_else(|| PathBuf::from(".")),
            mode: self.mode.unwrap_or_default(),
            rollback_enabled: self.rollback_enabled.unwrap_or(true),
            auto_merge_enabled: self.auto_merge_enabled.unwrap_or(false),
            tool_override,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_branch: self
                .base_branch
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            branch_prefix: self
                .branch_prefix
                .unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_string()),
            models: self.models.unwrap_or_else(default_models),
            ai_api_base: self
                .ai_api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            run_init: self.run_init.unwrap_or(true),
            fix_timeout: self.fix_timeout_secs.map(Duration::from_secs),
            notify_target,
            initial_diagnostic: self.initial_diagnostic.filter(|d| !d.trim().is_empty()),
            run_id,
            commands: CommandTable::from_sections(&self.commands)?,
        })
    }
}

/// Fully resolved, immutable configuration of one remediation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationConfig {
    pub project_dir: PathBuf,
    pub mode: Mode,
    pub rollback_enabled: bool,
    pub auto_merge_enabled: bool,
    pub tool_override: ToolOverride,
    /// Retries allowed after the first fix attempt.
    pub max_attempts: u32,
    pub base_branch: String,
    pub branch_prefix: String,
    /// AI models in priority order.
    pub models: Vec<String>,
    pub ai_api_base: String,
    pub system_prompt: String,
    /// Run the tool's init command before validating.
    pub run_init: bool,
    /// Overall deadline for one fix request.
    pub fix_timeout: Option<Duration>,
    /// Where terminal reports are posted.
    pub notify_target: Option<CommentTarget>,
    /// Diagnostic from the failing pipeline step, used when validation
    /// itself produces none.
    pub initial_diagnostic: Option<String>,
    pub run_id: String,
    pub commands: CommandTable,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            mode: Mode::default(),
            rollback_enabled: true,
            auto_merge_enabled: false,
            tool_override: ToolOverride::Auto,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_branch: DEFAULT_BASE_BRANCH.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            models: default_models(),
            ai_api_base: DEFAULT_API_BASE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            run_init: true,
            fix_timeout: None,
            notify_target: None,
            initial_diagnostic: None,
            run_id: "local".to_string(),
            commands: CommandTable::new(),
        }
    }
}

impl RemediationConfig {
    /// Session policy derived from this configuration.
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            mode: self.mode,
            max_attempts: self.max_attempts,
            rollback_enabled: self.rollback_enabled,
            auto_merge_enabled: self.auto_merge_enabled,
        }
    }
}

impl Validate for RemediationConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.models.iter().all(|m| m.trim().is_empty()) {
            result.add_error("models cannot be empty");
        }

        if self.branch_prefix.trim().is_empty() {
            result.add_error("branch-prefix cannot be empty");
        }

        if self.base_branch.trim().is_empty() {
            result.add_error("base-branch cannot be empty");
        }

        if !self.ai_api_base.starts_with("http://") && !self.ai_api_base.starts_with("https://") {
            result.add_error(format!(
                "ai-api-base '{}' must be an http(s) URL",
                self.ai_api_base
            ));
        }

        if !self.project_dir.is_dir() {
            result.add_error(format!(
                "project directory {} does not exist",
                self.project_dir.display()
            ));
        }

        if self.max_attempts > 5 {
            result.add_warning(format!(
                "max-attempts of {} may spend a lot of AI requests on one failure",
                self.max_attempts
            ));
        }

        if self.mode == Mode::DryRun && self.auto_merge_enabled {
            result.add_warning("auto-merge-enabled has no effect in dry-run mode");
        }

        if let Some(timeout) = self.fix_timeout {
            if timeout < Duration::from_secs(10) {
                result.add_warning(
                    "fix-timeout-secs under 10 seconds leaves no room for backoff retries",
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Action;

    fn valid_config() -> RemediationConfig {
        RemediationConfig {
            project_dir: std::env::temp_dir(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_layer_resolves_to_defaults() {
        let config = RawConfig::default().resolve().unwrap();

        assert_eq!(config.mode, Mode::DryRun);
        assert!(config.rollback_enabled);
        assert!(!config.auto_merge_enabled);
        assert_eq!(config.tool_override, ToolOverride::Auto);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.models, vec!["gpt-4", "gpt-3.5-turbo"]);
        assert_eq!(config.branch_prefix, "iac-autofix");
        assert!(uuid::Uuid::parse_str(&config.run_id).is_ok());
    }

    #[test]
    fn toml_file_is_parsed() {
        let raw = RawConfig::from_toml_str(
            r#"
            mode = "apply"
            max-attempts = 1
            tool-override = "terraform"
            notify-target = "pr:12"
            models = ["gpt-4o"]

            [commands.terraform]
            validate = "terraform validate -json"
            init = ""
            "#,
        )
        .unwrap();
        let config = raw.resolve().unwrap();

        assert_eq!(config.mode, Mode::Apply);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.tool_override, ToolOverride::Tool(IacTool::Terraform));
        assert_eq!(config.notify_target, Some(CommentTarget::PullRequest(12)));
        assert_eq!(config.models, vec!["gpt-4o"]);
        assert_eq!(
            config.commands.command(IacTool::Terraform, Action::Validate),
            Some("terraform validate -json")
        );
        assert_eq!(config.commands.command(IacTool::Terraform, Action::Init), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RawConfig::from_toml_str("mdoe = \"apply\"").unwrap_err();
        assert!(err.is_fatal_precondition());
    }

    #[test]
    fn later_layer_wins() {
        let file = RawConfig::from_toml_str(
            r#"
            mode = "apply"
            max-attempts = 4
            [commands.ansible]
            validate = "ansible-lint"
            deploy = "ansible-playbook main.yml"
            "#,
        )
        .unwrap();
        let mut env = RawConfig {
            max_attempts: Some(1),
            ..Default::default()
        };
        env.commands.insert(
            "ansible".to_string(),
            HashMap::from([("deploy".to_string(), "ansible-playbook prod.yml".to_string())]),
        );

        let config = file.merge(env).resolve().unwrap();

        assert_eq!(config.mode, Mode::Apply);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(
            config.commands.command(IacTool::Ansible, Action::Validate),
            Some("ansible-lint")
        );
        assert_eq!(
            config.commands.command(IacTool::Ansible, Action::Deploy),
            Some("ansible-playbook prod.yml")
        );
    }

    #[test]
    fn explicit_run_id_is_kept() {
        let raw = RawConfig {
            run_id: Some("8812".to_string()),
            ..Default::default()
        };
        assert_eq!(raw.resolve().unwrap().run_id, "8812");
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for raw in [
            RawConfig {
                tool_override: Some("chef".to_string()),
                ..Default::default()
            },
            RawConfig {
                notify_target: Some("channel:4".to_string()),
                ..Default::default()
            },
        ] {
            assert!(matches!(raw.resolve(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn tool_override_parses_auto_and_tools() {
        assert_eq!("auto".parse::<ToolOverride>().unwrap(), ToolOverride::Auto);
        assert_eq!("".parse::<ToolOverride>().unwrap(), ToolOverride::Auto);
        assert_eq!(
            "Pulumi".parse::<ToolOverride>().unwrap(),
            ToolOverride::Tool(IacTool::Pulumi)
        );
    }

    #[test]
    fn default_config_is_valid() {
        let result = valid_config().validate();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_models_fail() {
        let config = RemediationConfig {
            models: vec![],
            ..valid_config()
        };
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("models"));
    }

    #[test]
    fn missing_project_dir_fails() {
        let config = RemediationConfig {
            project_dir: PathBuf::from("/definitely/not/here"),
            ..valid_config()
        };
        assert!(config.validate().into_result().is_err());
    }

    #[test]
    fn non_http_api_base_fails() {
        let config = RemediationConfig {
            ai_api_base: "api.openai.com".to_string(),
            ..valid_config()
        };
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn auto_merge_in_dry_run_warns() {
        let config = RemediationConfig {
            auto_merge_enabled: true,
            ..valid_config()
        };
        let warnings = config.validate().into_result().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("dry-run"));
    }

    #[test]
    fn high_attempt_count_warns() {
        let config = RemediationConfig {
            max_attempts: 10,
            ..valid_config()
        };
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("max-attempts"));
    }

    #[test]
    fn policy_mirrors_config() {
        let config = RemediationConfig {
            mode: Mode::Apply,
            max_attempts: 1,
            rollback_enabled: false,
            ..valid_config()
        };
        let policy = config.policy();
        assert_eq!(policy.mode, Mode::Apply);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.rollback_enabled);
    }
}
