//! IaC tool identifiers and the shared command table.
//!
//! Every shell command the remediation loop runs against a project comes from
//! a single `{tool, action}` mapping. Validator, Deployer and the `exec` CLI
//! subcommand all read from it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Infrastructure-as-code tool governing a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IacTool {
    Terraform,
    Pulumi,
    Ansible,
    Packer,
    #[default]
    Unknown,
}

impl IacTool {
    /// Tools in detection priority order.
    pub const KNOWN: [IacTool; 4] = [
        IacTool::Terraform,
        IacTool::Pulumi,
        IacTool::Ansible,
        IacTool::Packer,
    ];

    /// Returns the lowercase identifier of this tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            IacTool::Terraform => "terraform",
            IacTool::Pulumi => "pulumi",
            IacTool::Ansible => "ansible",
            IacTool::Packer => "packer",
            IacTool::Unknown => "unknown",
        }
    }

    /// Returns true if this is a recognised tool.
    pub fn is_known(&self) -> bool {
        *self != IacTool::Unknown
    }
}

impl fmt::Display for IacTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IacTool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "terraform" | "tf" => Ok(IacTool::Terraform),
            "pulumi" => Ok(IacTool::Pulumi),
            "ansible" => Ok(IacTool::Ansible),
            "packer" => Ok(IacTool::Packer),
            other => Err(Error::Config(format!("unknown IaC tool '{}'", other))),
        }
    }
}

/// Action that can be run against a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Init,
    Format,
    Validate,
    Deploy,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Install,
        Action::Init,
        Action::Format,
        Action::Validate,
        Action::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Init => "init",
            Action::Format => "format",
            Action::Validate => "validate",
            Action::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| Error::Config(format!("unknown action '{}'", s)))
    }
}

/// Built-in command for a tool/action pair.
pub fn default_command(tool: IacTool, action: Action) -> Option<&'static str> {
    use Action::{Deploy, Format, Init, Install, Validate};

    match (tool, action) {
        (IacTool::Terraform, Init) => Some("terraform init -backend=false -input=false -no-color"),
        (IacTool::Terraform, Format) => Some("terraform fmt -recursive"),
        (IacTool::Terraform, Validate) => Some("terraform validate -no-color"),
        (IacTool::Terraform, Deploy) => {
            Some("terraform apply -auto-approve -input=false -no-color")
        }

        (IacTool::Pulumi, Install) => Some("pulumi install"),
        (IacTool::Pulumi, Validate) => Some("pulumi preview --non-interactive --diff"),
        (IacTool::Pulumi, Deploy) => Some("pulumi up --yes --non-interactive"),

        (IacTool::Ansible, Install) => Some("ansible-galaxy install -r requirements.yml"),
        (IacTool::Ansible, Validate) => Some("ansible-playbook site.yml --syntax-check"),
        (IacTool::Ansible, Deploy) => Some("ansible-playbook site.yml"),

        (IacTool::Packer, Init) => Some("packer init ."),
        (IacTool::Packer, Format) => Some("packer fmt ."),
        (IacTool::Packer, Validate) => Some("packer validate ."),
        (IacTool::Packer, Deploy) => Some("packer build ."),

        _ => None,
    }
}

/// Ansible command for `action` run against a specific playbook.
fn ansible_playbook_command(action: Action, playbook: &str) -> Option<String> {
    let playbook = if playbook
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._-/".contains(c))
    {
        playbook.to_string()
    } else {
        format!("'{}'", playbook.replace('\'', "'\\''"))
    };

    match action {
        Action::Validate => Some(format!("ansible-playbook {} --syntax-check", playbook)),
        Action::Deploy => Some(format!("ansible-playbook {}", playbook)),
        _ => None,
    }
}

/// Resolved `{tool, action} -> command` mapping.
///
/// Overrides take precedence over the built-in defaults. An override with an
/// empty command disables the action for that tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    overrides: HashMap<(IacTool, Action), String>,
}

impl CommandTable {
    /// Creates a table containing only the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an override for a tool/action pair.
    pub fn with_override(
        mut self,
        tool: IacTool,
        action: Action,
        command: impl Into<String>,
    ) -> Self {
        self.set(tool, action, command);
        self
    }

    /// Sets an override in place.
    pub fn set(&mut self, tool: IacTool, action: Action, command: impl Into<String>) {
        self.overrides.insert((tool, action), command.into());
    }

    /// Targets the Ansible validate and deploy commands at `playbook`.
    ///
    /// Explicit overrides for those actions are left untouched.
    pub fn use_ansible_playbook(&mut self, playbook: &str) {
        for action in [Action::Validate, Action::Deploy] {
            if let Some(command) = ansible_playbook_command(action, playbook) {
                self.overrides
                    .entry((IacTool::Ansible, action))
                    .or_insert(command);
            }
        }
    }

    /// Builds a table from the `[commands.<tool>]` section of a config file.
    pub fn from_sections(sections: &HashMap<String, HashMap<String, String>>) -> Result<Self> {
        let mut table = Self::new();
        for (tool_name, actions) in sections {
            let tool: IacTool = tool_name.parse()?;
            for (action_name, command) in actions {
                let action: Action = action_name.parse()?;
                table.set(tool, action, command.clone());
            }
        }
        Ok(table)
    }

    /// Looks up the command for a tool/action pair.
    ///
    /// Returns `None` when the action is a no-op for the tool.
    pub fn command(&self, tool: IacTool, action: Action) -> Option<&str> {
        match self.overrides.get(&(tool, action)) {
            Some(cmd) if cmd.trim().is_empty() => None,
            Some(cmd) => Some(cmd.as_str()),
            None => default_command(tool, action),
        }
    }

    /// Returns all configured commands for a tool, in action order.
    pub fn commands_for(&self, tool: IacTool) -> Vec<(Action, &str)> {
        Action::ALL
            .into_iter()
            .filter_map(|action| self.command(tool, action).map(|cmd| (action, cmd)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_tool_has_validate_and_deploy() {
        for tool in IacTool::KNOWN {
            assert!(default_command(tool, Action::Validate).is_some(), "{tool}");
            assert!(default_command(tool, Action::Deploy).is_some(), "{tool}");
        }
    }

    #[test]
    fn unknown_tool_has_no_commands() {
        let table = CommandTable::new();
        assert!(table.commands_for(IacTool::Unknown).is_empty());
    }

    #[test]
    fn override_replaces_default() {
        let table = CommandTable::new().with_override(
            IacTool::Ansible,
            Action::Validate,
            "ansible-lint playbooks/",
        );
        assert_eq!(
            table.command(IacTool::Ansible, Action::Validate),
            Some("ansible-lint playbooks/")
        );
        assert_eq!(
            table.command(IacTool::Ansible, Action::Deploy),
            default_command(IacTool::Ansible, Action::Deploy)
        );
    }

    #[test]
    fn ansible_commands_follow_the_detected_playbook() {
        let mut table = CommandTable::new();
        table.use_ansible_playbook("playbook.yml");

        assert_eq!(
            table.command(IacTool::Ansible, Action::Validate),
            Some("ansible-playbook playbook.yml --syntax-check")
        );
        assert_eq!(
            table.command(IacTool::Ansible, Action::Deploy),
            Some("ansible-playbook playbook.yml")
        );
        assert_eq!(
            table.command(IacTool::Ansible, Action::Install),
            default_command(IacTool::Ansible, Action::Install)
        );
    }

    #[test]
    fn detected_playbook_does_not_replace_overrides() {
        let mut table = CommandTable::new().with_override(
            IacTool::Ansible,
            Action::Validate,
            "ansible-lint",
        );
        table.use_ansible_playbook("deploy web.yml");

        assert_eq!(table.command(IacTool::Ansible, Action::Validate), Some("ansible-lint"));
        assert_eq!(
            table.command(IacTool::Ansible, Action::Deploy),
            Some("ansible-playbook 'deploy web.yml'")
        );
    }

    #[test]
    fn empty_override_disables_action() {
        let table = CommandTable::new().with_override(IacTool::Terraform, Action::Init, "");
        assert_eq!(table.command(IacTool::Terraform, Action::Init), None);
    }

    #[test]
    fn sections_parse_tool_and_action_names() {
        let mut sections = HashMap::new();
        sections.insert(
            "packer".to_string(),
            HashMap::from([("validate".to_string(), "packer validate -syntax-only .".to_string())]),
        );
        let table = CommandTable::from_sections(&sections).unwrap();
        assert_eq!(
            table.command(IacTool::Packer, Action::Validate),
            Some("packer validate -syntax-only .")
        );
    }

    #[test]
    fn sections_reject_unknown_action() {
        let mut sections = HashMap::new();
        sections.insert(
            "terraform".to_string(),
            HashMap::from([("destroy".to_string(), "terraform destroy".to_string())]),
        );
        assert!(CommandTable::from_sections(&sections).is_err());
    }

    #[test]
    fn tool_parses_case_insensitively() {
        assert_eq!("Terraform".parse::<IacTool>().unwrap(), IacTool::Terraform);
        assert_eq!(" PACKER ".parse::<IacTool>().unwrap(), IacTool::Packer);
        assert!("auto".parse::<IacTool>().is_err());
    }

    #[test]
    fn tool_serializes_to_lowercase() {
        let json = serde_json::to_string(&IacTool::Pulumi).unwrap();
        assert_eq!(json, "\"pulumi\"");
    }
}
