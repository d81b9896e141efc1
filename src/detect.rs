//! IaC tool detection from marker files.
//!
//! Detection is a total function: a project with no recognisable markers is
//! classified as [`IacTool::Unknown`], which callers treat as an abort reason
//! rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::tool::IacTool;

/// File names that mark a Terraform project.
const TERRAFORM_FILES: &[&str] = &[".terraform.lock.hcl", "terraform.tfstate"];
/// Extensions that mark a Terraform project.
const TERRAFORM_SUFFIXES: &[&str] = &[".tf", ".tf.json", ".tfstate"];

const PULUMI_FILES: &[&str] = &["Pulumi.yaml", "Pulumi.yml"];

/// Conventional playbook names, in the order they are preferred as a target.
const PLAYBOOK_FILES: &[&str] = &["site.yml", "site.yaml", "playbook.yml", "playbook.yaml"];

const PACKER_SUFFIXES: &[&str] = &[".pkr.hcl", ".pkr.json"];

/// Classifies the IaC tool of a project directory.
#[derive(Debug, Clone)]
pub struct ToolDetector {
    project_dir: PathBuf,
}

impl ToolDetector {
    /// Creates a detector for the given project directory.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Returns the directory being inspected.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Detects the governing tool.
    ///
    /// Checks Terraform, Pulumi, Ansible and Packer in that order and returns
    /// the first match. A Pulumi program written in a general purpose language
    /// may carry YAML or JSON that looks like another tool, so the order is
    /// significant.
    pub fn detect(&self) -> IacTool {
        let entries = self.entries();

        let tool = if is_terraform(&entries) {
            IacTool::Terraform
        } else if self.is_pulumi(&entries) {
            IacTool::Pulumi
        } else if self.is_ansible(&entries) {
            IacTool::Ansible
        } else if self.is_packer(&entries) {
            IacTool::Packer
        } else {
            IacTool::Unknown
        };

        tracing::debug!(dir = ?self.project_dir, tool = %tool, "detected IaC tool");
        tool
    }

    /// Picks the playbook the Ansible commands should run.
    ///
    /// A conventional name wins (`site` before `playbook`); otherwise the first
    /// playbook-shaped YAML file by name. `None` when the project has no
    /// top-level playbook, e.g. a roles-only checkout.
    pub fn ansible_playbook(&self) -> Option<String> {
        let mut yaml: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|(name, is_dir)| !is_dir && is_yaml(name))
            .map(|(name, _)| name)
            .collect();
        yaml.sort();

        if let Some(name) = PLAYBOOK_FILES
            .iter()
            .find(|candidate| yaml.iter().any(|name| name == *candidate))
        {
            return Some(name.to_string());
        }

        yaml.into_iter().find(|name| {
            self.read(name)
                .map(|content| looks_like_playbook(&content))
                .unwrap_or(false)
        })
    }

    /// Lists top-level entries as (file name, is_dir). Unreadable entries are skipped.
    fn entries(&self) -> Vec<(String, bool)> {
        let Ok(read_dir) = fs::read_dir(&self.project_dir) else {
            tracing::warn!(dir = ?self.project_dir, "cannot read project directory");
            return Vec::new();
        };

        read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (entry.file_name().to_string_lossy().to_string(), is_dir)
            })
            .collect()
    }

    fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.project_dir.join(name)).ok()
    }

    fn is_pulumi(&self, entries: &[(String, bool)]) -> bool {
        if has_file(entries, PULUMI_FILES) {
            return true;
        }

        // Source references from language SDK manifests
        if let Some(pkg) = self.read("package.json") {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&pkg) {
                let depends = ["dependencies", "devDependencies"].iter().any(|key| {
                    json.get(key)
                        .and_then(|d| d.as_object())
                        .map(|deps| deps.keys().any(|k| k.starts_with("@pulumi/")))
                        .unwrap_or(false)
                });
                if depends {
                    return true;
                }
            }
        }

        for manifest in ["requirements.txt", "pyproject.toml"] {
            if let Some(content) = self.read(manifest) {
                let references = content
                    .lines()
                    .any(|l| l.trim_start().starts_with("pulumi") || l.contains("\"pulumi"));
                if references {
                    return true;
                }
            }
        }

        self.read("go.mod")
            .map(|content| content.contains("github.com/pulumi/pulumi"))
            .unwrap_or(false)
    }

    fn is_ansible(&self, entries: &[(String, bool)]) -> bool {
        if has_file(entries, &["ansible.cfg"]) || has_file(entries, PLAYBOOK_FILES) {
            return true;
        }

        if entries.iter().any(|(name, is_dir)| *is_dir && name == "roles") {
            return true;
        }

        entries
            .iter()
            .filter(|(name, is_dir)| !is_dir && is_yaml(name))
            .filter_map(|(name, _)| self.read(name))
            .any(|content| looks_like_playbook(&content))
    }

    fn is_packer(&self, entries: &[(String, bool)]) -> bool {
        if has_suffix(entries, PACKER_SUFFIXES) {
            return true;
        }

        entries
            .iter()
            .filter(|(name, is_dir)| !is_dir && name.ends_with(".json"))
            .filter_map(|(name, _)| self.read(name))
            .any(|content| {
                serde_json::from_str::<serde_json::Value>(&content)
                    .map(|json| json.get("builders").is_some())
                    .unwrap_or(false)
            })
    }
}

fn is_terraform(entries: &[(String, bool)]) -> bool {
    has_file(entries, TERRAFORM_FILES)
        || has_suffix(entries, TERRAFORM_SUFFIXES)
        || entries.iter().any(|(name, is_dir)| *is_dir && name == ".terraform")
}

fn is_yaml(name: &str) -> bool {
    name.ends_with(".yml") || name.ends_with(".yaml")
}

fn has_file(entries: &[(String, bool)], names: &[&str]) -> bool {
    entries
        .iter()
        .any(|(name, is_dir)| !is_dir && names.contains(&name.as_str()))
}

fn has_suffix(entries: &[(String, bool)], suffixes: &[&str]) -> bool {
    entries
        .iter()
        .any(|(name, is_dir)| !is_dir && suffixes.iter().any(|s| name.ends_with(s)))
}

/// Returns true if a YAML document is an Ansible playbook: a sequence of plays
/// where at least one play targets `hosts`.
pub fn looks_like_playbook(content: &str) -> bool {
    let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(content) else {
        return false;
    };

    doc.as_sequence()
        .map(|plays| {
            plays.iter().any(|play| {
                play.as_mapping()
                    .map(|m| m.contains_key("hosts"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().expect("failed to create temp dir");
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn empty_directory_is_unknown() {
        let dir = project(&[]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Unknown);
    }

    #[test]
    fn missing_directory_is_unknown() {
        let detector = ToolDetector::new("/nonexistent/iac-autofix/project");
        assert_eq!(detector.detect(), IacTool::Unknown);
    }

    #[test]
    fn tf_file_is_terraform() {
        let dir = project(&[("main.tf", "resource \"null_resource\" \"x\" {}")]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Terraform);
    }

    #[test]
    fn terraform_wins_over_ansible() {
        let dir = project(&[
            ("main.tf", ""),
            ("ansible.cfg", "[defaults]\n"),
            ("site.yml", "- hosts: all\n"),
        ]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Terraform);
    }

    #[test]
    fn pulumi_manifest_is_pulumi() {
        let dir = project(&[("Pulumi.yaml", "name: infra\nruntime: nodejs\n")]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Pulumi);
    }

    #[test]
    fn pulumi_package_reference_is_pulumi() {
        let dir = project(&[(
            "package.json",
            r#"{"dependencies": {"@pulumi/aws": "^6.0.0"}}"#,
        )]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Pulumi);
    }

    #[test]
    fn pulumi_wins_over_packer_json() {
        let dir = project(&[
            ("Pulumi.yaml", "name: infra\n"),
            ("image.json", r#"{"builders": []}"#),
        ]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Pulumi);
    }

    #[test]
    fn go_module_reference_is_pulumi() {
        let dir = project(&[(
            "go.mod",
            "module infra\n\nrequire github.com/pulumi/pulumi/sdk/v3 v3.100.0\n",
        )]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Pulumi);
    }

    #[test]
    fn arbitrary_playbook_yaml_is_ansible() {
        let dir = project(&[(
            "deploy.yaml",
            "- name: web\n  hosts: webservers\n  tasks: []\n",
        )]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Ansible);
    }

    #[test]
    fn roles_directory_is_ansible() {
        let dir = project(&[("roles/web/tasks/main.yml", "- debug: msg=hi\n")]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Ansible);
    }

    #[test]
    fn site_playbook_is_preferred_target() {
        let dir = project(&[
            ("playbook.yml", "- hosts: all\n"),
            ("site.yaml", "- hosts: all\n"),
        ]);
        let detector = ToolDetector::new(dir.path());
        assert_eq!(detector.ansible_playbook().as_deref(), Some("site.yaml"));
    }

    #[test]
    fn playbook_shaped_yaml_is_targeted_when_unconventionally_named() {
        let dir = project(&[
            ("vars.yml", "region: eu-west-1\n"),
            ("web.yml", "- hosts: webservers\n  tasks: []\n"),
        ]);
        let detector = ToolDetector::new(dir.path());
        assert_eq!(detector.detect(), IacTool::Ansible);
        assert_eq!(detector.ansible_playbook().as_deref(), Some("web.yml"));
    }

    #[test]
    fn roles_only_project_has_no_playbook() {
        let dir = project(&[("roles/web/tasks/main.yml", "- debug: msg=hi\n")]);
        assert_eq!(ToolDetector::new(dir.path()).ansible_playbook(), None);
    }

    #[test]
    fn plain_yaml_is_not_ansible() {
        let dir = project(&[("config.yaml", "key: value\n")]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Unknown);
    }

    #[test]
    fn packer_hcl_is_packer() {
        let dir = project(&[("ubuntu.pkr.hcl", "source \"amazon-ebs\" \"ubuntu\" {}")]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Packer);
    }

    #[test]
    fn legacy_packer_json_is_packer() {
        let dir = project(&[("template.json", r#"{"builders": [{"type": "docker"}]}"#)]);
        assert_eq!(ToolDetector::new(dir.path()).detect(), IacTool::Packer);
    }

    #[test]
    fn playbook_detection_rejects_mappings() {
        assert!(!looks_like_playbook("hosts: all\n"));
        assert!(looks_like_playbook("- hosts: all\n  roles: [web]\n"));
        assert!(!looks_like_playbook(": not yaml : ["));
    }
}
