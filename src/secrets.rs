//! Credential loading and redaction.
//!
//! Credentials are resolved once before the remediation loop starts. Every
//! report leaving the process passes through [`SecretsManager::redact`] so
//! tokens echoed by IaC tools never end up in a comment.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the AI service credential.
pub const AI_API_KEY: &str = "OPENAI_API_KEY";
/// Name of the hosting service credential.
pub const VCS_TOKEN: &str = "GITHUB_TOKEN";

/// Source from which to retrieve a secret value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretSource {
    /// Read from an environment variable.
    EnvVar(String),
    /// Read from a file.
    File(String),
    /// Provided directly (for testing only).
    Direct(String),
}

impl SecretSource {
    fn resolve(&self) -> Option<String> {
        let value = match self {
            SecretSource::EnvVar(var) => env::var(var).ok()?,
            SecretSource::File(path) => std::fs::read_to_string(path).ok()?.trim().to_string(),
            SecretSource::Direct(value) => value.clone(),
        };
        (!value.trim().is_empty()).then_some(value)
    }

    fn describe(&self) -> String {
        match self {
            SecretSource::EnvVar(var) => format!("${}", var),
            SecretSource::File(path) => format!("file {}", path),
            SecretSource::Direct(_) => "direct value".to_string(),
        }
    }
}

/// Holds resolved credentials and redacts them from outgoing text.
#[derive(Debug, Default, Clone)]
pub struct SecretsManager {
    /// Resolved secrets (name -> value).
    secrets: HashMap<String, String>,
}

impl SecretsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a credential from the first source that yields a non-empty value.
    pub fn require(&mut self, name: &str, sources: &[SecretSource]) -> Result<String> {
        let value = sources.iter().find_map(SecretSource::resolve).ok_or_else(|| {
            let tried: Vec<String> = sources.iter().map(SecretSource::describe).collect();
            Error::MissingCredential(format!("{} (tried {})", name, tried.join(", ")))
        })?;

        self.secrets.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Returns a loaded credential.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }

    /// Replaces every known secret value with `[REDACTED:<name>]`.
    ///
    /// Longer values are replaced first so a secret containing another is
    /// not partially revealed.
    pub fn redact(&self, text: &str) -> String {
        let mut secrets: Vec<(&String, &String)> = self.secrets.iter().collect();
        secrets.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let mut result = text.to_string();
        for (name, value) in secrets {
            result = result.replace(value.as_str(), &format!("[REDACTED:{}]", name));
        }
        result
    }

    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }
}

/// Credentials required before the remediation loop may start.
#[derive(Clone)]
pub struct Credentials {
    pub ai_api_key: String,
    pub vcs_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ai_api_key", &"[REDACTED]")
            .field("vcs_token", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Loads both credentials from the environment (or `*_FILE` paths).
    pub fn from_env(secrets: &mut SecretsManager) -> Result<Self> {
        let file_source = |var: &str| env::var(var).ok().map(SecretSource::File);

        let mut ai_sources = vec![SecretSource::EnvVar(AI_API_KEY.to_string())];
        ai_sources.extend(file_source("OPENAI_API_KEY_FILE"));

        let mut vcs_sources = vec![
            SecretSource::EnvVar(VCS_TOKEN.to_string()),
            SecretSource::EnvVar("GH_TOKEN".to_string()),
        ];
        vcs_sources.extend(file_source("GITHUB_TOKEN_FILE"));

        Ok(Self {
            ai_api_key: secrets.require(AI_API_KEY, &ai_sources)?,
            vcs_token: secrets.require(VCS_TOKEN, &vcs_sources)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_uses_first_available_source() {
        let mut manager = SecretsManager::new();

        let value = manager
            .require(
                "TOKEN",
                &[
                    SecretSource::EnvVar("IAC_AUTOFIX_DEFINITELY_UNSET_1".to_string()),
                    SecretSource::Direct("fallback-token".to_string()),
                ],
            )
            .unwrap();

        assert_eq!(value, "fallback-token");
        assert_eq!(manager.get("TOKEN"), Some("fallback-token"));
    }

    #[test]
    fn require_fails_when_no_source_resolves() {
        let mut manager = SecretsManager::new();

        let err = manager
            .require(
                AI_API_KEY,
                &[SecretSource::EnvVar("IAC_AUTOFIX_DEFINITELY_UNSET_2".to_string())],
            )
            .unwrap_err();

        assert!(matches!(err, Error::MissingCredential(ref msg) if msg.contains(AI_API_KEY)));
        assert!(err.is_fatal_precondition());
        assert!(!manager.has_secrets());
    }

    #[test]
    fn blank_values_do_not_count() {
        let mut manager = SecretsManager::new();
        let result = manager.require("KEY", &[SecretSource::Direct("   ".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn file_source_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "ghp_filetoken\n").unwrap();
        let mut manager = SecretsManager::new();

        let value = manager
            .require(
                VCS_TOKEN,
                &[SecretSource::File(path.to_string_lossy().to_string())],
            )
            .unwrap();

        assert_eq!(value, "ghp_filetoken");
    }

    #[test]
    fn redacts_all_occurrences() {
        let mut manager = SecretsManager::new();
        manager
            .require("TOKEN", &[SecretSource::Direct("abc123xyz".to_string())])
            .unwrap();

        let redacted = manager.redact("token abc123xyz rejected; retry with abc123xyz");

        assert_eq!(
            redacted,
            "token [REDACTED:TOKEN] rejected; retry with [REDACTED:TOKEN]"
        );
    }

    #[test]
    fn redacts_longer_secret_first() {
        let mut manager = SecretsManager::new();
        manager
            .require("SHORT", &[SecretSource::Direct("abc".to_string())])
            .unwrap();
        manager
            .require("LONG", &[SecretSource::Direct("abcdef".to_string())])
            .unwrap();

        assert_eq!(manager.redact("key=abcdef"), "key=[REDACTED:LONG]");
    }

    #[test]
    fn credentials_debug_hides_values() {
        let creds = Credentials {
            ai_api_key: "sk-live".to_string(),
            vcs_token: "ghp_live".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("sk-live"));
        assert!(!debug.contains("ghp_live"));
    }
}
