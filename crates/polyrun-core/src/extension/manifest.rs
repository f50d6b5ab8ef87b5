//! Extension manifest parsing and validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One action an extension exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Name passed to invoke.
    pub name: String,
    /// Label for menus; falls back to `name`.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActionSpec {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Self-description every extension provides at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable identifier, e.g. `acme.formatter`.
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub actions: Vec<ActionSpec>,
}

impl ExtensionManifest {
    /// Parse and validate manifest JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(text.trim()).map_err(|e| Error::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check declaration-level invariants.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_id(&self.id) {
            return Err(Error::Manifest(format!(
                "invalid id '{}' (use lowercase letters, digits, '.', '_' or '-')",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Manifest(format!("extension '{}' has no name", self.id)));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Manifest(format!(
                "extension '{}' has no version",
                self.id
            )));
        }
        if self.actions.is_empty() {
            return Err(Error::Manifest(format!(
                "extension '{}' exposes no actions",
                self.id
            )));
        }

        let mut seen = BTreeSet::new();
        for action in &self.actions {
            let name = action.name.trim();
            if name.is_empty() {
                return Err(Error::Manifest(format!(
                    "extension '{}' has an action without a name",
                    self.id
                )));
            }
            if !seen.insert(name) {
                return Err(Error::Manifest(format!(
                    "extension '{}' declares action '{}' twice",
                    self.id, name
                )));
            }
        }
        Ok(())
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name.clone()).collect()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name == name)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_manifest() {
        let manifest = ExtensionManifest::from_json(
            r#"{
                "id": "acme.format",
                "name": "Formatter",
                "version": "1.2.0",
                "actions": [
                    { "name": "format", "title": "Format buffer" },
                    { "name": "lint" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.action_names(), vec!["format", "lint"]);
        assert_eq!(manifest.actions[0].title(), "Format buffer");
        assert_eq!(manifest.actions[1].title(), "lint");
        assert!(manifest.has_action("lint"));
    }

    #[test]
    fn test_rejects_bad_manifests() {
        let cases = [
            r#"{"id":"Bad Id","name":"x","version":"1","actions":[{"name":"a"}]}"#,
            r#"{"id":"ok","name":"x","version":"1","actions":[]}"#,
            r#"{"id":"ok","name":"x","version":"1","actions":[{"name":"a"},{"name":"a"}]}"#,
            r#"{"id":"ok","name":"","version":"1","actions":[{"name":"a"}]}"#,
            r#"not json"#,
        ];
        for case in cases {
            let err = ExtensionManifest::from_json(case).unwrap_err();
            assert!(matches!(err, Error::Manifest(_)), "{}", case);
        }
    }
}
