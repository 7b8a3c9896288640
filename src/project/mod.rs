//! The project mounted into every sandbox session.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Result, SandlotError};

/// Server entry point of the demo project.
pub const INDEX_JS: &str = r#"import express from 'express';

const app = express();
const port = 3111;

app.get('/', (req, res) => {
  res.send('Welcome to a sandboxed Node.js app! 🥳');
});

app.listen(port, () => {
  console.log(`App is live at http://localhost:${port}`);
});
"#;

/// Manifest of the demo project.
pub const PACKAGE_JSON: &str = r#"{
  "name": "example-app",
  "type": "module",
  "dependencies": {
    "express": "latest",
    "nodemon": "latest"
  },
  "scripts": {
    "start": "nodemon --watch './' index.js"
  }
}
"#;

/// The demo project as (path, contents) pairs, in mount order.
pub const DEMO_FILES: &[(&str, &str)] = &[("index.js", INDEX_JS), ("package.json", PACKAGE_JSON)];

/// A single file of a project definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectFile {
    pub path: String,
    pub contents: String,
}

/// Ordered mapping from relative path to complete file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDefinition {
    files: Vec<ProjectFile>,
}

impl ProjectDefinition {
    /// Build a project from (path, contents) pairs, rejecting paths that are
    /// not plain relative paths.
    pub fn new<P, C>(entries: impl IntoIterator<Item = (P, C)>) -> Result<Self>
    where
        P: Into<String>,
        C: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for (path, contents) in entries {
            let path = path.into();
            validate_relative_path(&path)?;
            if !seen.insert(path.clone()) {
                return Err(SandlotError::InvalidProjectPath {
                    path,
                    reason: "duplicate entry".to_string(),
                });
            }
            files.push(ProjectFile {
                path,
                contents: contents.into(),
            });
        }

        Ok(Self { files })
    }

    /// The built-in two-file Express project.
    pub fn demo() -> Self {
        Self {
            files: DEMO_FILES
                .iter()
                .map(|(path, contents)| ProjectFile {
                    path: path.to_string(),
                    contents: contents.to_string(),
                })
                .collect(),
        }
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.contents.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Only forward-slash relative paths without `.`/`..` segments are accepted.
fn validate_relative_path(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(SandlotError::InvalidProjectPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };

    if path.is_empty() {
        return reject("path cannot be empty");
    }
    if path.starts_with('/') {
        return reject("path must be relative");
    }
    if path.contains('\\') {
        return reject("path must use forward slashes");
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return reject("path cannot contain empty, '.' or '..' segments");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_has_entry_point_and_manifest_in_order() {
        let project = ProjectDefinition::demo();
        let paths: Vec<_> = project.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.js", "package.json"]);
        assert_eq!(project.get("index.js"), Some(INDEX_JS));
    }

    #[test]
    fn test_demo_manifest_is_valid_json_with_start_script() {
        let manifest: serde_json::Value = serde_json::from_str(PACKAGE_JSON).unwrap();
        assert!(manifest["scripts"]["start"].as_str().unwrap().contains("index.js"));
        assert!(manifest["dependencies"].get("express").is_some());
    }

    #[test]
    fn test_demo_passes_path_validation() {
        let validated = ProjectDefinition::new(DEMO_FILES.iter().copied()).unwrap();
        assert_eq!(validated, ProjectDefinition::demo());
    }

    #[test]
    fn test_rejects_unsafe_paths() {
        for bad in ["", "/etc/passwd", "../escape.js", "src/../x.js", "a//b", "win\\path", "./x"] {
            let result = ProjectDefinition::new([(bad, "")]);
            assert!(
                matches!(result, Err(SandlotError::InvalidProjectPath { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let result = ProjectDefinition::new([("a.js", "1"), ("a.js", "2")]);
        assert!(matches!(result, Err(SandlotError::InvalidProjectPath { .. })));
    }

    #[test]
    fn test_nested_paths_allowed() {
        let project = ProjectDefinition::new([("src/lib/util.js", "export {}")]).unwrap();
        assert_eq!(project.len(), 1);
    }
}
