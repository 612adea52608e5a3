use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use regex::Regex;
use serde_derive::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

// Docker reference grammar: [domain[:port]/]path[:tag][@digest]
const REFERENCE_PATTERN: &str = concat!(
    r"^(?:(?P<domain>(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])",
    r"(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?)/)?",
    r"(?P<path>[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*)",
    r"(?::(?P<tag>[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}))?",
    r"(?:@(?P<digest>[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}))?$",
);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read container list `{}`", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse container list `{}`", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,

    #[error("`{0}` is not a valid image reference")]
    Invalid(String),
}

/// Image reference as written in the container list, checked against the
/// docker reference grammar so it can never be mistaken for a CLI flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference(String);

impl ImageReference {
    fn parse_with(regex: &Regex, value: &str) -> Result<Self, ReferenceError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let invalid = || ReferenceError::Invalid(value.to_string());
        let captures = regex.captures(value).ok_or_else(invalid)?;

        // Without a dot, port or `localhost` the first component belongs to
        // the repository path, which must be lowercase.
        if let Some(component) = captures.name("domain").map(|m| m.as_str()) {
            if !is_domain(component) && component.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(invalid());
            }
        }

        Ok(ImageReference(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_blank_document(contents: &str) -> bool {
    contents.lines().all(|line| {
        let line = line.split('#').next().unwrap_or_default().trim();
        line.is_empty() || line == "---" || line == "..."
    })
}

fn is_domain(component: &str) -> bool {
    component == "localhost" || component.contains('.') || component.contains(':')
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContainerList {
    containers: Option<Vec<String>>,
}

impl ContainerList {
    /// Parses the container list. A document without content (blank,
    /// comments only, a bare `---` or `~`) is an empty list.
    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        if is_blank_document(contents) {
            return Ok(ContainerList::default());
        }

        match serde_yaml::from_str::<Value>(contents)? {
            Value::Null => Ok(ContainerList::default()),
            value => serde_yaml::from_value(value),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        ContainerList::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn entries(&self) -> &[String] {
        self.containers.as_deref().unwrap_or_default()
    }

    /// Valid, de-duplicated references in file order. Invalid entries are
    /// logged and left out.
    pub fn images(&self) -> Result<Vec<ImageReference>> {
        let regex = Regex::new(REFERENCE_PATTERN).context("could not compile reference pattern")?;

        let images = self
            .entries()
            .iter()
            .filter_map(|entry| match ImageReference::parse_with(&regex, entry) {
                Ok(reference) => Some(reference),
                Err(error) => {
                    log::warn!("Skipping container list entry: {}", error);
                    None
                }
            })
            .unique()
            .collect();

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn names(list: &ContainerList) -> Vec<String> {
        list.images()
            .unwrap()
            .iter()
            .map(|image| image.as_str().to_string())
            .collect()
    }

    fn reference(value: &str) -> Result<ImageReference, ReferenceError> {
        ImageReference::parse_with(&Regex::new(REFERENCE_PATTERN).unwrap(), value)
    }

    #[test]
    fn test_parse_list() {
        let list = ContainerList::parse(
            "containers:\n- nginx:1.21\n- gcr.io/project/app@sha256:0123456789abcdef0123456789abcdef\n",
        )
        .unwrap();
        assert_eq!(
            names(&list),
            vec![
                "nginx:1.21",
                "gcr.io/project/app@sha256:0123456789abcdef0123456789abcdef"
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(ContainerList::parse("").unwrap().entries().len(), 0);
        assert_eq!(ContainerList::parse("  \n").unwrap().entries().len(), 0);
        assert_eq!(
            ContainerList::parse("containers:\n").unwrap().entries().len(),
            0
        );
    }

    #[test]
    fn test_document_without_content() {
        let commented =
            ContainerList::parse("# all images disabled for now\n# - nginx\n").unwrap();
        assert!(commented.entries().is_empty());
        assert!(ContainerList::parse("---\n").unwrap().entries().is_empty());
        assert!(ContainerList::parse("--- # empty\n...\n").unwrap().entries().is_empty());
        assert!(ContainerList::parse("~\n").unwrap().entries().is_empty());
        assert!(ContainerList::parse("containers: ~\n").unwrap().entries().is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ContainerList::parse("containers: []\nimages: [nginx]\n").is_err());
    }

    #[test]
    fn test_wrong_nesting_rejected() {
        assert!(ContainerList::parse("containers:\n  nginx: latest\n").is_err());
        assert!(ContainerList::parse("- nginx\n").is_err());
    }

    #[test]
    fn test_invalid_and_duplicate_entries_skipped() {
        let list = ContainerList::parse(
            "containers:\n- nginx\n- ''\n- --help\n- Upper/Case\n- nginx\n- ' redis:6 '\n",
        )
        .unwrap();
        assert_eq!(names(&list), vec!["nginx", "redis:6"]);
    }

    #[test]
    fn test_valid_references() {
        for value in &[
            "nginx",
            "ubuntu:22.04",
            "library/nginx",
            "localhost/app",
            "localhost:5000/team/app:v1.2",
            "quay.io/prometheus/node-exporter",
            "MyRegistry.example.com/app",
            "gcr.io/project/app:1.0@sha256:0123456789abcdef0123456789abcdef",
        ] {
            let reference = reference(value).unwrap();
            assert_eq!(reference.as_str(), *value);
        }
    }

    #[test]
    fn test_reference_errors() {
        assert_eq!(reference(""), Err(ReferenceError::Empty));
        assert_eq!(
            reference("-rf"),
            Err(ReferenceError::Invalid("-rf".to_string()))
        );
        assert!(reference("nginx latest").is_err());
        assert!(reference("nginx:").is_err());
        assert!(reference("Team/app").is_err());
        assert!(reference("nginx@sha256:abc").is_err());
        assert!(reference("nginx:é1").is_err());
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "containers:\n- alpine:3.14").unwrap();

        let list = ContainerList::from_file(file.path()).await.unwrap();
        assert_eq!(list.entries(), &["alpine:3.14".to_string()]);
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");

        match ContainerList::from_file(&path).await {
            Err(ConfigError::Read { path: error_path, .. }) => assert_eq!(error_path, path),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_from_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "containers: [nginx").unwrap();

        assert!(matches!(
            ContainerList::from_file(file.path()).await,
            Err(ConfigError::Parse { .. })
        ));
    }
}
