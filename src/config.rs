//! Optional `.qdup.toml` settings. CLI flags override the file, the file
//! overrides built-in defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{QdupError, Result};

pub const DEFAULT_CONFIG_FILE: &str = ".qdup.toml";

/// Single-document mode: questions in one exam file.
pub const DEFAULT_FILE_THRESHOLD: f64 = 0.7;

/// Directory mode: a whole bank, where only near copies are interesting.
pub const DEFAULT_DIR_THRESHOLD: f64 = 0.9;

pub const DEFAULT_TOOL: &str = "meld -n {left} {right}";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub file_threshold: Option<f64>,
    pub dir_threshold: Option<f64>,
    pub recursive: Option<bool>,
    pub tool: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub exclude: Vec<String>,
}

impl Config {
    /// Load `path`, or the default file from the working directory when no
    /// path was given. Only an explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit): (PathBuf, bool) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(QdupError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            QdupError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::parse(&content)
            .map_err(|e| QdupError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn file_threshold(&self, flag: Option<f64>) -> f64 {
        flag.or(self.file_threshold).unwrap_or(DEFAULT_FILE_THRESHOLD)
    }

    pub fn dir_threshold(&self, flag: Option<f64>) -> f64 {
        flag.or(self.dir_threshold).unwrap_or(DEFAULT_DIR_THRESHOLD)
    }

    /// `--recursive` can only switch recursion on.
    pub fn recursive(&self, flag: bool) -> bool {
        flag || self.recursive.unwrap_or(false)
    }

    pub fn tool<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.or(self.tool.as_deref()).unwrap_or(DEFAULT_TOOL)
    }

    pub fn extensions(&self, flag: &[String]) -> Vec<String> {
        if !flag.is_empty() {
            return flag.to_vec();
        }
        self.extensions
            .clone()
            .unwrap_or_else(|| vec!["xml".to_string()])
    }

    /// Config excludes and flag excludes both apply.
    pub fn exclude(&self, flag: &[String]) -> Vec<String> {
        self.exclude.iter().chain(flag.iter()).cloned().collect()
    }
}
