//! Pipeline configuration
//!
//! `defaults/wikiflow.default.yaml` documents every knob with its default
//! value. User files only need to name the keys they override; missing keys
//! fall back to [`PipelineOptions::default`].

use crate::wikitext::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The documented defaults, kept next to the code that reads them.
pub const DEFAULT_YAML: &str = include_str!("../../defaults/wikiflow.default.yaml");

/// Options for a whole document run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Maximum template nesting depth before expansion is refused
    pub max_depth: usize,
    /// Expand templates at the top level (wrapping them in markers)
    pub expand_templates: bool,
    /// Fetch template sources through the data-access collaborator
    pub fetch_templates: bool,
    /// Expand whole invocations remotely instead of natively
    pub use_remote_preprocessor: bool,
    /// Top-level content is inline (no paragraphs, no indent-pre)
    pub inline_context: bool,
    pub site: SiteConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            max_depth: 40,
            expand_templates: true,
            fetch_templates: true,
            use_remote_preprocessor: false,
            inline_context: false,
            site: SiteConfig::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}

/// Wiki-specific name tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Parser function aliases (`#if`, `lc`) to canonical names
    pub function_hooks: BTreeMap<String, String>,
    /// Variable magic words (`!`, `DEFAULTSORT`) to canonical names
    pub variables: BTreeMap<String, String>,
    /// Canonical magic words that render as page properties
    pub magic_masqs: Vec<String>,
    /// Extension tag names recognized by the tokenizer
    pub extension_tags: Vec<String>,
    /// Namespace prefix for template titles
    pub template_namespace: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let hooks = [
            ("#if", "if"),
            ("#ifeq", "ifeq"),
            ("#switch", "switch"),
            ("#iferror", "iferror"),
            ("#tag", "tag"),
            ("lc", "lc"),
            ("uc", "uc"),
            ("lcfirst", "lcfirst"),
            ("ucfirst", "ucfirst"),
            ("padleft", "padleft"),
            ("padright", "padright"),
        ];
        let variables = [
            ("!", "!"),
            ("defaultsort", "defaultsort"),
            ("defaultsortkey", "defaultsort"),
            ("defaultcategorysort", "defaultsort"),
            ("displaytitle", "displaytitle"),
        ];
        SiteConfig {
            function_hooks: hooks
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            variables: variables
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            magic_masqs: vec!["defaultsort".into(), "displaytitle".into()],
            extension_tags: vec!["nowiki".into()],
            template_namespace: "Template".into(),
        }
    }
}

impl SiteConfig {
    /// Canonical name for a parser-function prefix, trying the exact
    /// spelling first and then lower case.
    pub fn function_hook(&self, prefix: &str) -> Option<&str> {
        self.function_hooks
            .get(prefix)
            .or_else(|| self.function_hooks.get(&prefix.to_lowercase()))
            .map(String::as_str)
    }

    pub fn variable(&self, prefix: &str) -> Option<&str> {
        self.variables
            .get(prefix)
            .or_else(|| self.variables.get(&prefix.to_lowercase()))
            .map(String::as_str)
    }

    pub fn is_magic_masq(&self, canonical: &str) -> bool {
        self.magic_masqs.iter().any(|m| m == canonical)
    }

    pub fn is_extension_tag(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.extension_tags.iter().any(|t| *t == lower)
    }
}
