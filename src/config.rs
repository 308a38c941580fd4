//! Rule catalog for the ingest engine
//!
//! The catalog is an ordered list of categories, each carrying the
//! extensions, keyword filters, shot regex and destination templates used
//! to classify a delivery. It is loaded once from a TOML document and is
//! read-only afterwards.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Terminal fallback category, accepts any file
pub const UNMATCHED: &str = "UnMatched";
/// Category holding video deliveries
pub const MOVS: &str = "Movs";
/// Category holding scanned plates
pub const PLATE: &str = "Plate";
/// Category holding annotation stills
pub const ANNOTATIONS: &str = "Annotations";

/// Categories every catalog must declare
const REQUIRED_CATEGORIES: &[&str] = &[MOVS, PLATE, ANNOTATIONS, UNMATCHED];

/// Shot value that selects the common destination template
pub const COMMON_SHOT: &str = "common";

/// Raw category section as written in the catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleSection {
    #[serde(default)]
    table_head: Vec<String>,
    #[serde(default)]
    regex: Option<String>,
    #[serde(default)]
    filter: Option<Vec<String>>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(rename = "Type", default)]
    category_type: String,
    path: String,
    #[serde(default)]
    common_path: Option<String>,
}

/// Top-level layout of the catalog file
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    departments: Vec<String>,
    #[serde(rename = "Table")]
    table: toml::Table,
}

/// A single classification category
#[derive(Debug, Clone)]
pub struct RuleEntry {
    /// Unique category name
    pub name: String,
    /// Lowercase extensions, without leading dot
    pub extensions: BTreeSet<String>,
    /// Lowercase substring filters
    pub filter_keywords: Vec<String>,
    /// Shot-matching regex
    pub shot_regex: Option<Regex>,
    /// Columns returned for each record, in display order
    pub output_columns: Vec<String>,
    /// Value of the "Type" field
    pub category_type: String,
    /// Destination path template
    pub path_template: String,
    /// Destination template used when the shot is "common"
    pub common_path_template: Option<String>,
}

impl RuleEntry {
    fn from_section(name: &str, section: RuleSection) -> std::result::Result<Self, ConfigError> {
        let shot_regex = match section.regex.as_deref() {
            None | Some("None") => None,
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                category: name.to_string(),
                message: format!("invalid regex '{}': {}", pattern, e),
            })?),
        };

        let extensions = section
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let filter_keywords = section
            .filter
            .unwrap_or_default()
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Self {
            name: name.to_string(),
            extensions,
            filter_keywords,
            shot_regex,
            output_columns: section.table_head,
            category_type: section.category_type,
            path_template: section.path,
            common_path_template: section.common_path,
        })
    }

    /// Whether this is the terminal fallback category
    pub fn is_fallback(&self) -> bool {
        self.name == UNMATCHED
    }

    /// Check if a (lowercase, dotless) extension belongs to this category
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }

    /// Check if any keyword filter appears in the file name (case-insensitive)
    pub fn matches_keyword(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.filter_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Run the shot regex against a file name, returning the matched text
    pub fn shot_match(&self, file_name: &str) -> Option<String> {
        self.shot_regex
            .as_ref()
            .and_then(|re| re.find(file_name))
            .map(|m| m.as_str().to_string())
    }

    /// Pick the destination template for a shot value
    pub fn template_for(&self, shot: &str) -> &str {
        if shot == COMMON_SHOT {
            if let Some(ref common) = self.common_path_template {
                return common;
            }
            debug!(category = %self.name, "No common_path configured, using standard path");
        }
        &self.path_template
    }
}

/// Ordered, immutable catalog of categories
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<RuleEntry>,
    fallback: usize,
    departments: Vec<String>,
}

impl RuleCatalog {
    /// Load the catalog from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, Some(path))
    }

    /// Parse the catalog from TOML text
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        Self::parse(content, None)
    }

    fn parse(content: &str, path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let file: CatalogFile = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.map(Path::to_path_buf),
            source: e,
        })?;

        let mut rules = Vec::with_capacity(file.table.len());
        for (name, value) in file.table {
            let section: RuleSection = value.try_into().map_err(|e: toml::de::Error| {
                ConfigError::Invalid {
                    category: name.clone(),
                    message: e.to_string(),
                }
            })?;
            rules.push(RuleEntry::from_section(&name, section)?);
        }

        for required in REQUIRED_CATEGORIES {
            if !rules.iter().any(|r| r.name == *required) {
                return Err(ConfigError::MissingCategory(required.to_string()));
            }
        }
        let fallback = rules
            .iter()
            .position(RuleEntry::is_fallback)
            .ok_or_else(|| ConfigError::MissingCategory(UNMATCHED.to_string()))?;

        let departments = department_choices(&file.departments);
        debug!(
            categories = rules.len(),
            departments = departments.len(),
            "Rule catalog loaded"
        );

        Ok(Self {
            rules,
            fallback,
            departments,
        })
    }

    /// All categories in declared order
    pub fn rules(&self) -> &[RuleEntry] {
        &self.rules
    }

    /// Categories evaluated by the matcher, in declared order (fallback excluded)
    pub fn classification_rules(&self) -> impl Iterator<Item = &RuleEntry> {
        self.rules.iter().filter(|r| !r.is_fallback())
    }

    /// Look up a category by name
    pub fn get(&self, name: &str) -> Result<&RuleEntry> {
        self.rules
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::UnknownCategory(name.to_string()))
    }

    /// The fallback category
    pub fn unmatched(&self) -> &RuleEntry {
        &self.rules[self.fallback]
    }

    /// Department names offered for the "Dept" field
    pub fn departments(&self) -> &[String] {
        &self.departments
    }

    /// Extensions probed by decoding (plate and annotation formats)
    pub fn raster_extensions(&self) -> BTreeSet<String> {
        [PLATE, ANNOTATIONS]
            .iter()
            .filter_map(|name| self.get(name).ok())
            .flat_map(|r| r.extensions.iter().cloned())
            .collect()
    }

    /// Extensions probed as video containers
    pub fn video_extensions(&self) -> BTreeSet<String> {
        self.get(MOVS)
            .map(|r| r.extensions.clone())
            .unwrap_or_default()
    }

    /// Generate a sample catalog file
    pub fn sample_config() -> String {
        r#"# Ingest rule catalog
# This file uses TOML format (https://toml.io)
#
# Categories are evaluated in the order they are declared here; the first
# category that claims a file wins. "UnMatched" is the catalog-wide fallback.
#
# Path templates use {Field} placeholders. Available fields:
#   server, Show, Enable, Sequence, Shot, Scan ID, Dept, Type,
#   Frame Range, Version, Extension, Res, Preview

# Department names offered for the Dept column.
# Names containing "_" are hidden; the rest are sorted shortest first.
departments = ["comp", "roto", "paint", "prep", "matchmove"]

[Table.Plate]
table_head = ["Enable", "Sequence", "Shot", "Scan ID", "Dept", "Type", "Frame Range", "Res", "Extension", "Version", "Preview"]
regex = '[a-zA-Z]{2}\d{1,4}'
filter = ["plate", "scan"]
extensions = ["exr", "dpx"]
Type = "plate"
path = "/{server}/{Show}/shots/{Sequence}/{Shot}/plates/{Scan ID}/{Version}/{Preview}"
common_path = "/{server}/{Show}/common/plates/{Version}/{Preview}"

[Table.Movs]
table_head = ["Enable", "Sequence", "Shot", "Dept", "Type", "Frame Range", "Res", "Extension", "Version", "Preview"]
regex = '[\w-]+\d{4}'
filter = ["ref", "edit"]
extensions = ["mov", "mp4"]
Type = "reference"
path = "/{server}/{Show}/shots/{Sequence}/{Shot}/reference/{Version}/{Preview}"
common_path = "/{server}/{Show}/common/reference/{Version}/{Preview}"

[Table.Annotations]
table_head = ["Enable", "Sequence", "Shot", "Dept", "Type", "Res", "Extension", "Version", "Preview"]
filter = ["note", "anno"]
extensions = ["jpg", "jpeg", "png", "tif", "tiff"]
Type = "annotation"
path = "/{server}/{Show}/shots/{Sequence}/{Shot}/annotations/{Version}/{Preview}"

[Table.UnMatched]
table_head = ["Enable", "Sequence", "Shot", "Type", "Extension", "Version", "Preview"]
extensions = []
Type = "misc"
path = "/{server}/{Show}/incoming/unmatched/{Preview}"
"#
        .to_string()
    }
}

/// Filter and order department names the way they are offered to operators
///
/// Names containing an underscore are internal and dropped; the rest are
/// sorted by length, keeping the incoming order for equal lengths.
pub fn department_choices(names: &[String]) -> Vec<String> {
    let mut departments: Vec<String> = names
        .iter()
        .filter(|name| !name.contains('_'))
        .cloned()
        .collect();
    departments.sort_by_key(|name| name.len());
    departments
}

/// Errors that can occur when loading the rule catalog
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the catalog file
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the catalog document
    ParseError {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    /// A category section is malformed
    Invalid { category: String, message: String },
    /// A required category is absent
    MissingCategory(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(f, "Failed to read rule catalog '{}': {}", path.display(), source)
            }
            ConfigError::ParseError {
                path: Some(path),
                source,
            } => {
                write!(f, "Failed to parse rule catalog '{}': {}", path.display(), source)
            }
            ConfigError::ParseError { path: None, source } => {
                write!(f, "Failed to parse rule catalog: {}", source)
            }
            ConfigError::Invalid { category, message } => {
                write!(f, "Invalid category '{}': {}", category, message)
            }
            ConfigError::MissingCategory(name) => {
                write!(f, "Rule catalog is missing required category '{}'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::Invalid { .. } | ConfigError::MissingCategory(_) => None,
        }
    }
}
