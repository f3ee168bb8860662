//! Link specification types and the forward-path grammar.
//!
//! A graph definition is a tree of links. A link with a `path` follows a
//! property forward from the parent entity; a link without one follows its
//! target's `params` template in reverse, searching for resources that point
//! back at the parent. Targets name the expected resource type and may carry
//! further nested links.

use bson::Document;
use serde::Deserialize;

use crate::error::ConfigError;

/// A caller-supplied graph definition.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDefinition {
    /// Logical id of the definition, if any.
    #[serde(default)]
    pub id: Option<String>,
    /// The resource type traversal starts from.
    pub start: String,
    /// The top-level links.
    #[serde(default)]
    pub link: Vec<GraphLink>,
}

impl GraphDefinition {
    /// Parses a definition from a raw document.
    pub fn parse(document: Document) -> Result<Self, ConfigError> {
        bson::from_document(document).map_err(|e| ConfigError::InvalidValue {
            name: "GraphDefinition".to_string(),
            message: e.to_string(),
        })
    }
}

/// One link in the definition tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphLink {
    /// Forward property path. Absent for reverse links.
    #[serde(default)]
    pub path: Option<String>,
    /// The link targets.
    #[serde(default)]
    pub target: Vec<GraphTarget>,
}

/// A link target: the expected resource type plus nested links.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphTarget {
    /// Expected resource type of matched children. `None` accepts
    /// non-resource nodes only.
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    /// Reverse-link query template containing a `{ref}` placeholder,
    /// e.g. `practitioner={ref}`.
    #[serde(default)]
    pub params: Option<String>,
    /// Nested links processed against this target's matched children.
    #[serde(default)]
    pub link: Vec<GraphLink>,
}

/// A filter on the final path segment: keep elements whose `property`
/// equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathFilter {
    pub property: String,
    pub value: String,
}

/// A parsed forward path: dotted segments with `[x]` suffixes stripped and
/// an optional final-segment filter (`prop:filterProp=filterValue`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedPath {
    pub segments: Vec<String>,
    pub filter: Option<PathFilter>,
}

impl ParsedPath {
    pub fn parse(path: &str) -> ParsedPath {
        let mut segments: Vec<String> = Vec::new();
        let mut filter = None;

        let raw_segments: Vec<&str> = path.split('.').collect();
        for (index, raw) in raw_segments.iter().enumerate() {
            let mut segment = *raw;
            if index == raw_segments.len() - 1 {
                if let Some((name, spec)) = segment.split_once(':') {
                    if let Some((property, value)) = spec.split_once('=') {
                        filter = Some(PathFilter {
                            property: property.to_string(),
                            value: value.to_string(),
                        });
                        segment = name;
                    }
                }
            }
            let segment = segment.strip_suffix("[x]").unwrap_or(segment);
            segments.push(segment.to_string());
        }

        ParsedPath { segments, filter }
    }
}
