//! Raw-document-to-resource mapping.
//!
//! The cursor wrapper and graph engine hand raw BSON documents to an
//! injected [`ResourceMapper`] when typed resource objects are requested.
//! Full FHIR model binding lives outside this crate; [`BsonResourceMapper`]
//! is the default pass-through implementation.

use bson::Document;

/// A typed view over a raw resource document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObject {
    /// The FHIR resource type.
    pub resource_type: String,
    /// The logical id.
    pub id: String,
    /// The full document body.
    pub body: Document,
}

impl ResourceObject {
    /// The relative URL of this resource, e.g. `Patient/123`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Maps raw documents to domain resource objects.
pub trait ResourceMapper: Send + Sync {
    /// Builds a resource object from a raw document.
    ///
    /// `resource_type` is the type the originating query targeted; it is used
    /// when the document itself lacks a `resourceType` (projected partials).
    fn map_document(&self, raw: &Document, resource_type: &str) -> ResourceObject;
}

/// Pass-through mapper reading `resourceType` and `id` from the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonResourceMapper;

impl ResourceMapper for BsonResourceMapper {
    fn map_document(&self, raw: &Document, resource_type: &str) -> ResourceObject {
        ResourceObject {
            resource_type: raw
                .get_str("resourceType")
                .unwrap_or(resource_type)
                .to_string(),
            id: raw.get_str("id").unwrap_or_default().to_string(),
            body: raw.clone(),
        }
    }
}
