//! Result flattening and bundle assembly.

use std::collections::{HashMap, HashSet};

use bson::{Bson, Document, doc};
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use super::arena::{EntityArena, NodeId};

/// Flattens the traversal tree into a collection bundle.
///
/// Per root: optionally rewrites self-references to `#id` contained form,
/// then either nests matched children under the root's `contained` array or
/// emits them as sibling entries in depth-first order (parent before
/// children). The full entry list is deduplicated by (resourceType, id)
/// first-seen, then filtered through `keep`, the defense-in-depth scope
/// re-check after traversal.
pub(crate) fn assemble_bundle(
    arena: &EntityArena,
    roots: &[NodeId],
    contained_mode: bool,
    hash_references: bool,
    keep: impl Fn(&Document) -> bool,
) -> Document {
    let mut entries: Vec<Document> = Vec::new();

    for &root in roots {
        let root_node = arena.node(root);
        if !root_node.include_in_output() {
            continue;
        }
        let Some(root_document) = root_node.document() else {
            continue;
        };
        let mut root_document = root_document.clone();

        let descendant_documents: Vec<Document> = arena
            .descendants(root)
            .into_iter()
            .filter_map(|id| {
                let node = arena.node(id);
                if node.is_resource() && node.include_in_output() {
                    node.document().cloned()
                } else {
                    None
                }
            })
            .collect();

        if hash_references {
            let targets = hashed_reference_targets(&root_document, &descendant_documents);
            hash_self_references(&mut root_document, &targets);
        }

        if contained_mode {
            if !descendant_documents.is_empty() {
                let contained: Vec<Bson> = descendant_documents
                    .into_iter()
                    .map(Bson::Document)
                    .collect();
                root_document.insert("contained", contained);
            }
            entries.push(root_document);
        } else {
            entries.push(root_document);
            entries.extend(descendant_documents);
        }
    }

    // First-seen-wins deduplication by (resourceType, id).
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut deduplicated = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = entry_key(&entry);
        if seen.insert(key) {
            deduplicated.push(entry);
        }
    }

    let bundle_entries: Vec<Document> = deduplicated
        .into_iter()
        .filter(|entry| keep(entry))
        .map(|entry| {
            let (resource_type, id) = entry_key(&entry);
            doc! {
                "fullUrl": format!("{resource_type}/{id}"),
                "resource": entry,
            }
        })
        .collect();

    doc! {
        "resourceType": "Bundle",
        "id": Uuid::new_v4().to_string(),
        "type": "collection",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "entry": bundle_entries,
    }
}

fn entry_key(entry: &Document) -> (String, String) {
    (
        entry.get_str("resourceType").unwrap_or_default().to_string(),
        entry.get_str("id").unwrap_or_default().to_string(),
    )
}

// "Type/id" -> "#id" for every resource that will appear in the output set
// alongside the root.
fn hashed_reference_targets(
    root: &Document,
    descendants: &[Document],
) -> HashMap<String, String> {
    let mut targets = HashMap::new();
    for document in std::iter::once(root).chain(descendants) {
        let (resource_type, id) = entry_key(document);
        if !resource_type.is_empty() && !id.is_empty() {
            targets.insert(format!("{resource_type}/{id}"), format!("#{id}"));
        }
    }
    targets
}

// Structural walk replacing only actual `reference` field values; plain
// string fields that merely contain a "Type/id" substring are untouched.
fn hash_self_references(document: &mut Document, targets: &HashMap<String, String>) {
    for (key, value) in document.iter_mut() {
        match value {
            Bson::String(reference) if key == "reference" => {
                if let Some(hashed) = targets.get(reference.as_str()) {
                    *reference = hashed.clone();
                }
            }
            Bson::Document(nested) => hash_self_references(nested, targets),
            Bson::Array(items) => {
                for item in items {
                    hash_bson(item, targets);
                }
            }
            _ => {}
        }
    }
}

fn hash_bson(value: &mut Bson, targets: &HashMap<String, String>) {
    match value {
        Bson::Document(nested) => hash_self_references(nested, targets),
        Bson::Array(items) => {
            for item in items {
                hash_bson(item, targets);
            }
        }
        _ => {}
    }
}
