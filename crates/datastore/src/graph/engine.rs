//! Forward/reverse link processing and traversal orchestration.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::access::{CallerContext, SecurityTagComposer};
use crate::config::DataLayerConfig;
use crate::error::{AccessError, ConfigError, DataStoreResult, GraphError};
use crate::query::pipeline::{SearchArgs, SearchExecutor};
use crate::search_params::SearchParamResolver;
use crate::store::QueryOptions;

use super::arena::{EntityArena, NodeId};
use super::bundle::assemble_bundle;
use super::spec::{GraphDefinition, GraphLink, GraphTarget, ParsedPath};

/// A graph traversal request.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    /// The resource type traversal starts from.
    pub resource_type: String,
    /// Logical ids of the starting resources.
    pub ids: Vec<String>,
    /// The link specification to process.
    pub definition: GraphDefinition,
    /// The authenticated caller.
    pub caller: CallerContext,
    /// Nest matched children under the parents' `contained` arrays instead
    /// of flattening to sibling bundle entries.
    pub contained: bool,
    /// Per-request override of the global reference-hashing flag.
    pub hash_references: Option<bool>,
}

/// Recursively resolves linked resources into a collection bundle.
pub struct GraphTraversalEngine {
    executor: Arc<SearchExecutor>,
    composer: Arc<SecurityTagComposer>,
    search_params: Arc<dyn SearchParamResolver>,
    config: Arc<DataLayerConfig>,
}

impl GraphTraversalEngine {
    /// Creates an engine over the given search and security collaborators.
    pub fn new(
        executor: Arc<SearchExecutor>,
        composer: Arc<SecurityTagComposer>,
        search_params: Arc<dyn SearchParamResolver>,
        config: Arc<DataLayerConfig>,
    ) -> Self {
        Self {
            executor,
            composer,
            search_params,
            config,
        }
    }

    /// Runs the full traversal: fetch the starting resources, process every
    /// top-level link, and assemble the deduplicated, scope-checked bundle.
    pub async fn process(&self, request: &GraphRequest) -> DataStoreResult<Document> {
        self.check_scopes(&request.resource_type, &request.caller)?;
        let tags = self
            .composer
            .security_tags_from_scope(&request.caller, false, "read")?;

        let start_documents = self
            .fetch_by_ids(&request.resource_type, &request.ids, &tags)
            .await?;

        let mut arena = EntityArena::new();
        let roots: Vec<NodeId> = start_documents
            .into_iter()
            .map(|document| arena.alloc_resource(document, true))
            .collect();

        for link in &request.definition.link {
            self.process_link(
                &mut arena,
                roots.clone(),
                link,
                Some(request.resource_type.clone()),
                &request.caller,
                &tags,
            )
            .await?;
        }

        let hash_references = request
            .hash_references
            .unwrap_or(self.config.hash_references);
        let resolver = self.composer.resolver();
        let caller = &request.caller;
        Ok(assemble_bundle(
            &arena,
            &roots,
            request.contained,
            hash_references,
            |entry| resolver.resource_has_any_access_code(&tags, &caller.user, &caller.scope, entry),
        ))
    }

    // One link level against one parent set, then recursion into nested
    // links with the type-filtered children as the new parents.
    fn process_link<'a>(
        &'a self,
        arena: &'a mut EntityArena,
        parents: Vec<NodeId>,
        link: &'a GraphLink,
        parent_type: Option<String>,
        caller: &'a CallerContext,
        tags: &'a [String],
    ) -> Pin<Box<dyn Future<Output = DataStoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            for target in &link.target {
                let children = if let Some(path) = &link.path {
                    self.process_forward_link(arena, &parents, path, target, caller, tags)
                        .await?
                } else if let Some(params) = &target.params {
                    self.process_reverse_link(
                        arena,
                        &parents,
                        params,
                        parent_type.as_deref(),
                        target,
                        caller,
                        tags,
                    )
                    .await?
                } else {
                    Vec::new()
                };

                // Only children matching the expected target type recurse;
                // untyped targets accept non-resource nodes only.
                let filtered: Vec<NodeId> = children
                    .into_iter()
                    .filter(|&id| {
                        let node = arena.node(id);
                        match &target.resource_type {
                            Some(expected) => node.resource_type() == Some(expected.as_str()),
                            None => !node.is_resource(),
                        }
                    })
                    .collect();
                if filtered.is_empty() {
                    continue;
                }
                for nested in &target.link {
                    self.process_link(
                        arena,
                        filtered.clone(),
                        nested,
                        target.resource_type.clone(),
                        caller,
                        tags,
                    )
                    .await?;
                }
            }
            Ok(())
        })
    }

    // Resolves a forward property path against each parent. Reference values
    // become a batched, security-filtered lookup; anything else becomes a
    // synthetic non-resource child.
    async fn process_forward_link(
        &self,
        arena: &mut EntityArena,
        parents: &[NodeId],
        path: &str,
        target: &GraphTarget,
        caller: &CallerContext,
        tags: &[String],
    ) -> DataStoreResult<Vec<NodeId>> {
        let parsed = ParsedPath::parse(path);
        let mut children = Vec::new();
        // id -> parents whose resolved reference list includes it
        let mut reference_parents: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut ordered_ids: Vec<String> = Vec::new();

        for &parent in parents {
            let Some(parent_document) = arena.node(parent).document().cloned() else {
                continue;
            };
            for value in resolve_path_values(&parent_document, &parsed) {
                if let Bson::Document(inner) = &value {
                    if let Ok(reference) = inner.get_str("reference") {
                        let Some((reference_type, reference_id)) = reference.split_once('/')
                        else {
                            continue;
                        };
                        if Some(reference_type) != target.resource_type.as_deref() {
                            continue;
                        }
                        if !reference_parents.contains_key(reference_id) {
                            ordered_ids.push(reference_id.to_string());
                        }
                        reference_parents
                            .entry(reference_id.to_string())
                            .or_default()
                            .push(parent);
                        continue;
                    }
                }
                let child = arena.alloc_value(value);
                arena.attach_child(parent, child);
                children.push(child);
            }
        }

        if let (Some(target_type), false) =
            (target.resource_type.as_deref(), ordered_ids.is_empty())
        {
            self.check_scopes(target_type, caller)?;
            let documents = self.fetch_by_ids(target_type, &ordered_ids, tags).await?;
            for document in documents {
                let id = document.get_str("id").unwrap_or_default().to_string();
                let Some(matched_parents) = reference_parents.get(&id) else {
                    return Err(GraphError::OrphanedForwardMatch {
                        parent_type: parents
                            .first()
                            .and_then(|&p| arena.node(p).resource_type())
                            .unwrap_or_default()
                            .to_string(),
                        parent_ids: parent_id_list(arena, parents),
                        path: path.to_string(),
                        child_type: target_type.to_string(),
                        child_id: id,
                    }
                    .into());
                };
                let child = arena.alloc_resource(document, true);
                for &parent in matched_parents {
                    arena.attach_child(parent, child);
                }
                children.push(child);
            }
        }

        Ok(children)
    }

    // Substitutes `{ref}` with the parent reference list, translates the
    // single search-parameter pair into a store filter, fetches matches, and
    // attaches each to the parents its backreference field points at.
    #[allow(clippy::too_many_arguments)]
    async fn process_reverse_link(
        &self,
        arena: &mut EntityArena,
        parents: &[NodeId],
        params_template: &str,
        parent_type: Option<&str>,
        target: &GraphTarget,
        caller: &CallerContext,
        tags: &[String],
    ) -> DataStoreResult<Vec<NodeId>> {
        let parent_type = parent_type.ok_or(ConfigError::MissingParentResourceType)?;
        let target_type =
            target
                .resource_type
                .as_deref()
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "target.type".to_string(),
                    message: format!("reverse link '{params_template}' has an untyped target"),
                })?;

        let mut parent_lookup: HashMap<String, NodeId> = HashMap::new();
        let mut references: Vec<String> = Vec::new();
        for &parent in parents {
            if let Some(id) = arena.node(parent).id() {
                let reference = format!("{parent_type}/{id}");
                references.push(reference.clone());
                parent_lookup.insert(reference, parent);
            }
        }
        if references.is_empty() {
            return Ok(Vec::new());
        }

        let substituted = params_template.replace("{ref}", &references.join(","));
        if substituted.contains('&') {
            return Err(GraphError::MalformedLinkParams {
                params: params_template.to_string(),
            }
            .into());
        }
        let (parameter, value) =
            substituted
                .split_once('=')
                .ok_or_else(|| GraphError::MalformedLinkParams {
                    params: params_template.to_string(),
                })?;

        self.check_scopes(target_type, caller)?;
        let query = self
            .search_params
            .build_search_query(target_type, parameter, value)?;
        let query = self
            .composer
            .apply_security_filter(target_type, tags, query, false, false);
        let documents = self
            .executor
            .fetch_all(target_type, &SearchArgs::new(), query, QueryOptions::new())
            .await?;

        let backreference_field = self
            .search_params
            .field_name_for_search_parameter(target_type, parameter)
            .ok_or_else(|| ConfigError::UnmappedSearchParameter {
                resource_type: target_type.to_string(),
                parameter: parameter.to_string(),
            })?;
        let backreference_path = ParsedPath::parse(&backreference_field);

        let mut children = Vec::new();
        for document in documents {
            let document_id = document.get_str("id").unwrap_or_default().to_string();
            let mut matched: Vec<NodeId> = Vec::new();
            for value in resolve_path_values(&document, &backreference_path) {
                if let Bson::Document(inner) = &value {
                    if let Ok(reference) = inner.get_str("reference") {
                        if let Some(&parent) = parent_lookup.get(reference) {
                            if !matched.contains(&parent) {
                                matched.push(parent);
                            }
                        }
                    }
                }
            }
            if matched.is_empty() {
                return Err(GraphError::OrphanedReverseMatch {
                    target_type: target_type.to_string(),
                    target_id: document_id,
                    parameter: parameter.to_string(),
                }
                .into());
            }
            let child = arena.alloc_resource(document, true);
            for parent in matched {
                arena.attach_child(parent, child);
            }
            children.push(child);
        }
        Ok(children)
    }

    // Batched, security-filtered fetch of resources by logical id across the
    // resource type's partitions.
    async fn fetch_by_ids(
        &self,
        resource_type: &str,
        ids: &[String],
        tags: &[String],
    ) -> DataStoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = if let [id] = ids {
            doc! { "id": id }
        } else {
            doc! { "id": { "$in": ids.to_vec() } }
        };
        let query = self
            .composer
            .apply_security_filter(resource_type, tags, query, false, false);
        self.executor
            .fetch_all(resource_type, &SearchArgs::new(), query, QueryOptions::new())
            .await
    }

    fn check_scopes(
        &self,
        resource_type: &str,
        caller: &CallerContext,
    ) -> Result<(), AccessError> {
        if self.composer.resolver().has_valid_scopes(
            resource_type,
            "read",
            &caller.user,
            &caller.scope,
        ) {
            Ok(())
        } else {
            Err(AccessError::Denied {
                user: caller.user.clone(),
                resource_type: resource_type.to_string(),
            })
        }
    }
}

fn parent_id_list(arena: &EntityArena, parents: &[NodeId]) -> String {
    parents
        .iter()
        .filter_map(|&p| arena.node(p).id())
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolves a parsed forward path against a document, flattening arrays of
/// sub-objects at each step and applying the final-step filter when present.
pub(crate) fn resolve_path_values(document: &Document, path: &ParsedPath) -> Vec<Bson> {
    let mut current: Vec<Bson> = vec![Bson::Document(document.clone())];
    for segment in &path.segments {
        let mut next = Vec::new();
        for value in &current {
            collect_property(value, segment, &mut next);
        }
        current = next;
    }
    if let Some(filter) = &path.filter {
        current.retain(|value| {
            value
                .as_document()
                .is_some_and(|d| d.get_str(&filter.property) == Ok(filter.value.as_str()))
        });
    }
    current
}

fn collect_property(value: &Bson, name: &str, out: &mut Vec<Bson>) {
    match value {
        Bson::Document(document) => {
            if let Some(inner) = document.get(name) {
                flatten_into(inner, out);
            }
        }
        Bson::Array(items) => {
            for item in items {
                collect_property(item, name, out);
            }
        }
        _ => {}
    }
}

fn flatten_into(value: &Bson, out: &mut Vec<Bson>) {
    match value {
        Bson::Array(items) => out.extend(items.iter().cloned()),
        other => out.push(other.clone()),
    }
}
