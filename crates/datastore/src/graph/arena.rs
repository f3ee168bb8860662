//! Entity node arena.
//!
//! Traversal builds a tree of entities whose children are attached across
//! recursive calls. Nodes live in an arena addressed by [`NodeId`] and
//! parent-child edges are id lists, so attachment is an adjacency insert
//! with no shared mutable references.

use bson::Bson;

/// Opaque arena address of an entity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One node in the traversal tree: a full resource document or a
/// non-resource sub-element.
#[derive(Debug, Clone)]
pub struct EntityNode {
    value: Bson,
    resource_type: Option<String>,
    id: Option<String>,
    include_in_output: bool,
    children: Vec<NodeId>,
}

impl EntityNode {
    /// The resource type, when this node wraps a resource document.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    /// The logical id, when this node wraps a resource document.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The wrapped document, when this node is a resource.
    pub fn document(&self) -> Option<&bson::Document> {
        self.value.as_document()
    }

    /// The raw wrapped value.
    pub fn value(&self) -> &Bson {
        &self.value
    }

    /// Whether this node belongs in the flattened output.
    pub fn include_in_output(&self) -> bool {
        self.include_in_output
    }

    /// `true` when this node wraps a resource document.
    pub fn is_resource(&self) -> bool {
        self.resource_type.is_some()
    }

    /// The attached child node ids, in attachment order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena of traversal nodes.
#[derive(Debug, Default)]
pub struct EntityArena {
    nodes: Vec<EntityNode>,
}

impl EntityArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when no nodes have been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocates a resource node.
    pub fn alloc_resource(
        &mut self,
        document: bson::Document,
        include_in_output: bool,
    ) -> NodeId {
        let resource_type = document.get_str("resourceType").ok().map(str::to_string);
        let id = document.get_str("id").ok().map(str::to_string);
        self.push(EntityNode {
            value: Bson::Document(document),
            resource_type,
            id,
            include_in_output,
            children: Vec::new(),
        })
    }

    /// Allocates a non-resource node for a resolved sub-element.
    pub fn alloc_value(&mut self, value: Bson) -> NodeId {
        self.push(EntityNode {
            value,
            resource_type: None,
            id: None,
            include_in_output: false,
            children: Vec::new(),
        })
    }

    fn push(&mut self, node: EntityNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Returns the node at the given id.
    pub fn node(&self, id: NodeId) -> &EntityNode {
        &self.nodes[id.0]
    }

    /// Attaches `child` under `parent`. Idempotent; children accumulate
    /// monotonically and are never removed.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        let children = &mut self.nodes[parent.0].children;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    /// Depth-first descendants of a node, parents before children, excluding
    /// the node itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_descendants(id, &mut out);
        out
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.node(id).children() {
            out.push(child);
            self.collect_descendants(child, out);
        }
    }
}
