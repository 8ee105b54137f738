use std::fmt;

use ahash::{HashSet, HashSetExt};
use indexmap::IndexSet;
use itertools::Itertools;
use la_arena::{Arena, Idx};

use super::path_id::{NamespaceSet, PathId};

/// The unique id of a node in a [`ScopeTree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(Idx<ScopeTreeNode>);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{}", u32::from(self.0.into_raw()))
    }
}

/// A structural violation of the scope tree.
///
/// These are programmer errors: the tree is a deterministic algebraic data
/// structure, so every failure indicates a bug in the calling compilation
/// stage and must surface rather than be swallowed.
#[derive(Debug, thiserror::Error)]
pub enum ScopeTreeError {
    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("cannot collapse the root node")]
    CollapseRoot,
}

/// A node of the query scope tree.
///
/// Path nodes carry the [`PathId`] they bind; branch and fence nodes group
/// their children without binding a path themselves.
#[derive(Debug, Clone)]
pub struct ScopeTreeNode {
    /// Node path id, or `None` for branch and fence nodes.
    path_id: Option<PathId>,
    /// Whether the subtree represents an aggregated (set-valued) argument.
    fenced: bool,
    /// Whether this node represents an optional path.
    optional: bool,
    /// Whether the subtree represents a scope that must not affect parents.
    protect_parent: bool,
    children: IndexSet<NodeId>,
    /// Namespaces declared by this branch.
    ///
    /// When a path node is pulled up from this branch and its namespace
    /// matches anything in here, the namespace is stripped. This implements
    /// the "semi-detached" semantics of views declared in a `WITH` block.
    namespaces: NamespaceSet,
    parent: Option<NodeId>,
}

impl ScopeTreeNode {
    fn new(path_id: Option<PathId>, fenced: bool) -> Self {
        Self {
            path_id,
            fenced,
            optional: false,
            protect_parent: false,
            children: IndexSet::new(),
            namespaces: NamespaceSet::new(),
            parent: None,
        }
    }

    pub fn path_id(&self) -> Option<&PathId> {
        self.path_id.as_ref()
    }

    pub fn is_fenced(&self) -> bool {
        self.fenced
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn protects_parent(&self) -> bool {
        self.protect_parent
    }

    pub fn namespaces(&self) -> &NamespaceSet {
        &self.namespaces
    }

    /// The label used by the pretty-printers.
    pub fn name(&self) -> String {
        match &self.path_id {
            Some(path_id) if self.optional => format!("{path_id} [OPT]"),
            Some(path_id) => path_id.to_string(),
            None if self.fenced => "FENCE".to_owned(),
            None => "BRANCH".to_owned(),
        }
    }
}

/// The query scope tree: it records, for every navigation path that appears
/// in a query, the lexical region in which the path is *visible* (bound to a
/// specific iteration) versus where it is a free reference.
///
/// The tree is built incrementally: each navigation occurrence is decomposed
/// into a small *candidate* subtree ([`ScopeTree::attach_path`]) which is
/// then folded into the growing tree ([`ScopeTree::attach_subtree`]),
/// deduplicating paths that are already in scope and hoisting unfenced paths
/// to the scope they belong to. *Fences* mark aggregation boundaries that
/// visibility lookups and unnesting never cross downward.
///
/// ## Example
///
/// After attaching `User.name` at the root and `User.friends` inside a
/// fenced (aggregating) argument, the tree pretty-prints as:
///
/// ```text
/// "FENCE": {
///     "(User)",
///     "(User).>name",
///     "FENCE": {
///         "(User).>friends"
///     }
/// }
/// ```
///
/// Nodes live in an arena and are addressed by [`NodeId`]; a node owns its
/// children, the parent link is a plain back-reference, and a node has at
/// most one parent at any instant. Detached nodes (candidate roots, merge
/// leftovers) stay in the arena until the tree itself is dropped: the tree
/// is a per-query compile-time artifact, so nothing is freed early.
pub struct ScopeTree {
    nodes: Arena<ScopeTreeNode>,
    root: NodeId,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// Create a tree consisting of a single empty fenced root.
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let root = NodeId(nodes.alloc(ScopeTreeNode::new(None, true)));
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, node: ScopeTreeNode) -> NodeId {
        NodeId(self.nodes.alloc(node))
    }

    /// Create a detached fence, e.g. the root of a candidate subtree.
    pub fn new_fence(&mut self) -> NodeId {
        self.alloc(ScopeTreeNode::new(None, true))
    }

    /// Create a detached branch.
    pub fn new_branch(&mut self) -> NodeId {
        self.alloc(ScopeTreeNode::new(None, false))
    }

    pub fn set_optional(&mut self, node: NodeId, optional: bool) {
        self.nodes[node.0].optional = optional;
    }

    pub fn set_protect_parent(&mut self, node: NodeId, protect_parent: bool) {
        self.nodes[node.0].protect_parent = protect_parent;
    }

    /// Declare a namespace on this branch, marking paths underneath it as
    /// semi-detached from the enclosing scope for that tag.
    pub fn add_namespace(&mut self, node: NodeId, tag: impl Into<String>) {
        self.nodes[node.0].namespaces.insert(tag.into());
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// The node's ancestors, including itself, ending at its root.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |n| self.nodes[n.0].parent)
    }

    /// The node's ancestors, not including itself.
    pub fn strict_ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[node.0].parent, move |n| self.nodes[n.0].parent)
    }

    /// The node's ancestors, including itself, each paired with the set of
    /// namespaces declared between the node and that ancestor inclusive.
    pub fn ancestors_and_namespaces(
        &self,
        node: NodeId,
    ) -> impl Iterator<Item = (NodeId, NamespaceSet)> + '_ {
        let mut cursor = Some(node);
        let mut namespaces = NamespaceSet::new();
        std::iter::from_fn(move || {
            let node = cursor?;
            namespaces.extend(self.nodes[node.0].namespaces.iter().cloned());
            cursor = self.nodes[node.0].parent;
            Some((node, namespaces.clone()))
        })
    }

    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node.0].children.iter().copied()
    }

    /// The node's children that carry a path id.
    pub fn path_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node)
            .filter(move |&child| self.nodes[child.0].path_id.is_some())
    }

    /// The node's descendants, including itself, depth-first with children
    /// before parents.
    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.strict_descendants(node).chain(std::iter::once(node))
    }

    /// The node's descendants, not including itself, depth-first with
    /// children before parents.
    ///
    /// The iterator keeps its own cursor stack; callers that mutate the tree
    /// while walking must collect the ids first.
    pub fn strict_descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        StrictDescendants {
            tree: self,
            skip_fenced: false,
            stack: vec![(node, 0)],
        }
    }

    /// The node's descendants, including itself, that carry a path id.
    pub fn path_descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(node)
            .filter(move |&d| self.nodes[d.0].path_id.is_some())
    }

    /// The node's strict descendants reachable without entering a fence.
    pub fn strict_unfenced_descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        StrictDescendants {
            tree: self,
            skip_fenced: true,
            stack: vec![(node, 0)],
        }
    }

    /// The namespaces declared by the node and all of its descendants.
    pub fn descendant_namespaces(&self, node: NodeId) -> NamespaceSet {
        let mut namespaces = NamespaceSet::new();
        for descendant in self.descendants(node) {
            namespaces.extend(self.nodes[descendant.0].namespaces.iter().cloned());
        }
        namespaces
    }

    /// The nearest enclosing fence: the node itself if fenced, otherwise
    /// [`ScopeTree::parent_fence`].
    pub fn fence(&self, node: NodeId) -> Option<NodeId> {
        if self.nodes[node.0].fenced {
            Some(node)
        } else {
            self.parent_fence(node)
        }
    }

    /// The nearest strict ancestor fence.
    pub fn parent_fence(&self, node: NodeId) -> Option<NodeId> {
        self.strict_ancestors(node)
            .find(|&ancestor| self.nodes[ancestor.0].fenced)
    }

    /// Whether no fence lies strictly between `descendant` and `top`.
    ///
    /// `top` itself counts as the boundary even when it is a plain branch,
    /// so the root of a candidate subtree acts as an implicit fence during a
    /// merge.
    fn unfenced_within(&self, descendant: NodeId, top: NodeId) -> bool {
        for ancestor in self.strict_ancestors(descendant) {
            if ancestor == top {
                return true;
            }
            if self.nodes[ancestor.0].fenced {
                return false;
            }
        }
        false
    }

    /// The first unfenced descendant with exactly the given path id.
    pub fn find_descendant(&self, node: NodeId, path_id: &PathId) -> Option<NodeId> {
        self.strict_unfenced_descendants(node)
            .find(|&d| self.nodes[d.0].path_id.as_ref() == Some(path_id))
    }

    /// Attach a child node to this node.
    ///
    /// This is a low-level operation: the child is detached from its current
    /// parent, if any, and reparented without any visibility or duplicate
    /// checks. For safe tree modification use [`ScopeTree::attach_subtree`].
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(
            self.ancestors(parent).all(|ancestor| ancestor != child),
            "attaching {child} to {parent} would create a cycle"
        );
        if self.nodes[child.0].parent == Some(parent) {
            return;
        }
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(child);
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.shift_remove(&node);
        }
    }

    /// Create and attach an empty fenced node.
    pub fn attach_fence(&mut self, node: NodeId) -> NodeId {
        let fence = self.new_fence();
        self.attach_child(node, fence);
        fence
    }

    /// Attach a scope subtree representing `path_id` at this node.
    ///
    /// The path is decomposed into a candidate subtree holding one path node
    /// per structural prefix, then folded in via
    /// [`ScopeTree::attach_subtree`]. Pointer sentinels in the prefix walk
    /// flag hops whose node must not become the parent of the shorter
    /// prefixes; link-property paths in particular attach as siblings of the
    /// object they annotate, since they share the same iteration.
    #[tracing::instrument(skip_all, level = "trace", fields(path = %path_id))]
    pub fn attach_path(&mut self, node: NodeId, path_id: &PathId) {
        let wrapper = self.new_fence();
        let mut parent = wrapper;
        let mut is_lprop = false;

        let prefixes: Vec<PathId> = path_id.iter_prefixes(true).collect();
        for prefix in prefixes.into_iter().rev() {
            if prefix.is_ptr_path() {
                is_lprop = true;
                continue;
            }

            let descend = !(is_lprop || prefix.is_linkprop_path());
            let new_child = self.alloc(ScopeTreeNode::new(Some(prefix), false));
            self.attach_child(parent, new_child);

            if descend {
                parent = new_child;
            }
            is_lprop = false;
        }

        self.attach_subtree(node, wrapper);
    }

    /// Fold an already-built candidate subtree into this node.
    ///
    /// The candidate may be modified: every path node in it is either
    /// discarded because the destination already has it in scope, consumed
    /// by promoting an equivalent unfenced path inside the destination, or
    /// attached here as part of a top-level remainder. An unfenced path (no
    /// fence between it and the candidate root, which itself counts as a
    /// fence even when it is a plain branch) that cannot be promoted is
    /// surfaced to the top of the candidate first, so it ends up bound at
    /// this level rather than buried in an interior branch. Trailing
    /// namespace tags declared by the candidate's branches are stripped from
    /// the path ids it contributes, which is what re-unifies semi-detached
    /// views with the enclosing scope.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn attach_subtree(&mut self, dest: NodeId, node: NodeId) {
        let node = if self.nodes[node.0].path_id.is_some() {
            // Wrap the path node so the loop below traverses uniformly.
            let wrapper = self.new_fence();
            self.attach_child(wrapper, node);
            wrapper
        } else {
            node
        };

        let dns = self.descendant_namespaces(node);

        // The loop reparents and destroys nodes mid-walk, so it runs over a
        // snapshot of the candidate's descendants.
        let descendants: Vec<NodeId> = self.strict_descendants(node).collect();
        for descendant in descendants {
            if let Some(path_id) = self.nodes[descendant.0].path_id.clone() {
                if self.find_visible_in(dest, &path_id, &dns).is_some() {
                    // This path is already present in the tree, discard.
                    self.destroy(descendant);
                    continue;
                }
                if self.unfenced_within(descendant, node) {
                    // Unfenced path, unnest in ancestors.
                    let probe = path_id.strip_namespace(&dns);
                    if self.unnest_descendants(dest, &probe).is_some() {
                        continue;
                    }
                    // No outer binding to fuse with: surface the path at the
                    // top of the candidate so it attaches directly below.
                    self.attach_child(node, descendant);
                }
            }

            if self.nodes[descendant.0].parent == Some(node) {
                // Reached the top of the subtree, attach whatever remains.
                let remainder: Vec<NodeId> = self.path_descendants(descendant).collect();
                for path_node in remainder {
                    let stripped = self.nodes[path_node.0]
                        .path_id
                        .take()
                        .map(|path_id| path_id.strip_namespace(&dns));
                    self.nodes[path_node.0].path_id = stripped;
                }
                self.attach_child(dest, descendant);
            }
        }

        #[cfg(feature = "debug_assertions")]
        self.assert_invariants();
    }

    /// Remove the given subtree from this node.
    pub fn remove_subtree(&mut self, parent: NodeId, child: NodeId) -> Result<(), ScopeTreeError> {
        if self.nodes[child.0].parent != Some(parent) {
            return Err(ScopeTreeError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(())
    }

    /// Remove this node from the tree, leaving it as the root of an
    /// independent subtree. A no-op on detached nodes.
    pub fn destroy(&mut self, node: NodeId) {
        self.detach(node);
    }

    /// Scan the unfenced descendants for paths exactly equal to `path_id`;
    /// keep the first, destroy the rest, and reparent the survivor directly
    /// under this node.
    ///
    /// This promotes an unfenced path to its correct scope: a path first
    /// recorded deep within a non-fence subtree is hoisted up so that
    /// subsequent merges see it as visible from here. Returns the promoted
    /// node, or `None` when nothing matched.
    pub fn unnest_descendants(&mut self, node: NodeId, path_id: &PathId) -> Option<NodeId> {
        let matches: Vec<NodeId> = self
            .strict_unfenced_descendants(node)
            .filter(|&d| self.nodes[d.0].path_id.as_ref() == Some(path_id))
            .collect();

        let (&survivor, rest) = matches.split_first()?;
        for &duplicate in rest {
            self.destroy(duplicate);
        }
        self.attach_child(node, survivor);
        Some(survivor)
    }

    /// Remove the node, folding its children back into its parent.
    ///
    /// The children are moved onto a transient fenced wrapper which is then
    /// merged via [`ScopeTree::attach_subtree`], so visibility and unnesting
    /// are re-evaluated in the enclosing scope whether the collapsed node
    /// was a fence or a plain branch.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn collapse(&mut self, node: NodeId) -> Result<(), ScopeTreeError> {
        let Some(parent) = self.nodes[node.0].parent else {
            return Err(ScopeTreeError::CollapseRoot);
        };
        self.detach(node);

        let wrapper = self.new_fence();
        let children: Vec<NodeId> = self.children(node).collect();
        for child in children {
            self.attach_child(wrapper, child);
        }

        self.attach_subtree(parent, wrapper);
        Ok(())
    }

    /// Find the node binding `path_id`, looking at each ancestor and its
    /// direct children in turn.
    pub fn find_visible(&self, origin: NodeId, path_id: &PathId) -> Option<NodeId> {
        self.find_visible_in(origin, path_id, &NamespaceSet::new())
    }

    /// [`ScopeTree::find_visible`] with an extra set of namespace tags under
    /// which path ids compare equal modulo one trailing tag.
    ///
    /// Namespaces declared on the ancestors between `origin` and the
    /// candidate node accumulate into the comparison as the walk moves up.
    pub fn find_visible_in(
        &self,
        origin: NodeId,
        path_id: &PathId,
        namespaces: &NamespaceSet,
    ) -> Option<NodeId> {
        let mut namespaces = namespaces.clone();
        let mut cursor = Some(origin);
        while let Some(node) = cursor {
            namespaces.extend(self.nodes[node.0].namespaces.iter().cloned());

            if paths_equal(self.nodes[node.0].path_id.as_ref(), path_id, &namespaces) {
                return Some(node);
            }
            for &child in &self.nodes[node.0].children {
                if paths_equal(self.nodes[child.0].path_id.as_ref(), path_id, &namespaces) {
                    return Some(child);
                }
            }

            cursor = self.nodes[node.0].parent;
        }
        None
    }

    /// The path ids visible from this node: its ancestors' paths plus, for
    /// every branch ancestor, the paths of that ancestor's direct children.
    pub fn get_all_visible(&self, node: NodeId) -> HashSet<PathId> {
        let mut paths = HashSet::new();
        for ancestor in self.ancestors(node) {
            let data = &self.nodes[ancestor.0];
            if let Some(path_id) = &data.path_id {
                paths.insert(path_id.clone());
            } else {
                for &child in &data.children {
                    if let Some(path_id) = &self.nodes[child.0].path_id {
                        paths.insert(path_id.clone());
                    }
                }
            }
        }
        paths
    }

    /// Whether no path is recorded at or below this node.
    pub fn is_empty(&self, node: NodeId) -> bool {
        self.nodes[node.0].path_id.is_none()
            && self.children(node).all(|child| self.is_empty(child))
    }

    /// Render the subtree deterministically: children sorted by their
    /// rendering, empty non-path branches omitted.
    pub fn pformat(&self, node: NodeId) -> String {
        let data = &self.nodes[node.0];
        if !data.children.is_empty() {
            let mut child_formats: Vec<String> = self
                .children(node)
                .map(|child| self.pformat(child))
                .filter(|rendered| !rendered.is_empty())
                .collect();
            if !child_formats.is_empty() {
                child_formats.sort();
                let children = textwrap::indent(&child_formats.iter().join(",\n"), "    ");
                return format!("\"{}\": {{\n{children}\n}}", data.name());
            }
        }

        if data.path_id.is_some() {
            format!("\"{}\"", data.name())
        } else {
            String::new()
        }
    }

    /// Render the subtree with node ids for debugging; keeps empty branches
    /// and the insertion order of children.
    pub fn pdebugformat(&self, node: NodeId) -> String {
        let data = &self.nodes[node.0];
        let label = format!("{} #{}", data.name(), u32::from(node.0.into_raw()));
        if data.children.is_empty() {
            format!("\"{label}\"")
        } else {
            let children = textwrap::indent(
                &self
                    .children(node)
                    .map(|child| self.pdebugformat(child))
                    .join(",\n"),
                "    ",
            );
            format!("\"{label}\": {{\n{children}\n}}")
        }
    }

    /// Check parent/child coherence, single parenthood and acyclicity for
    /// every node in the arena, detached subtrees included.
    ///
    /// Quadratic in the worst case; production builds only run it when the
    /// `debug_assertions` feature is enabled.
    pub fn assert_invariants(&self) {
        for (idx, data) in self.nodes.iter() {
            let id = NodeId(idx);
            if let Some(parent) = data.parent {
                assert!(
                    self.nodes[parent.0].children.contains(&id),
                    "{id} points at {parent}, which does not own it"
                );
            }
            for &child in &data.children {
                assert_eq!(
                    self.nodes[child.0].parent,
                    Some(id),
                    "{child} is owned by {id} but points elsewhere"
                );
            }

            let mut hops = 0;
            let mut cursor = data.parent;
            while let Some(ancestor) = cursor {
                assert!(ancestor != id, "{id} is its own ancestor");
                hops += 1;
                assert!(hops <= self.nodes.len(), "unterminated parent chain at {id}");
                cursor = self.nodes[ancestor.0].parent;
            }
        }
    }
}

/// Backward-compatible aliases retained for older call sites.
impl ScopeTree {
    /// Alias of [`ScopeTree::attach_fence`].
    pub fn add_fence(&mut self, node: NodeId) -> NodeId {
        self.attach_fence(node)
    }

    /// Alias of [`ScopeTree::attach_path`].
    pub fn add_path(&mut self, node: NodeId, path_id: &PathId) {
        self.attach_path(node, path_id);
    }

    /// Alias of [`ScopeTree::attach_subtree`].
    pub fn attach_branch(&mut self, dest: NodeId, node: NodeId) {
        self.attach_subtree(dest, node);
    }

    /// Alias of [`ScopeTree::remove_subtree`].
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ScopeTreeError> {
        self.remove_subtree(parent, child)
    }

    /// Alias of [`ScopeTree::unnest_descendants`].
    pub fn unnest_descendant(&mut self, node: NodeId, path_id: &PathId) -> Option<NodeId> {
        self.unnest_descendants(node, path_id)
    }

    /// Alias of [`ScopeTree::collapse`].
    pub fn unfence(&mut self, node: NodeId) -> Result<(), ScopeTreeError> {
        self.collapse(node)
    }
}

impl std::ops::Index<NodeId> for ScopeTree {
    type Output = ScopeTreeNode;

    fn index(&self, node: NodeId) -> &Self::Output {
        &self.nodes[node.0]
    }
}

impl fmt::Debug for ScopeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pdebugformat(self.root))
    }
}

/// Depth-first walk yielding children before parents, excluding the node the
/// walk started from. With `skip_fenced`, fenced children are neither
/// yielded nor entered.
struct StrictDescendants<'t> {
    tree: &'t ScopeTree,
    skip_fenced: bool,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for StrictDescendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let &(node, cursor) = self.stack.last()?;
            let child = self.tree.nodes[node.0].children.get_index(cursor).copied();
            match child {
                Some(child) => {
                    self.stack.last_mut()?.1 += 1;
                    if !(self.skip_fenced && self.tree.nodes[child.0].fenced) {
                        self.stack.push((child, 0));
                    }
                }
                None => {
                    self.stack.pop();
                    if self.stack.is_empty() {
                        // The walk's starting node is not its own descendant.
                        return None;
                    }
                    return Some(node);
                }
            }
        }
    }
}

/// Path id equality modulo a single trailing namespace tag.
///
/// When `namespaces` is non-empty and the outermost tag of either id is a
/// member, that one tag is peeled off that id before comparing. Deliberately
/// not a full quotient: a semi-detached view hides its paths from exactly
/// one enclosing scope, so at most one level is stripped per comparison and
/// deeper accumulation is the caller's job.
fn paths_equal(lhs: Option<&PathId>, rhs: &PathId, namespaces: &NamespaceSet) -> bool {
    fn strip_one(path_id: &PathId, namespaces: &NamespaceSet) -> PathId {
        match path_id.namespace().last() {
            Some(tag) if namespaces.contains(tag) => {
                let stack = path_id.namespace();
                path_id.replace_namespace(stack[..stack.len() - 1].to_vec())
            }
            _ => path_id.clone(),
        }
    }

    let Some(lhs) = lhs else {
        return false;
    };
    if namespaces.is_empty() {
        return lhs == rhs;
    }
    strip_one(lhs, namespaces) == strip_one(rhs, namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(tags: &[&str]) -> NamespaceSet {
        tags.iter().map(|tag| (*tag).to_owned()).collect()
    }

    #[test]
    fn path_equality_is_reflexive_and_symmetric_under_stripping() {
        let plain = PathId::from_root("User").property("name");
        let tagged = plain.clone().with_namespace("v1");
        let ns = tags(&["v1"]);

        assert!(paths_equal(Some(&plain), &plain, &ns));
        assert!(paths_equal(Some(&tagged), &plain, &ns));
        assert!(paths_equal(Some(&plain), &tagged, &ns));
        assert!(!paths_equal(Some(&tagged), &plain, &NamespaceSet::new()));
        assert!(!paths_equal(None, &plain, &ns));
    }

    #[test]
    fn path_equality_ignores_unrelated_tags() {
        let plain = PathId::from_root("User");
        let tagged = plain.clone().with_namespace("v1");

        assert!(paths_equal(Some(&tagged), &plain, &tags(&["v1", "other"])));
        assert!(!paths_equal(Some(&tagged), &plain, &tags(&["other"])));
    }

    #[test]
    fn path_equality_strips_a_single_level_only() {
        let plain = PathId::from_root("User");
        let double = plain.clone().with_namespace("v1").with_namespace("v2");

        // Both tags are in the set, but only the outermost is peeled.
        assert!(!paths_equal(Some(&double), &plain, &tags(&["v1", "v2"])));
        let single = plain.clone().with_namespace("v1");
        assert!(paths_equal(Some(&double), &single, &tags(&["v2"])));
    }

    #[test]
    fn strict_descendants_yield_children_before_parents_exactly_once() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let outer = tree.new_branch();
        tree.attach_child(root, outer);
        let inner = tree.new_branch();
        tree.attach_child(outer, inner);
        let fence = tree.attach_fence(outer);
        let under_fence = tree.new_branch();
        tree.attach_child(fence, under_fence);

        let walk: Vec<NodeId> = tree.strict_descendants(root).collect();
        assert_eq!(walk, [inner, under_fence, fence, outer]);

        let unfenced: Vec<NodeId> = tree.strict_unfenced_descendants(root).collect();
        assert_eq!(unfenced, [inner, outer]);
    }

    #[test]
    fn fence_lookup_stops_at_nearest_ancestor() {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        let fence = tree.attach_fence(root);
        let branch = tree.new_branch();
        tree.attach_child(fence, branch);

        assert_eq!(tree.fence(branch), Some(fence));
        assert_eq!(tree.fence(fence), Some(fence));
        assert_eq!(tree.parent_fence(fence), Some(root));
        assert_eq!(tree.parent_fence(root), None);
    }
}
