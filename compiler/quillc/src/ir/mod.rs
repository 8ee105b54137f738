//! Intermediate representation types shared across compilation stages.
pub use path_id::{NamespaceSet, PathId, PathStep, PointerKind};
pub use scope_tree::{NodeId, ScopeTree, ScopeTreeError, ScopeTreeNode};

mod path_id;
mod scope_tree;
