use std::fmt;

/// A set of namespace tags, as declared on scope-tree branches and carried on
/// the namespace stack of a [`PathId`].
pub type NamespaceSet = ahash::HashSet<String>;

/// The kind of a single pointer hop within a [`PathId`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// A link to another object.
    Link,
    /// A property of an object.
    Property,
    /// A property defined on the link itself rather than on its target.
    LinkProperty,
}

/// A single pointer hop within a [`PathId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathStep {
    name: String,
    kind: PointerKind,
}

impl PathStep {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PointerKind {
        self.kind
    }
}

/// The canonical structural identifier of a navigation path
/// (e.g. `User.friends.name`) within a query.
///
/// A path id is an immutable value: the name of the root object set, the
/// ordered pointer hops taken from it, and a stack of opaque namespace tags
/// (innermost tag last). Namespaces are how `WITH`-bound views stay
/// "semi-detached" from the enclosing scope: a tagged path compares unequal
/// to its untagged twin until one namespace level is peeled off.
///
/// A path id may also denote the final *pointer* itself rather than its
/// target ([`PathId::is_ptr_path`]). Pointer paths never become scope tree
/// nodes; they act as sentinels during tree construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathId {
    root: String,
    steps: Vec<PathStep>,
    /// The path denotes the final pointer itself, not the pointer's target.
    ptr: bool,
    /// Namespace stack, innermost tag last.
    namespace: Vec<String>,
}

impl PathId {
    /// A path consisting of just the root object set, e.g. `User`.
    pub fn from_root(root: impl Into<String>) -> PathId {
        PathId {
            root: root.into(),
            steps: Vec::new(),
            ptr: false,
            namespace: Vec::new(),
        }
    }

    /// Extend the path with a link hop.
    pub fn link(self, name: impl Into<String>) -> PathId {
        self.extended(name, PointerKind::Link)
    }

    /// Extend the path with a property hop.
    pub fn property(self, name: impl Into<String>) -> PathId {
        self.extended(name, PointerKind::Property)
    }

    /// Extend the path with a link-property hop, reading a property of the
    /// preceding link rather than of its target object.
    pub fn link_property(self, name: impl Into<String>) -> PathId {
        self.extended(name, PointerKind::LinkProperty)
    }

    fn extended(mut self, name: impl Into<String>, kind: PointerKind) -> PathId {
        debug_assert!(!self.ptr, "cannot extend a pointer path");
        self.steps.push(PathStep {
            name: name.into(),
            kind,
        });
        self
    }

    /// Push a namespace tag onto the namespace stack.
    pub fn with_namespace(mut self, tag: impl Into<String>) -> PathId {
        self.namespace.push(tag.into());
        self
    }

    /// The variant of this path that denotes its final pointer itself.
    pub fn ptr_path(&self) -> PathId {
        debug_assert!(!self.steps.is_empty(), "a bare object set has no pointer");
        PathId {
            ptr: true,
            ..self.clone()
        }
    }

    /// Whether the path denotes a pointer rather than the pointer's target.
    pub fn is_ptr_path(&self) -> bool {
        self.ptr
    }

    /// Whether the final hop reads a property of a link.
    pub fn is_linkprop_path(&self) -> bool {
        !self.ptr
            && self
                .steps
                .last()
                .is_some_and(|step| step.kind == PointerKind::LinkProperty)
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// The namespace stack, innermost tag last.
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    /// The same path under a different namespace stack.
    pub fn replace_namespace(&self, namespace: impl Into<Vec<String>>) -> PathId {
        PathId {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    /// Remove trailing namespace tags contained in `tags`.
    ///
    /// Only the innermost end of the stack is affected: a matching tag buried
    /// under a non-matching one stays put. Idempotent.
    pub fn strip_namespace(&self, tags: &NamespaceSet) -> PathId {
        let mut stripped = self.clone();
        while stripped
            .namespace
            .last()
            .is_some_and(|tag| tags.contains(tag))
        {
            stripped.namespace.pop();
        }
        stripped
    }

    /// Enumerate the structural prefixes of this path, root first.
    ///
    /// Every prefix is produced exactly once and carries this path's
    /// namespace stack. With `include_ptr`, each prefix with at least one hop
    /// is followed by its pointer variant; consumed in reverse, the pointer
    /// sentinel therefore immediately precedes its prefix, which is what the
    /// scope tree construction keys on.
    pub fn iter_prefixes(&self, include_ptr: bool) -> impl Iterator<Item = PathId> + '_ {
        (0..=self.steps.len()).flat_map(move |n| {
            let prefix = PathId {
                root: self.root.clone(),
                steps: self.steps[..n].to_vec(),
                ptr: false,
                namespace: self.namespace.clone(),
            };
            let ptr_variant = (include_ptr && n > 0).then(|| prefix.ptr_path());
            std::iter::once(prefix).chain(ptr_variant)
        })
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}@@", self.namespace.join("@"))?;
        }
        write!(f, "({})", self.root)?;
        for step in &self.steps {
            match step.kind {
                PointerKind::LinkProperty => write!(f, "@{}", step.name)?,
                PointerKind::Link | PointerKind::Property => write!(f, ".>{}", step.name)?,
            }
        }
        if self.ptr {
            write!(f, "[ptr]")?;
        }
        Ok(())
    }
}
