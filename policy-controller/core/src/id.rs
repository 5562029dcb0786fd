use std::fmt;

/// The API group of Kubernetes core resources, as it appears in resource
/// metadata.
pub const CORE_GROUP: &str = "";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

/// Identifies an object (or a named section of an object) within a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub group_kind: GroupKind,
    pub namespace: Option<String>,
    pub name: String,
    pub section: Option<String>,
}

/// A reference from a policy (or an external query) to a targetable object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub section: Option<String>,
}

// === impl GroupKind ===

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// Compares groups, treating `core` and the empty string as equivalent.
    pub fn group_eq(&self, group: &str) -> bool {
        canonical_group(&self.group) == canonical_group(group)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            return self.kind.fmt(f);
        }
        write!(f, "{}.{}", self.kind, self.group)
    }
}

// === impl ObjectId ===

impl ObjectId {
    pub fn namespaced(
        group_kind: GroupKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_kind,
            namespace: Some(namespace.into()),
            name: name.into(),
            section: None,
        }
    }

    pub fn cluster(group_kind: GroupKind, name: impl Into<String>) -> Self {
        Self {
            group_kind,
            namespace: None,
            name: name.into(),
            section: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Returns the identifier of the object that owns this section.
    pub fn without_section(&self) -> Self {
        Self {
            section: None,
            ..self.clone()
        }
    }

    pub fn kind(&self) -> &str {
        &self.group_kind.kind
    }

    /// Formats the identifier as a locator, e.g. `gateway:ns/name#listener`.
    pub fn locator(&self) -> String {
        let kind = self.group_kind.kind.to_ascii_lowercase();
        let mut locator = match self.namespace.as_deref() {
            Some(ns) => format!("{kind}:{ns}/{}", self.name),
            None => format!("{kind}:{}", self.name),
        };
        if let Some(section) = self.section.as_deref() {
            locator.push('#');
            locator.push_str(section);
        }
        locator
    }

    /// Formats the identifier as `namespace/name`, or `name` for
    /// cluster-scoped objects.
    pub fn namespaced_name(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.locator().fmt(f)
    }
}

// === impl TargetRef ===

impl TargetRef {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
            section: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Whether the reference names the given kind. An empty group on the
    /// reference matches any group.
    pub fn targets_kind(&self, gk: &GroupKind) -> bool {
        self.kind == gk.kind && (self.group.is_empty() || gk.group_eq(&self.group))
    }

    pub fn matches(&self, id: &ObjectId) -> bool {
        if !self.targets_kind(&id.group_kind) || self.name != id.name {
            return false;
        }

        if let Some(ns) = self.namespace.as_deref() {
            // Cluster-scoped objects are matched regardless of the namespace
            // the reference was defaulted to.
            if id.namespace.as_deref().is_some_and(|id_ns| id_ns != ns) {
                return false;
            }
        }

        self.section == id.section
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.group.is_empty() {
            write!(f, ".{}", self.group)?;
        }
        match self.namespace.as_deref() {
            Some(ns) => write!(f, " {ns}/{}", self.name)?,
            None => write!(f, " {}", self.name)?,
        }
        if let Some(section) = self.section.as_deref() {
            write!(f, "#{section}")?;
        }
        Ok(())
    }
}

fn canonical_group(group: &str) -> &str {
    if group == "core" {
        CORE_GROUP
    } else {
        group
    }
}
