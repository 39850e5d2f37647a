//! Entity type definitions.

/// Separator between namespace and type name in qualified names.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// A registered entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    /// Namespace (application) the type belongs to. May be empty.
    pub namespace: String,
    /// Bare type name, also usable as a shortcut when unambiguous.
    pub name: String,
    /// Externally exposed field names, in projection order.
    pub fields: Vec<String>,
    /// Abstract types are never registered.
    pub is_abstract: bool,
    /// Pinned types survive a non-forced catalog reset.
    pub pinned: bool,
}

impl EntityType {
    /// Create a new entity type.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            fields: Vec::new(),
            is_abstract: false,
            pinned: false,
        }
    }

    /// Add an exposed field.
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Add several exposed fields.
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(names.into_iter().map(Into::into));
        self
    }

    /// Mark the type as abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark the type as pinned.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// The `namespace__Name` form, or the bare name when there is no namespace.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}{}", self.namespace, NAMESPACE_SEPARATOR, self.name)
        }
    }
}

/// Check a name against `[_A-Za-z][A-Za-z0-9_]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert_eq!(EntityType::new("blog", "Entry").qualified_name(), "blog__Entry");
        assert_eq!(EntityType::new("", "Entry").qualified_name(), "Entry");
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("Entry"));
        assert!(is_valid_name("_private2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("2fast"));
        assert!(!is_valid_name("has-dash"));
        assert!(!is_valid_name("Entrée"));
    }
}
