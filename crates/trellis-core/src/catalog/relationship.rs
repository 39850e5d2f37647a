//! Relationship declarations.
//!
//! A relationship's kind is fixed when it is declared, so traversal switches
//! on [`RelationKind`] instead of inspecting accessors at runtime.

use std::fmt;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::Error;
use crate::query::{Edge, StepContext};

/// An association relation linking two entity types many-to-many.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Association relation name.
    pub table: String,
    /// Column holding the id of the side traversal starts from.
    pub own_column: String,
    /// Column holding the id of the side traversal arrives at.
    pub other_column: String,
}

impl Association {
    /// Create an association.
    pub fn new(
        table: impl Into<String>,
        own_column: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            own_column: own_column.into(),
            other_column: other_column.into(),
        }
    }

    /// The same association traversed from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            own_column: self.other_column.clone(),
            other_column: self.own_column.clone(),
        }
    }
}

/// A relationship that computes its own outputs.
///
/// Implementations receive every input entity of the step at once and must
/// batch their own fetches. Each returned edge carries the id of the input
/// that produced it.
pub trait CustomRelation: Send + Sync {
    /// Traverse from all inputs at once.
    fn traverse(&self, inputs: &[Entity], ctx: &StepContext<'_>) -> Result<Vec<Edge>, Error>;

    /// Check the relationship against the catalog when it is frozen.
    ///
    /// `has_type` reports whether a type name resolves.
    fn validate(&self, has_type: &dyn Fn(&str) -> bool) -> Result<(), String> {
        let _ = has_type;
        Ok(())
    }
}

struct FnRelation<F>(F);

impl<F> CustomRelation for FnRelation<F>
where
    F: Fn(&[Entity], &StepContext<'_>) -> Result<Vec<Edge>, Error> + Send + Sync,
{
    fn traverse(&self, inputs: &[Entity], ctx: &StepContext<'_>) -> Result<Vec<Edge>, Error> {
        (self.0)(inputs, ctx)
    }
}

/// How a relationship is traversed.
#[derive(Clone)]
pub enum RelationKind {
    /// Foreign key on the source row points at one target.
    ForwardSingle { foreign_key: String },
    /// Foreign key on the target row points back at one source (one-to-one).
    ReverseSingle { foreign_key: String },
    /// Many-to-many through an association relation, either direction.
    ForwardMulti { association: Association },
    /// Foreign key on many target rows points back at the source (one-to-many).
    ReverseMulti { foreign_key: String },
    /// Computed by a function.
    Custom(Arc<dyn CustomRelation>),
}

impl RelationKind {
    /// Short name of the kind for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            RelationKind::ForwardSingle { .. } => "forward_single",
            RelationKind::ReverseSingle { .. } => "reverse_single",
            RelationKind::ForwardMulti { .. } => "many_to_many",
            RelationKind::ReverseMulti { .. } => "reverse_multi",
            RelationKind::Custom(_) => "custom",
        }
    }

    /// Whether traversal requires an explicit allow-list entry.
    pub fn is_custom(&self) -> bool {
        matches!(self, RelationKind::Custom(_))
    }
}

impl fmt::Debug for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::ForwardSingle { foreign_key } => f
                .debug_struct("ForwardSingle")
                .field("foreign_key", foreign_key)
                .finish(),
            RelationKind::ReverseSingle { foreign_key } => f
                .debug_struct("ReverseSingle")
                .field("foreign_key", foreign_key)
                .finish(),
            RelationKind::ForwardMulti { association } => f
                .debug_struct("ForwardMulti")
                .field("association", association)
                .finish(),
            RelationKind::ReverseMulti { foreign_key } => f
                .debug_struct("ReverseMulti")
                .field("foreign_key", foreign_key)
                .finish(),
            RelationKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A named relationship declared on an entity type.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Relationship name, unique within the source type.
    pub name: String,
    /// Qualified source type; filled in when the relationship is added to a catalog.
    pub source: String,
    /// Target type name, qualified or a shortcut.
    pub target: String,
    /// Traversal kind.
    pub kind: RelationKind,
}

impl Relationship {
    /// Create a relationship of any kind.
    pub fn new(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            target: target.into(),
            kind,
        }
    }

    /// Foreign key on the source row (`Entry.blog`).
    pub fn forward_single(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ForwardSingle {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// Unique foreign key on the target row (`User.profile`).
    pub fn reverse_single(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ReverseSingle {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// Foreign key on many target rows (`Blog.entry_set`).
    pub fn reverse_multi(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ReverseMulti {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// Many-to-many through an association (`Entry.authors`).
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        association: Association,
    ) -> Self {
        Self::new(name, target, RelationKind::ForwardMulti { association })
    }

    /// Computed by a closure.
    pub fn custom<F>(name: impl Into<String>, target: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Entity], &StepContext<'_>) -> Result<Vec<Edge>, Error> + Send + Sync + 'static,
    {
        Self::new(name, target, RelationKind::Custom(Arc::new(FnRelation(f))))
    }

    /// Computed by a [`CustomRelation`] implementation.
    pub fn custom_relation(
        name: impl Into<String>,
        target: impl Into<String>,
        relation: impl CustomRelation + 'static,
    ) -> Self {
        Self::new(name, target, RelationKind::Custom(Arc::new(relation)))
    }

    /// Rename the relationship.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `Source.name` label for logs.
    pub fn label(&self) -> String {
        if self.source.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.source, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_reversed() {
        let assoc = Association::new("blog__Entry_authors", "entry_id", "author_id");
        let rev = assoc.reversed();
        assert_eq!(rev.own_column, "author_id");
        assert_eq!(rev.other_column, "entry_id");
        assert_eq!(rev.reversed(), assoc);
    }

    #[test]
    fn test_label_and_kind() {
        let mut rel = Relationship::reverse_multi("entry_set", "Entry", "blog_id");
        assert_eq!(rel.label(), "entry_set");
        rel.source = "blog__Blog".to_string();
        assert_eq!(rel.label(), "blog__Blog.entry_set");
        assert_eq!(rel.kind.name(), "reverse_multi");
        assert!(!rel.kind.is_custom());

        let custom = Relationship::custom("none", "Entry", |_, _| Ok(Vec::new()));
        assert!(custom.kind.is_custom());
        assert_eq!(format!("{:?}", custom.kind), "Custom(..)");
    }
}
