//! Core error types.

use thiserror::Error;
use trellis_lang::ParseError;

/// Query errors.
///
/// Compile-time variants abort a query before any fetch executes; store errors
/// propagate unrecovered. A failed query never yields a partial result.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed query text.
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    /// No registered type matches the name.
    #[error("unknown entity type '{name}'")]
    UnknownType { name: String },

    /// A bare name matches more than one registered type.
    #[error("ambiguous entity type '{name}': can match {}", .candidates.join(", "))]
    AmbiguousType {
        name: String,
        candidates: Vec<String>,
    },

    /// The type declares no relationship of that name.
    #[error("unknown relationship '{relationship}' on '{entity_type}'")]
    UnknownRelationship {
        entity_type: String,
        relationship: String,
    },

    /// The relationship exists but is not on the type's allow-list.
    #[error("relationship '{relationship}' on '{entity_type}' is not traversable")]
    AccessDenied {
        entity_type: String,
        relationship: String,
    },

    /// A step cannot consume the entities it would be handed.
    #[error("type mismatch at '{step}': expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        step: String,
    },

    /// Unknown refinement method or missing/ill-shaped arguments.
    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    /// Catalog misconfiguration found while resolving a relationship.
    #[error("cannot resolve relationship '{relationship}' on '{entity_type}': {reason}")]
    UnresolvedRelationshipKind {
        entity_type: String,
        relationship: String,
        reason: String,
    },

    /// An output could not be paired with the input that produced it.
    #[error("output {entity} of '{relationship}' cannot be paired with an input entity")]
    UnresolvedSource {
        relationship: String,
        entity: String,
    },

    /// A fanout budget limit was hit.
    #[error("fanout budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Catalog lifecycle error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Fetch-time error from the store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from building and managing the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Name does not match `[_A-Za-z][A-Za-z0-9_]*`.
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// Qualified type name already registered.
    #[error("entity type '{0}' is already registered")]
    DuplicateType(String),

    /// Relationship name already declared on the type.
    #[error("relationship '{relationship}' is already declared on '{entity_type}'")]
    DuplicateRelationship {
        entity_type: String,
        relationship: String,
    },

    /// Mutation attempted after `freeze()`.
    #[error("catalog is frozen")]
    Frozen,

    /// Query attempted before `freeze()`.
    #[error("catalog is not frozen; call freeze() before running queries")]
    NotFrozen,

    /// Lifecycle operation on a type that is not registered.
    #[error("entity type '{0}' is not registered")]
    UnknownType(String),
}

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The association relation does not exist.
    #[error("unknown association '{0}'")]
    UnknownAssociation(String),

    /// Backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}
