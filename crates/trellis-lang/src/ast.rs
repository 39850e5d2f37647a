//! Abstract Syntax Tree types for the traversal query language.
//!
//! The AST is purely syntactic: type and relationship names are kept as
//! written and only resolved when a plan is compiled against a catalog.

use crate::span::{Span, Spanned};

/// A complete query: an object query seeding the traversal, then steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The seed.
    pub object: ObjectQuery,
    /// Traversal steps, in evaluation order. May be empty.
    pub steps: Vec<Step>,
    /// Source span.
    pub span: Span,
}

/// The object query at the head of every query.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectQuery {
    /// Entity type name.
    pub entity: Spanned<String>,
    /// How the seed set is selected.
    pub seed: Seed,
    /// Source span.
    pub span: Span,
}

/// Seed selection for an object query.
#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    /// `Type(id)`: exactly one entity.
    Id(Spanned<Literal>),
    /// `Type(kw=...)`, `Type.exclude(...)`, or bare `Type`: all entities of the
    /// type, refined by the filters in order.
    Filters(Vec<FilterCall>),
}

/// One traversal step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Whether the step was prefixed with the join marker `,`.
    pub join: bool,
    /// What the step does.
    pub kind: StepKind,
    /// Source span.
    pub span: Span,
}

/// The shape of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// A single relationship hop.
    Hop(Hop),
    /// `(..) | (..) [| (..)]*`: union of two or more branches.
    Or(Vec<Branch>),
    /// `[+-?](..)`: a gating sub-query.
    Sub {
        /// Inclusion modifier.
        modifier: Modifier,
        /// The nested hop sequence.
        branch: Branch,
    },
}

/// A parenthesized sequence of hops with no joins or nesting.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Hops, in order. Never empty.
    pub hops: Vec<Hop>,
    /// Source span, including the parentheses.
    pub span: Span,
}

/// A relationship hop: `Type.relationship(filters)?.method(args)*[*$?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Entity type the hop starts from.
    pub entity: Spanned<String>,
    /// Relationship name.
    pub relation: Spanned<String>,
    /// Refinements, in declared order.
    pub filters: Vec<FilterCall>,
    /// Recursion marker.
    pub recursion: Option<Spanned<Recursion>>,
    /// Source span.
    pub span: Span,
}

impl Hop {
    /// The `Type.relationship` label of this hop.
    pub fn label(&self) -> String {
        format!("{}.{}", self.entity.value, self.relation.value)
    }
}

/// Recursion markers on a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    /// `*`: repeat until no new entities appear.
    Repeat,
    /// `$`: repeat until a fixpoint.
    Fixpoint,
    /// `?`: zero or one traversal.
    Optional,
}

/// Sub-query inclusion modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modifier {
    /// `+`: keep the parent only if the sub-query is non-empty.
    Required,
    /// `-`: keep the parent only if the sub-query is empty.
    Excluded,
    /// `?` or no modifier: never gate.
    #[default]
    Optional,
}

/// One refinement call.
///
/// A bare group `(a=1)` has no method name; `.exclude(a=1)` and `.count(id)`
/// carry theirs.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    /// Method name, if written.
    pub method: Option<Spanned<String>>,
    /// Arguments.
    pub args: FilterArgs,
    /// Source span.
    pub span: Span,
}

/// Arguments of a refinement call.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArgs {
    /// `name=value, ...`
    Keywords(Vec<KeywordArg>),
    /// A single field name, for aggregations.
    Field(Spanned<String>),
}

/// A keyword argument.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordArg {
    /// Argument name, possibly with a lookup suffix (`headline__icontains`).
    pub name: Spanned<String>,
    /// Value.
    pub value: Spanned<Literal>,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `None` / `null`.
    Null,
    /// `True` / `False`.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Quoted string.
    String(String),
    /// Type-tagged string, e.g. `t"2024-01-01"`.
    Tagged { tag: String, value: String },
    /// `[a, b]` or `(a, b)`.
    List(Vec<Spanned<Literal>>),
}

impl Literal {
    /// Get a description of the literal kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
            Literal::Tagged { .. } => "tagged string",
            Literal::List(_) => "list",
        }
    }
}
