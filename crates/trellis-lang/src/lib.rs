//! Trellis Query Language
//!
//! This crate provides the lexer and parser for the Trellis traversal query
//! language, a compact notation for walking a graph of typed entities along
//! named relationships.
//!
//! # Query Language Syntax
//!
//! ## Object queries
//!
//! ```text
//! Blog(1)                              one entity by id
//! Entry(rating__gte=3)                 filtered set of entities
//! Entry.exclude(headline__icontains='draft')
//! ```
//!
//! ## Steps
//!
//! ```text
//! Blog(1) Blog.entry_set Entry.authors        hop, then hop from the results
//! Blog(1) Blog.entry_set, Blog.owner          join: merge into the same level
//! Entry(1) Entry.blog(name='x').count(id)     filters and name filters
//! Node(1) Node.children*                      repeat until no new entities
//! Blog Blog.entry_set +(Entry.authors)        keep entries with authors
//! Entry(1) (Entry.authors) | (Entry.editor)   union of branches
//! ```
//!
//! Parsing is purely syntactic; type and relationship names are resolved when
//! the query is compiled against a catalog.
//!
//! # Usage
//!
//! ```rust
//! use trellis_lang::parse;
//!
//! let query = parse("Blog(1) Blog.entry_set Entry.authors").unwrap();
//! assert_eq!(query.steps.len(), 2);
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

// Re-export main types
pub use ast::{
    Branch, FilterArgs, FilterCall, Hop, KeywordArg, Literal, Modifier, ObjectQuery, Query,
    Recursion, Seed, Step, StepKind,
};
pub use error::ParseError;
pub use span::{Span, Spanned};

/// Parse a source string into an AST.
///
/// # Example
///
/// ```rust
/// use trellis_lang::parse;
///
/// let query = parse("Blog(1)").unwrap();
/// assert_eq!(query.object.entity.value, "Blog");
/// ```
pub fn parse(source: &str) -> Result<Query, ParseError> {
    parser::parse(source)
}

/// Tokenize a source string (for debugging/testing).
///
/// # Example
///
/// ```rust
/// use trellis_lang::tokenize;
///
/// let tokens = tokenize("Blog(1)").unwrap();
/// assert_eq!(tokens.len(), 4);
/// ```
pub fn tokenize(source: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(source)
}
