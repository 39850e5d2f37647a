//! Recursive descent parser for the traversal query language.
//!
//! ```text
//! query        := object_query step*
//! object_query := Type ( "(" id ")" | filters )
//! step         := ","? hop | ","? or_query | modifier? "(" hop+ ")"
//! or_query     := "(" hop+ ")" ( "|" "(" hop+ ")" )+
//! hop          := Type "." rel filters recursion?
//! filters      := filter_group? ( "." name filter_group )*
//! filter_group := "(" ( kwarg ( "," kwarg )* | name ) ")"
//! recursion    := "*" | "$" | "?"
//! modifier     := "+" | "-" | "?"
//! ```
//!
//! Filter groups, name filters and recursion markers attach only when they
//! directly follow the preceding token.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Parser for the traversal query language.
pub struct Parser<'source> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    source: &'source str,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            source,
        })
    }

    /// Parse a complete query, rejecting trailing input.
    pub fn parse_query(&mut self) -> Result<Query, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("empty query", Span::new(0, 0))
                .with_hint("a query starts with an object query, e.g. Blog(1)"));
        }

        let object = self.parse_object_query()?;
        let mut steps: Vec<Step> = Vec::new();
        let mut descended = false;

        while self.peek().is_some() {
            let step = self.parse_step(descended)?;
            if !matches!(step.kind, StepKind::Sub { .. }) {
                descended = true;
            }
            steps.push(step);
        }

        let end = steps.last().map(|s| s.span).unwrap_or(object.span);
        Ok(Query {
            span: object.span.merge(end),
            object,
            steps,
        })
    }

    /// Parse the object query.
    fn parse_object_query(&mut self) -> Result<ObjectQuery, ParseError> {
        let entity = self.expect_ident()?;
        let mut end = entity.span;

        if self.peek_is_attached(&Token::LParen, end) && self.at_id_arg() {
            self.next_token()?;
            let id = self.parse_id()?;
            let close = self.expect_token(Token::RParen)?;
            return Ok(ObjectQuery {
                span: entity.span.merge(close.span),
                seed: Seed::Id(id),
                entity,
            });
        }

        let filters = self.parse_filters(&mut end)?;
        Ok(ObjectQuery {
            span: entity.span.merge(end),
            seed: Seed::Filters(filters),
            entity,
        })
    }

    /// Whether the tokens after the current `(` form `id )`.
    fn at_id_arg(&self) -> bool {
        let is_id = matches!(
            self.peek_nth(1).map(|t| &t.token),
            Some(Token::Int(_)) | Some(Token::Ident(_)) | Some(Token::String(_))
        );
        is_id && matches!(self.peek_nth(2).map(|t| &t.token), Some(Token::RParen))
    }

    fn parse_id(&mut self) -> Result<Spanned<Literal>, ParseError> {
        let tok = self.next_token()?;
        let literal = match tok.token {
            Token::Int(i) => Literal::Int(i),
            Token::Ident(s) | Token::String(s) => Literal::String(s),
            other => {
                return Err(ParseError::new(
                    format!("expected an id, found {}", other.describe()),
                    tok.span,
                ))
            }
        };
        Ok(Spanned::new(literal, tok.span))
    }

    /// Parse one step. `descended` is whether a hop or or-query precedes it.
    fn parse_step(&mut self, descended: bool) -> Result<Step, ParseError> {
        let first = self.next_token()?;
        let start = first.span;

        let (join, lead) = if first.token == Token::Comma {
            if !descended {
                return Err(ParseError::new(
                    "join marker ',' has no previous step to join with",
                    start,
                ));
            }
            (true, self.next_token()?)
        } else {
            (false, first)
        };

        match lead.token {
            Token::Ident(name) => {
                let hop = self.parse_hop(Spanned::new(name, lead.span))?;
                Ok(Step {
                    join,
                    span: start.merge(hop.span),
                    kind: StepKind::Hop(hop),
                })
            }
            Token::Plus => self.parse_sub_query(Modifier::Required, join, start),
            Token::Minus => self.parse_sub_query(Modifier::Excluded, join, start),
            Token::Question => self.parse_sub_query(Modifier::Optional, join, start),
            Token::LParen => {
                let branch = self.parse_branch(lead.span)?;
                if !matches!(self.peek().map(|t| &t.token), Some(Token::Pipe)) {
                    if join {
                        return Err(ParseError::new("a sub-query cannot be joined", start)
                            .with_hint("remove the ',' or add another '|' branch"));
                    }
                    return Ok(Step {
                        join,
                        span: start.merge(branch.span),
                        kind: StepKind::Sub {
                            modifier: Modifier::default(),
                            branch,
                        },
                    });
                }

                let mut branches = vec![branch];
                while matches!(self.peek().map(|t| &t.token), Some(Token::Pipe)) {
                    self.next_token()?;
                    let open = self.expect_token(Token::LParen)?;
                    branches.push(self.parse_branch(open.span)?);
                }
                let end = branches.last().map(|b| b.span).unwrap_or(start);
                Ok(Step {
                    join,
                    span: start.merge(end),
                    kind: StepKind::Or(branches),
                })
            }
            other => Err(ParseError::new(
                format!("expected a step, found {}", other.describe()),
                lead.span,
            )
            .with_hint("steps look like Type.relationship, (..) | (..), or +(..)")),
        }
    }

    /// Parse `modifier "(" hop+ ")"`; the modifier is already consumed.
    fn parse_sub_query(
        &mut self,
        modifier: Modifier,
        join: bool,
        start: Span,
    ) -> Result<Step, ParseError> {
        if join {
            return Err(ParseError::new("a sub-query cannot be joined", start)
                .with_hint("remove the ',' before the sub-query"));
        }
        let open = self.expect_token(Token::LParen)?;
        let branch = self.parse_branch(open.span)?;
        Ok(Step {
            join,
            span: start.merge(branch.span),
            kind: StepKind::Sub { modifier, branch },
        })
    }

    /// Parse the hops of a parenthesized branch; the `(` is already consumed.
    fn parse_branch(&mut self, open: Span) -> Result<Branch, ParseError> {
        let mut hops = Vec::new();
        loop {
            let tok = self.next_token()?;
            match tok.token {
                Token::Ident(name) => hops.push(self.parse_hop(Spanned::new(name, tok.span))?),
                Token::RParen if !hops.is_empty() => {
                    return Ok(Branch {
                        hops,
                        span: open.merge(tok.span),
                    })
                }
                Token::RParen => {
                    return Err(ParseError::new("empty sub-query", open.merge(tok.span)))
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected a hop or ')', found {}", other.describe()),
                        tok.span,
                    )
                    .with_hint("sub-queries contain only hops; joins and nesting are not allowed"))
                }
            }
        }
    }

    /// Parse the rest of a hop after its entity name.
    fn parse_hop(&mut self, entity: Spanned<String>) -> Result<Hop, ParseError> {
        let dot = self.expect_attached(Token::Dot, entity.span)?;
        let relation = self.expect_ident()?;
        if !dot.span.touches(relation.span) {
            return Err(ParseError::new(
                "relationship name must directly follow '.'",
                relation.span,
            ));
        }

        let mut end = relation.span;
        let filters = self.parse_filters(&mut end)?;

        let recursion = match self.peek() {
            Some(tok) if end.touches(tok.span) => match tok.token {
                Token::Star => Some(Recursion::Repeat),
                Token::Dollar => Some(Recursion::Fixpoint),
                Token::Question => Some(Recursion::Optional),
                _ => None,
            },
            _ => None,
        };
        let recursion = match recursion {
            Some(marker) => {
                let tok = self.next_token()?;
                end = tok.span;
                Some(Spanned::new(marker, tok.span))
            }
            None => None,
        };

        Ok(Hop {
            span: entity.span.merge(end),
            entity,
            relation,
            filters,
            recursion,
        })
    }

    /// Parse `filter_group? ("." name filter_group)*` attached at `end`.
    fn parse_filters(&mut self, end: &mut Span) -> Result<Vec<FilterCall>, ParseError> {
        let mut filters = Vec::new();

        if self.peek_is_attached(&Token::LParen, *end) {
            let open = self.next_token()?;
            let call = self.parse_filter_group(None, open.span)?;
            *end = call.span;
            filters.push(call);
        }

        while self.peek_is_attached(&Token::Dot, *end) {
            let dot = self.next_token()?;
            let method = self.expect_ident()?;
            if !dot.span.touches(method.span) {
                return Err(ParseError::new(
                    "filter method name must directly follow '.'",
                    method.span,
                ));
            }
            if !self.peek_is_attached(&Token::LParen, method.span) {
                return Err(ParseError::new(
                    format!("expected '(' after filter method '{}'", method.value),
                    method.span,
                )
                .with_hint("steps are separated by whitespace; name filters take arguments, e.g. .exclude(a=1)"));
            }
            self.next_token()?;
            let call = self.parse_filter_group(Some(method.clone()), method.span)?;
            *end = call.span;
            filters.push(call);
        }

        Ok(filters)
    }

    /// Parse a filter group body; the `(` is already consumed.
    fn parse_filter_group(
        &mut self,
        method: Option<Spanned<String>>,
        start: Span,
    ) -> Result<FilterCall, ParseError> {
        let is_keywords = matches!(self.peek_nth(1).map(|t| &t.token), Some(Token::Equals));

        let args = if is_keywords {
            let mut kwargs = vec![self.parse_kwarg()?];
            while matches!(self.peek().map(|t| &t.token), Some(Token::Comma)) {
                self.next_token()?;
                kwargs.push(self.parse_kwarg()?);
            }
            FilterArgs::Keywords(kwargs)
        } else {
            let tok = self.next_token()?;
            match tok.token {
                Token::Ident(name) => FilterArgs::Field(Spanned::new(name, tok.span)),
                Token::RParen => {
                    return Err(ParseError::new("empty filter group", start.merge(tok.span))
                        .with_hint("pass keyword arguments, e.g. (name='x'), or a field name"))
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected keyword argument or field name, found {}", other.describe()),
                        tok.span,
                    ))
                }
            }
        };

        let close = self.expect_token(Token::RParen)?;
        Ok(FilterCall {
            method,
            args,
            span: start.merge(close.span),
        })
    }

    fn parse_kwarg(&mut self) -> Result<KeywordArg, ParseError> {
        let name = self.expect_ident()?;
        self.expect_token(Token::Equals)?;
        let value = self.parse_value()?;
        Ok(KeywordArg { name, value })
    }

    /// Parse a literal or a list written with `[..]` or `(..)`.
    fn parse_value(&mut self) -> Result<Spanned<Literal>, ParseError> {
        let opens_list = matches!(
            self.peek().map(|t| &t.token),
            Some(Token::LBracket) | Some(Token::LParen)
        );
        if !opens_list {
            return self.parse_literal();
        }

        let open = self.next_token()?;
        let mut items = vec![self.parse_literal()?];
        loop {
            let tok = self.next_token()?;
            match tok.token {
                Token::Comma => items.push(self.parse_literal()?),
                Token::RBracket | Token::RParen => {
                    return Ok(Spanned::new(Literal::List(items), open.span.merge(tok.span)))
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected ',' or end of list, found {}", other.describe()),
                        tok.span,
                    ))
                }
            }
        }
    }

    /// Parse a literal value.
    fn parse_literal(&mut self) -> Result<Spanned<Literal>, ParseError> {
        let tok = self.next_token()?;
        let literal = match tok.token {
            Token::Null => Literal::Null,
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Int(i) => Literal::Int(i),
            Token::Float(f) => Literal::Float(f),
            Token::String(s) => Literal::String(s),
            Token::Tagged(s) => Literal::Tagged {
                tag: "t".to_string(),
                value: s,
            },
            other => {
                let err = ParseError::new(
                    format!("expected literal value, found {}", other.describe()),
                    tok.span,
                );
                return Err(match other {
                    Token::Ident(_) => err.with_hint("quote string values"),
                    _ => err,
                });
            }
        };

        Ok(Spanned::new(literal, tok.span))
    }

    /// Expect and consume an identifier.
    fn expect_ident(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected identifier, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    /// Expect and consume a specific token.
    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", expected.describe(), tok.token.describe()),
                tok.span,
            ))
        }
    }

    /// Expect a token that directly follows `prev`.
    fn expect_attached(&mut self, expected: Token, prev: Span) -> Result<SpannedToken, ParseError> {
        let tok = self.expect_token(expected)?;
        if prev.touches(tok.span) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("unexpected whitespace before {}", tok.token.describe()),
                Span::new(prev.end, tok.span.start),
            ))
        }
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&SpannedToken> {
        self.tokens.get(self.pos + n)
    }

    fn peek_is_attached(&self, token: &Token, prev: Span) -> bool {
        self.peek()
            .map(|t| &t.token == token && prev.touches(t.span))
            .unwrap_or(false)
    }

    /// Get the next token or error if EOF.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(tok.clone())
            }
            None => Err(ParseError::new(
                "unexpected end of input",
                Span::new(self.source.len(), self.source.len()),
            )),
        }
    }
}

/// Parse a source string into a query.
pub fn parse(source: &str) -> Result<Query, ParseError> {
    Parser::new(source)?.parse_query()
}
