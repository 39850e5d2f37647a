//! Lexer for the traversal query language using logos.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for the query language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Literals
    #[token("True")]
    #[token("true")]
    True,
    #[token("False")]
    #[token("false")]
    False,
    #[token("None")]
    #[token("null")]
    Null,

    // Identifier
    #[regex(r"[_A-Za-z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // String literal, no escapes
    #[regex(r#""[^"]*""#, |lex| unquote(lex.slice()))]
    #[regex(r#"'[^']*'"#, |lex| unquote(lex.slice()))]
    String(String),

    // Type-tagged string literal: t"2024-01-01"
    #[regex(r#"t"[^"]*""#, |lex| unquote(&lex.slice()[1..]))]
    #[regex(r#"t'[^']*'"#, |lex| unquote(&lex.slice()[1..]))]
    Tagged(String),

    // Integer literal
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Float literal
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("|")]
    Pipe,

    // Recursion markers and sub-query modifiers
    #[token("*")]
    Star,
    #[token("$")]
    Dollar,
    #[token("?")]
    Question,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
}

impl Token {
    /// Short human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::True => "'True'".to_string(),
            Token::False => "'False'".to_string(),
            Token::Null => "'None'".to_string(),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::String(s) => format!("string {:?}", s),
            Token::Tagged(s) => format!("tagged string t{:?}", s),
            Token::Int(i) => format!("integer {}", i),
            Token::Float(f) => format!("float {}", f),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Equals => "'='".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Pipe => "'|'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Dollar => "'$'".to_string(),
            Token::Question => "'?'".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
        }
    }
}

fn unquote(quoted: &str) -> String {
    quoted[1..quoted.len() - 1].to_string()
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
///
/// Unlike a skipping lexer, unrecognized input is reported: the iterator
/// yields a [`ParseError`] naming the offending text and its position.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get the source string.
    pub fn source(&self) -> &'source str {
        self.inner.source()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<SpannedToken, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next()?;
        let span: Span = self.inner.span().into();
        Some(match result {
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(()) => {
                let slice = self.inner.slice();
                let err = ParseError::new(format!("unexpected input '{}'", slice), span);
                Err(match slice.chars().next() {
                    Some('"') | Some('\'') => err.with_hint("string literal is not terminated"),
                    Some(c) if c.is_ascii_digit() || c == '-' => {
                        err.with_hint("integer literal is out of range")
                    }
                    _ => err,
                })
            }
        })
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_simple_hop() {
        assert_eq!(
            tokens("Blog(1) Blog.entry_set"),
            vec![
                Token::Ident("Blog".to_string()),
                Token::LParen,
                Token::Int(1),
                Token::RParen,
                Token::Ident("Blog".to_string()),
                Token::Dot,
                Token::Ident("entry_set".to_string()),
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            tokens(r#"True false None null "a b" 'c' -4 2.5"#),
            vec![
                Token::True,
                Token::False,
                Token::Null,
                Token::Null,
                Token::String("a b".to_string()),
                Token::String("c".to_string()),
                Token::Int(-4),
                Token::Float(2.5),
            ]
        );
    }

    #[test]
    fn test_tagged_string_beats_identifier() {
        assert_eq!(
            tokens(r#"t"2024-01-01" t 'x'"#),
            vec![
                Token::Tagged("2024-01-01".to_string()),
                Token::Ident("t".to_string()),
                Token::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_markers_and_modifiers() {
        assert_eq!(
            tokens("* $ ? + - | , ="),
            vec![
                Token::Star,
                Token::Dollar,
                Token::Question,
                Token::Plus,
                Token::Minus,
                Token::Pipe,
                Token::Comma,
                Token::Equals,
            ]
        );
    }

    #[test]
    fn test_minus_before_paren_is_modifier() {
        assert_eq!(
            tokens("-(A.b)")[..2],
            [Token::Minus, Token::LParen]
        );
    }

    #[test]
    fn test_spans() {
        let toks = tokenize("A.b(x=1)").unwrap();
        assert_eq!(toks[0].span, Span::new(0, 1));
        assert_eq!(toks[3].span, Span::new(3, 4));
        assert!(toks[2].span.touches(toks[3].span));
    }

    #[test]
    fn test_unknown_character_is_an_error() {
        let err = tokenize("Blog(1) Blog.entry_set & x").unwrap_err();
        assert_eq!(err.span, Span::new(23, 24));
        assert!(err.message.contains('&'));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize(r#"Blog(name="abc)"#).unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("string literal is not terminated"));
    }
}
