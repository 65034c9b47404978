//! Tag-query grammar.
//!
//! ```text
//! query     := '(' tag* ')' '=>' hierarchy
//! tag       := NAME (OP VALUE)?
//! OP        := '=' | '>' | '>=' | '<' | '<='
//! hierarchy := '...' | ( NAME '{' hierarchy '}' )+
//! VALUE     := quoted string literal
//! ```
//!
//! A bare tag name matches entries that carry the tag at all. Comparison
//! operators compare tag values lexicographically. The hierarchy drives
//! `xun mount`: a non-leaf name is a tag whose distinct values become the
//! children of that node, and the `...` leaf materializes the matching
//! store keys.

use std::fmt;

use crate::error::StoreError;
use crate::traits::Tags;

/// A tag comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl TagOp {
    fn symbol(&self) -> &'static str {
        match self {
            TagOp::Eq => "=",
            TagOp::Gt => ">",
            TagOp::Ge => ">=",
            TagOp::Lt => "<",
            TagOp::Le => "<=",
        }
    }
}

/// One condition of a query: a tag name, optionally constrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCondition {
    pub name: String,
    pub constraint: Option<(TagOp, String)>,
}

impl TagCondition {
    /// A bare "tag exists" condition.
    pub fn present(name: impl Into<String>) -> TagCondition {
        TagCondition {
            name: name.into(),
            constraint: None,
        }
    }

    /// A constrained condition.
    pub fn compare(
        name: impl Into<String>,
        op: TagOp,
        value: impl Into<String>,
    ) -> TagCondition {
        TagCondition {
            name: name.into(),
            constraint: Some((op, value.into())),
        }
    }

    /// True if the tag record satisfies this condition.
    pub fn matches(&self, tags: &Tags) -> bool {
        let Some(actual) = tags.get(&self.name) else {
            return false;
        };
        match &self.constraint {
            None => true,
            Some((op, expected)) => match op {
                TagOp::Eq => actual == expected,
                TagOp::Gt => actual.as_str() > expected.as_str(),
                TagOp::Ge => actual.as_str() >= expected.as_str(),
                TagOp::Lt => actual.as_str() < expected.as_str(),
                TagOp::Le => actual.as_str() <= expected.as_str(),
            },
        }
    }
}

impl fmt::Display for TagCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((op, value)) = &self.constraint {
            write!(f, "{}{}", op.symbol(), quote(value))?;
        }
        Ok(())
    }
}

/// The hierarchy part of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// `...`: materialize the matching keys here.
    Leaf,
    /// Named levels; each name is a tag whose distinct values become the
    /// children of the node.
    Levels(Vec<(String, Hierarchy)>),
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hierarchy::Leaf => write!(f, "..."),
            Hierarchy::Levels(levels) => {
                for (i, (name, child)) in levels.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {{ {} }}", name, child)?;
                }
                Ok(())
            }
        }
    }
}

/// A parsed tag query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub conditions: Vec<TagCondition>,
    pub hierarchy: Hierarchy,
}

impl Query {
    /// Parses a query string.
    pub fn parse(text: &str) -> Result<Query, StoreError> {
        let mut parser = Parser::new(text);
        let query = parser.query()?;
        parser.expect_end()?;
        Ok(query)
    }

    /// Renders the query back into its textual form;
    /// `parse(unparse(q)) == q` for every well-formed query.
    pub fn unparse(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", condition)?;
        }
        write!(f, ") => {}", self.hierarchy)
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

// ---------------------------------------------------------------------
// Recursive descent parser
// ---------------------------------------------------------------------

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Parser<'a> {
        Parser {
            chars: text.chars().peekable(),
        }
    }

    fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::Query {
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> Result<(), StoreError> {
        self.skip_ws();
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().copied()
    }

    fn query(&mut self) -> Result<Query, StoreError> {
        self.eat('(')?;
        let mut conditions = Vec::new();
        while !matches!(self.peek(), Some(')') | None) {
            conditions.push(self.tag()?);
        }
        self.eat(')')?;
        self.eat('=')?;
        self.eat('>')?;
        let hierarchy = self.hierarchy()?;
        Ok(Query {
            conditions,
            hierarchy,
        })
    }

    fn tag(&mut self) -> Result<TagCondition, StoreError> {
        let name = self.identifier()?;
        let op = match self.peek() {
            Some('=') => {
                self.chars.next();
                Some(TagOp::Eq)
            }
            Some('>') => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Some(TagOp::Ge)
                } else {
                    Some(TagOp::Gt)
                }
            }
            Some('<') => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Some(TagOp::Le)
                } else {
                    Some(TagOp::Lt)
                }
            }
            _ => None,
        };
        match op {
            None => Ok(TagCondition::present(name)),
            Some(op) => {
                let value = self.quoted_string()?;
                Ok(TagCondition::compare(name, op, value))
            }
        }
    }

    fn hierarchy(&mut self) -> Result<Hierarchy, StoreError> {
        if self.peek() == Some('.') {
            self.eat('.')?;
            self.eat('.')?;
            self.eat('.')?;
            return Ok(Hierarchy::Leaf);
        }
        let mut levels = Vec::new();
        loop {
            let name = self.identifier()?;
            self.eat('{')?;
            let child = self.hierarchy()?;
            self.eat('}')?;
            levels.push((name, child));
            match self.peek() {
                Some(c) if c.is_alphabetic() || c == '_' => continue,
                _ => break,
            }
        }
        Ok(Hierarchy::Levels(levels))
    }

    fn identifier(&mut self) -> Result<String, StoreError> {
        self.skip_ws();
        let mut name = String::new();
        match self.chars.peek() {
            Some(&c) if c.is_alphabetic() || c == '_' => {
                name.push(c);
                self.chars.next();
            }
            other => {
                let other = other.copied();
                return Err(self.error(format!(
                    "expected identifier, found {:?}",
                    other
                )))
            }
        }
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn quoted_string(&mut self) -> Result<String, StoreError> {
        self.skip_ws();
        let delim = match self.chars.next() {
            Some(c @ ('\'' | '"')) => c,
            other => {
                return Err(self.error(format!(
                    "expected quoted value, found {:?}",
                    other
                )))
            }
        };
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some(escaped @ ('\\' | '\'' | '"')) => value.push(escaped),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(self.error("unterminated string escape")),
                },
                Some(c) if c == delim => break,
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated string literal")),
            }
        }
        Ok(value)
    }

    fn expect_end(&mut self) -> Result<(), StoreError> {
        self.skip_ws();
        match self.chars.next() {
            None => Ok(()),
            Some(c) => Err(self.error(format!("unexpected trailing input at '{}'", c))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_a_flat_leaf_query() {
        let query = Query::parse("(function_name='fib') => ...").unwrap();
        assert_eq!(
            query.conditions,
            vec![TagCondition::compare("function_name", TagOp::Eq, "fib")]
        );
        assert_eq!(query.hierarchy, Hierarchy::Leaf);
    }

    #[test]
    fn parses_operators_and_bare_tags() {
        let query = Query::parse("(run started>='2024' cost<'10') => ...").unwrap();
        assert_eq!(query.conditions.len(), 3);
        assert_eq!(query.conditions[0], TagCondition::present("run"));
        assert_eq!(
            query.conditions[1],
            TagCondition::compare("started", TagOp::Ge, "2024")
        );
        assert_eq!(
            query.conditions[2],
            TagCondition::compare("cost", TagOp::Lt, "10")
        );
    }

    #[test]
    fn parses_nested_hierarchies() {
        let query =
            Query::parse("() => function_name { function_hash { ... } }").unwrap();
        let Hierarchy::Levels(levels) = &query.hierarchy else {
            panic!("expected levels");
        };
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].0, "function_name");
        let Hierarchy::Levels(inner) = &levels[0].1 else {
            panic!("expected nested levels");
        };
        assert_eq!(inner[0], ("function_hash".to_string(), Hierarchy::Leaf));
    }

    #[test]
    fn sibling_levels_parse() {
        let query = Query::parse("() => a { ... } b { ... }").unwrap();
        let Hierarchy::Levels(levels) = &query.hierarchy else {
            panic!("expected levels");
        };
        assert_eq!(levels.len(), 2);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(Query::parse("() => ... junk").is_err());
        assert!(Query::parse("( => ...").is_err());
        assert!(Query::parse("()").is_err());
    }

    #[test]
    fn conditions_match_tag_records() {
        let mut tags = Tags::new();
        tags.insert("function_name".to_string(), "fib".to_string());
        tags.insert("cost".to_string(), "5".to_string());

        assert!(TagCondition::present("cost").matches(&tags));
        assert!(!TagCondition::present("missing").matches(&tags));
        assert!(TagCondition::compare("function_name", TagOp::Eq, "fib").matches(&tags));
        assert!(TagCondition::compare("cost", TagOp::Lt, "9").matches(&tags));
        assert!(!TagCondition::compare("cost", TagOp::Gt, "9").matches(&tags));
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,11}"
    }

    fn value_strategy() -> impl Strategy<Value = String> {
        // Printable values, including the characters that need escaping.
        "[ -~]{0,16}"
    }

    fn condition_strategy() -> impl Strategy<Value = TagCondition> {
        let op = prop_oneof![
            Just(TagOp::Eq),
            Just(TagOp::Gt),
            Just(TagOp::Ge),
            Just(TagOp::Lt),
            Just(TagOp::Le),
        ];
        (
            name_strategy(),
            proptest::option::of((op, value_strategy())),
        )
            .prop_map(|(name, constraint)| TagCondition { name, constraint })
    }

    fn hierarchy_strategy() -> impl Strategy<Value = Hierarchy> {
        let leaf = Just(Hierarchy::Leaf);
        leaf.prop_recursive(3, 12, 3, |inner| {
            proptest::collection::vec((name_strategy(), inner), 1..3)
                .prop_map(Hierarchy::Levels)
        })
    }

    proptest! {
        #[test]
        fn unparse_then_parse_round_trips(
            conditions in proptest::collection::vec(condition_strategy(), 0..4),
            hierarchy in hierarchy_strategy(),
        ) {
            let query = Query { conditions, hierarchy };
            let text = query.unparse();
            let reparsed = Query::parse(&text).unwrap();
            prop_assert_eq!(reparsed, query);
        }
    }
}
