//! Content selectors.
//!
//! Each `content` element in a shadow tree carries one selector which decides
//! which of the bound element's children it projects. Three kinds exist: the
//! implicit selector (no `includes` attribute, takes every unclaimed child),
//! the restricted child-axis grammar (the default selector language) and full
//! pattern expressions (see [`pattern`](super::pattern)). Hosts can register
//! further languages on the [`SelectorRegistry`].

use std::collections::HashMap;

use markup5ever::Namespace;

use crate::binding::manager::BindingManager;
use crate::binding::pattern::Pattern;
use crate::document::Document;
use crate::error::BindingError;
use crate::vocab::{SELECTOR_LANGUAGE_PATTERN, SELECTOR_LANGUAGE_SUBSET};

/// Read-only view a selector evaluates against.
pub(crate) struct SelectorContext<'a> {
    pub doc: &'a Document,
    pub manager: &'a BindingManager,
    /// The content element owning the selector. Namespace prefixes in
    /// expressions resolve against the declarations in scope here.
    pub content_element: usize,
    /// The element whose children are being selected from.
    pub bound_element: usize,
}

impl SelectorContext<'_> {
    /// Whether a node is already projected by another content element. Our
    /// own claims were released before this update pass started, so any
    /// claim we see here belongs to an earlier selector.
    pub(crate) fn is_claimed(&self, node_id: usize) -> bool {
        self.manager.content_element_of(node_id).is_some()
    }
}

/// The selector attached to one content element.
pub(crate) enum ContentSelector {
    Implicit(ImplicitSelector),
    Subset(SubsetSelector),
    Pattern(PatternSelector),
}

impl ContentSelector {
    /// The implicit selector used when a content element has no `includes`
    /// attribute.
    pub fn implicit() -> Self {
        ContentSelector::Implicit(ImplicitSelector { nodes: Vec::new() })
    }

    /// A child-axis subset selector. Returns an error (and a selector that
    /// matches nothing) if the expression does not parse.
    pub fn subset(expression: &str) -> Result<Self, BindingError> {
        let expr = SubsetExpr::parse(expression)?;
        Ok(ContentSelector::Subset(SubsetSelector {
            expr,
            nodes: Vec::new(),
        }))
    }

    /// A pattern selector. The expression is validated now and recompiled on
    /// every update so prefix bindings are always current.
    pub fn pattern(expression: &str) -> Result<Self, BindingError> {
        Pattern::parse(expression)?;
        Ok(ContentSelector::Pattern(PatternSelector {
            expression: expression.to_string(),
            nodes: Vec::new(),
        }))
    }

    /// A selector that never matches. Installed in place of selectors whose
    /// expression or language was rejected.
    pub fn inert() -> Self {
        ContentSelector::Subset(SubsetSelector {
            expr: SubsetExpr::Invalid,
            nodes: Vec::new(),
        })
    }

    /// The node ids selected by the last successful update, in document
    /// order.
    pub fn selected(&self) -> &[usize] {
        match self {
            ContentSelector::Implicit(s) => &s.nodes,
            ContentSelector::Subset(s) => &s.nodes,
            ContentSelector::Pattern(s) => &s.nodes,
        }
    }

    /// Recompute the selection. Returns whether it changed. On error the
    /// previous selection is left in place.
    pub fn update(&mut self, cx: &SelectorContext<'_>) -> Result<bool, BindingError> {
        let new_nodes = match self {
            ContentSelector::Implicit(_) => select_implicit(cx),
            ContentSelector::Subset(s) => s.expr.select(cx),
            ContentSelector::Pattern(s) => Pattern::parse(&s.expression)?.select(cx)?,
        };
        let nodes = match self {
            ContentSelector::Implicit(s) => &mut s.nodes,
            ContentSelector::Subset(s) => &mut s.nodes,
            ContentSelector::Pattern(s) => &mut s.nodes,
        };
        let changed = *nodes != new_nodes;
        *nodes = new_nodes;
        Ok(changed)
    }
}

pub(crate) struct ImplicitSelector {
    nodes: Vec<usize>,
}

pub(crate) struct SubsetSelector {
    expr: SubsetExpr,
    nodes: Vec<usize>,
}

pub(crate) struct PatternSelector {
    expression: String,
    nodes: Vec<usize>,
}

fn select_implicit(cx: &SelectorContext<'_>) -> Vec<usize> {
    cx.doc.nodes[cx.bound_element]
        .children
        .iter()
        .copied()
        .filter(|id| !cx.is_claimed(*id))
        .collect()
}

// The child-axis subset grammar:
//
//   selector := '*' index?
//             | name index?
//             | prefix ':' name index?
//             | 'id' '(' string ')'
//   index    := '[' number ']'
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubsetExpr {
    /// Unparseable expression; selects nothing.
    Invalid,
    /// `*`, optionally indexed. `index == 0` means "no index".
    Any { index: usize },
    /// A (possibly prefixed) name test, optionally indexed.
    Name {
        prefix: Option<String>,
        local: String,
        index: usize,
    },
    /// `id("value")`.
    Id(String),
}

impl SubsetExpr {
    pub fn parse(input: &str) -> Result<Self, BindingError> {
        let invalid = |reason: &str| BindingError::InvalidExpression {
            expression: input.to_string(),
            reason: reason.to_string(),
        };
        let mut tokens = tokenize(input).map_err(|reason| invalid(&reason))?.into_iter();
        let mut next = || tokens.next().unwrap_or(Token::Eof);

        let first = next();
        let mut expr = match first {
            Token::Asterisk => SubsetExpr::Any { index: 0 },
            Token::Name(name) => {
                let mut after = next();
                if name == "id" && after == Token::LeftParenthesis {
                    let Token::Str(value) = next() else {
                        return Err(invalid("expected string after `id(`"));
                    };
                    if next() != Token::RightParenthesis {
                        return Err(invalid("expected `)`"));
                    }
                    if next() != Token::Eof {
                        return Err(invalid("trailing input after `id(...)`"));
                    }
                    return Ok(SubsetExpr::Id(value));
                }
                let (prefix, local) = if after == Token::Colon {
                    let Token::Name(local) = next() else {
                        return Err(invalid("expected name after `:`"));
                    };
                    after = next();
                    (Some(name), local)
                } else {
                    (None, name)
                };
                return Self::finish_indexed(
                    SubsetExpr::Name {
                        prefix,
                        local,
                        index: 0,
                    },
                    after,
                    &mut next,
                    &invalid,
                );
            }
            _ => return Err(invalid("expected `*`, a name or `id(`")),
        };

        let after = next();
        expr = Self::finish_indexed(expr, after, &mut next, &invalid)?;
        Ok(expr)
    }

    fn finish_indexed(
        mut expr: SubsetExpr,
        after: Token,
        next: &mut impl FnMut() -> Token,
        invalid: &impl Fn(&str) -> BindingError,
    ) -> Result<SubsetExpr, BindingError> {
        match after {
            Token::Eof => Ok(expr),
            Token::LeftSquareBracket => {
                let Token::Number(n) = next() else {
                    return Err(invalid("expected number after `[`"));
                };
                if next() != Token::RightSquareBracket {
                    return Err(invalid("expected `]`"));
                }
                if next() != Token::Eof {
                    return Err(invalid("trailing input after `]`"));
                }
                match &mut expr {
                    SubsetExpr::Any { index } | SubsetExpr::Name { index, .. } => *index = n,
                    _ => return Err(invalid("index not allowed here")),
                }
                Ok(expr)
            }
            _ => Err(invalid("unexpected token")),
        }
    }

    fn select(&self, cx: &SelectorContext<'_>) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut nth = 0usize;
        let resolved_ns: Option<Namespace> = match self {
            SubsetExpr::Name {
                prefix: Some(prefix),
                ..
            } => {
                // An undeclared prefix can never match anything.
                match cx.doc.lookup_namespace_uri(cx.content_element, Some(prefix)) {
                    Some(ns) => Some(ns),
                    None => return selected,
                }
            }
            _ => None,
        };
        for &child in &cx.doc.nodes[cx.bound_element].children {
            let Some(el) = cx.doc.nodes[child].element_data() else {
                continue;
            };
            if cx.is_claimed(child) {
                continue;
            }
            let (base_match, index) = match self {
                SubsetExpr::Invalid => (false, 0),
                SubsetExpr::Any { index } => (true, *index),
                SubsetExpr::Name {
                    prefix,
                    local,
                    index,
                } => {
                    let ns_match = match prefix {
                        Some(_) => Some(&el.name.ns) == resolved_ns.as_ref(),
                        None => el.name.ns.is_empty(),
                    };
                    (ns_match && el.name.local.as_ref() == local, *index)
                }
                SubsetExpr::Id(value) => (el.id.as_deref() == Some(value.as_str()), 0),
            };
            if !base_match {
                continue;
            }
            nth += 1;
            if index == 0 || nth == index {
                selected.push(child);
            }
        }
        selected
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Eof,
    Name(String),
    Number(usize),
    Str(String),
    Asterisk,
    Colon,
    LeftSquareBracket,
    RightSquareBracket,
    LeftParenthesis,
    RightParenthesis,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '*' => {
                chars.next();
                tokens.push(Token::Asterisk);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LeftSquareBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RightSquareBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParenthesis);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParenthesis);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut value = 0usize;
                while let Some(&c) = chars.peek() {
                    if let Some(digit) = c.to_digit(10) {
                        value = value
                            .checked_mul(10)
                            .and_then(|v| v.checked_add(digit as usize))
                            .ok_or_else(|| "number out of range".to_string())?;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(value));
            }
            c if is_name_start(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            c => return Err(format!("unexpected character `{c}`")),
        }
    }
    Ok(tokens)
}

/// Maps selector language identifiers to selector constructors.
pub struct SelectorRegistry {
    factories: HashMap<String, SelectorFactory>,
}

type SelectorFactory = Box<dyn Fn(&str) -> Result<ContentSelector, BindingError>>;

impl Default for SelectorRegistry {
    fn default() -> Self {
        let mut registry = SelectorRegistry {
            factories: HashMap::new(),
        };
        registry
            .factories
            .insert(SELECTOR_LANGUAGE_SUBSET.to_string(), Box::new(ContentSelector::subset));
        registry
            .factories
            .insert(SELECTOR_LANGUAGE_PATTERN.to_string(), Box::new(ContentSelector::pattern));
        registry
    }
}

impl SelectorRegistry {
    pub(crate) fn create(
        &self,
        language: &str,
        expression: &str,
    ) -> Result<ContentSelector, BindingError> {
        let factory =
            self.factories
                .get(language)
                .ok_or_else(|| BindingError::InvalidSelectorLanguage {
                    language: language.to_string(),
                })?;
        factory(expression)
    }
}
