//! The full pattern selector language.
//!
//! Patterns are alternations of location paths over the child and descendant
//! axes with name tests and a restricted predicate set:
//!
//! ```text
//!   pattern   := path ('|' path)*
//!   path      := ('/' | '//')? step (('/' | '//') step)*
//!   step      := nametest predicate*
//!   nametest  := '*' | name | prefix ':' name
//!   predicate := '[' number ']'
//!              | '[' '@' name ('=' string)? ']'
//! ```
//!
//! A path starting with `/` is anchored at the bound element: its first step
//! must match a direct child. Any other path matches anywhere in the bound
//! element's subtree. A matched element claims its entire subtree, so the
//! evaluator never descends into a match looking for further ones.

use crate::binding::selector::SelectorContext;
use crate::error::BindingError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pattern {
    expression: String,
    paths: Vec<PathPattern>,
}

#[derive(Debug, Clone, PartialEq)]
struct PathPattern {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    /// How this step's match relates to the previous step's match (or, for
    /// the first step, to the bound element).
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    Any,
    Name {
        prefix: Option<String>,
        local: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    /// `[n]`: 1-based position among element siblings matching the step's
    /// name test.
    Position(usize),
    /// `[@name]` or `[@name="value"]`.
    Attr {
        name: String,
        value: Option<String>,
    },
}

impl Pattern {
    pub fn parse(expression: &str) -> Result<Self, BindingError> {
        Parser::new(expression)?.parse()
    }

    /// Evaluate against the bound element's subtree, claiming whole matched
    /// subtrees and skipping subtrees already claimed by earlier selectors.
    pub fn select(&self, cx: &SelectorContext<'_>) -> Result<Vec<usize>, BindingError> {
        let mut selected = Vec::new();
        for &child in &cx.doc.nodes[cx.bound_element].children {
            self.visit(cx, child, &mut selected)?;
        }
        Ok(selected)
    }

    fn visit(
        &self,
        cx: &SelectorContext<'_>,
        node_id: usize,
        selected: &mut Vec<usize>,
    ) -> Result<(), BindingError> {
        if !cx.doc.nodes[node_id].is_element() || cx.is_claimed(node_id) {
            return Ok(());
        }
        if self.matches(cx, node_id)? {
            selected.push(node_id);
            return Ok(());
        }
        for &child in &cx.doc.nodes[node_id].children {
            self.visit(cx, child, selected)?;
        }
        Ok(())
    }

    fn matches(&self, cx: &SelectorContext<'_>, node_id: usize) -> Result<bool, BindingError> {
        for path in &self.paths {
            if self.path_matches(cx, path, node_id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn path_matches(
        &self,
        cx: &SelectorContext<'_>,
        path: &PathPattern,
        node_id: usize,
    ) -> Result<bool, BindingError> {
        let last = path.steps.len() - 1;
        if !self.step_matches(cx, &path.steps[last], node_id)? {
            return Ok(false);
        }
        self.match_prefix(cx, &path.steps, last, node_id)
    }

    /// `steps[idx]` matched at `node_id`; check the steps to its left,
    /// backtracking over descendant axes.
    fn match_prefix(
        &self,
        cx: &SelectorContext<'_>,
        steps: &[Step],
        idx: usize,
        node_id: usize,
    ) -> Result<bool, BindingError> {
        let axis = steps[idx].axis;
        if idx == 0 {
            return Ok(match axis {
                Axis::Child => cx.doc.nodes[node_id].parent == Some(cx.bound_element),
                // The evaluator only visits descendants of the bound
                // element, so an unanchored first step always holds.
                Axis::Descendant => true,
            });
        }
        match axis {
            Axis::Child => {
                let Some(parent) = cx.doc.nodes[node_id].parent else {
                    return Ok(false);
                };
                if parent == cx.bound_element {
                    return Ok(false);
                }
                Ok(self.step_matches(cx, &steps[idx - 1], parent)?
                    && self.match_prefix(cx, steps, idx - 1, parent)?)
            }
            Axis::Descendant => {
                let mut current = cx.doc.nodes[node_id].parent;
                while let Some(ancestor) = current {
                    if ancestor == cx.bound_element {
                        break;
                    }
                    if self.step_matches(cx, &steps[idx - 1], ancestor)?
                        && self.match_prefix(cx, steps, idx - 1, ancestor)?
                    {
                        return Ok(true);
                    }
                    current = cx.doc.nodes[ancestor].parent;
                }
                Ok(false)
            }
        }
    }

    fn step_matches(
        &self,
        cx: &SelectorContext<'_>,
        step: &Step,
        node_id: usize,
    ) -> Result<bool, BindingError> {
        if !self.name_test_matches(cx, &step.test, node_id)? {
            return Ok(false);
        }
        for predicate in &step.predicates {
            match predicate {
                Predicate::Position(n) => {
                    if self.sibling_position(cx, &step.test, node_id)? != *n {
                        return Ok(false);
                    }
                }
                Predicate::Attr { name, value } => {
                    let el = cx.doc.nodes[node_id].element_data();
                    let actual = el.and_then(|el| {
                        el.attrs
                            .iter()
                            .find(|attr| {
                                attr.name.ns.is_empty() && attr.name.local.as_ref() == name
                            })
                            .map(|attr| attr.value.as_str())
                    });
                    let holds = match value {
                        Some(expected) => actual == Some(expected.as_str()),
                        None => actual.is_some(),
                    };
                    if !holds {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn name_test_matches(
        &self,
        cx: &SelectorContext<'_>,
        test: &NameTest,
        node_id: usize,
    ) -> Result<bool, BindingError> {
        let Some(el) = cx.doc.nodes[node_id].element_data() else {
            return Ok(false);
        };
        match test {
            NameTest::Any => Ok(true),
            NameTest::Name { prefix, local } => {
                if el.name.local.as_ref() != local {
                    return Ok(false);
                }
                match prefix {
                    None => Ok(el.name.ns.is_empty()),
                    Some(prefix) => {
                        let ns = cx
                            .doc
                            .lookup_namespace_uri(cx.content_element, Some(prefix))
                            .ok_or_else(|| BindingError::ExpressionEvaluation {
                                expression: self.expression.clone(),
                                reason: format!("undeclared namespace prefix `{prefix}`"),
                            })?;
                        Ok(el.name.ns == ns)
                    }
                }
            }
        }
    }

    /// 1-based position of `node_id` among its element siblings matching
    /// `test`.
    fn sibling_position(
        &self,
        cx: &SelectorContext<'_>,
        test: &NameTest,
        node_id: usize,
    ) -> Result<usize, BindingError> {
        let Some(parent) = cx.doc.nodes[node_id].parent else {
            return Ok(1);
        };
        let mut position = 0;
        for &sibling in &cx.doc.nodes[parent].children {
            if self.name_test_matches(cx, test, sibling)? {
                position += 1;
            }
            if sibling == node_id {
                break;
            }
        }
        Ok(position)
    }
}

struct Parser {
    expression: String,
    tokens: Vec<PatternToken>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternToken {
    Name(String),
    Number(usize),
    Str(String),
    Asterisk,
    Colon,
    Slash,
    DoubleSlash,
    Pipe,
    At,
    Equals,
    LeftSquareBracket,
    RightSquareBracket,
    Eof,
}

impl Parser {
    fn new(expression: &str) -> Result<Self, BindingError> {
        let tokens = Self::tokenize(expression).map_err(|reason| {
            BindingError::InvalidExpression {
                expression: expression.to_string(),
                reason,
            }
        })?;
        Ok(Parser {
            expression: expression.to_string(),
            tokens,
            pos: 0,
        })
    }

    fn error(&self, reason: &str) -> BindingError {
        BindingError::InvalidExpression {
            expression: self.expression.clone(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> &PatternToken {
        self.tokens.get(self.pos).unwrap_or(&PatternToken::Eof)
    }

    fn next(&mut self) -> PatternToken {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or(PatternToken::Eof);
        self.pos += 1;
        token
    }

    fn parse(mut self) -> Result<Pattern, BindingError> {
        let mut paths = vec![self.parse_path()?];
        loop {
            match self.next() {
                PatternToken::Pipe => paths.push(self.parse_path()?),
                PatternToken::Eof => break,
                _ => return Err(self.error("expected `|` or end of expression")),
            }
        }
        Ok(Pattern {
            expression: self.expression.clone(),
            paths,
        })
    }

    fn parse_path(&mut self) -> Result<PathPattern, BindingError> {
        let first_axis = match self.peek() {
            PatternToken::Slash => {
                self.next();
                Axis::Child
            }
            PatternToken::DoubleSlash => {
                self.next();
                Axis::Descendant
            }
            _ => Axis::Descendant,
        };
        let mut steps = vec![self.parse_step(first_axis)?];
        loop {
            let axis = match self.peek() {
                PatternToken::Slash => Axis::Child,
                PatternToken::DoubleSlash => Axis::Descendant,
                _ => break,
            };
            self.next();
            steps.push(self.parse_step(axis)?);
        }
        Ok(PathPattern { steps })
    }

    fn parse_step(&mut self, axis: Axis) -> Result<Step, BindingError> {
        let test = match self.next() {
            PatternToken::Asterisk => NameTest::Any,
            PatternToken::Name(name) => {
                if *self.peek() == PatternToken::Colon {
                    self.next();
                    let PatternToken::Name(local) = self.next() else {
                        return Err(self.error("expected name after `:`"));
                    };
                    NameTest::Name {
                        prefix: Some(name),
                        local,
                    }
                } else {
                    NameTest::Name {
                        prefix: None,
                        local: name,
                    }
                }
            }
            _ => return Err(self.error("expected a name test")),
        };
        let mut predicates = Vec::new();
        while *self.peek() == PatternToken::LeftSquareBracket {
            self.next();
            predicates.push(self.parse_predicate()?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_predicate(&mut self) -> Result<Predicate, BindingError> {
        let predicate = match self.next() {
            PatternToken::Number(n) => {
                if n == 0 {
                    return Err(self.error("positions are 1-based"));
                }
                Predicate::Position(n)
            }
            PatternToken::At => {
                let PatternToken::Name(name) = self.next() else {
                    return Err(self.error("expected attribute name after `@`"));
                };
                let value = if *self.peek() == PatternToken::Equals {
                    self.next();
                    let PatternToken::Str(value) = self.next() else {
                        return Err(self.error("expected string after `=`"));
                    };
                    Some(value)
                } else {
                    None
                };
                Predicate::Attr { name, value }
            }
            _ => return Err(self.error("expected a number or `@name` predicate")),
        };
        if self.next() != PatternToken::RightSquareBracket {
            return Err(self.error("expected `]`"));
        }
        Ok(predicate)
    }

    fn tokenize(input: &str) -> Result<Vec<PatternToken>, String> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    chars.next();
                }
                '/' => {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        tokens.push(PatternToken::DoubleSlash);
                    } else {
                        tokens.push(PatternToken::Slash);
                    }
                }
                '|' => {
                    chars.next();
                    tokens.push(PatternToken::Pipe);
                }
                '@' => {
                    chars.next();
                    tokens.push(PatternToken::At);
                }
                '=' => {
                    chars.next();
                    tokens.push(PatternToken::Equals);
                }
                '*' => {
                    chars.next();
                    tokens.push(PatternToken::Asterisk);
                }
                ':' => {
                    chars.next();
                    tokens.push(PatternToken::Colon);
                }
                '[' => {
                    chars.next();
                    tokens.push(PatternToken::LeftSquareBracket);
                }
                ']' => {
                    chars.next();
                    tokens.push(PatternToken::RightSquareBracket);
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
                    tokens.push(PatternToken::Str(value));
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
                    tokens.push(PatternToken::Number(value));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                            name.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    tokens.push(PatternToken::Name(name));
                }
                c => return Err(format!("unexpected character `{c}`")),
            }
        }
        Ok(tokens)
    }
}
