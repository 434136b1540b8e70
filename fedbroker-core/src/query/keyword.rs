//! Boolean keyword language: grammar and AST.
//!
//! ```text
//! expr      := term (operator term)*
//! operator  := or | not | and
//! or        := WS? "OR" WS?
//! not       := WS? "NOT" WS?
//! and       := (WS? "AND" WS?) | mandatory_WS
//! term      := group | phrase | keyword
//! group     := WS? "(" WS? expr WS? ")"
//! phrase    := WS? '"' WS? keyword (WS? keyword)* WS? '"'
//! keyword   := one or more chars other than whitespace, '(', ')', '"'
//! ```
//!
//! Operators have no precedence. Each `operator term` pair wraps everything
//! parsed so far as the left child, so `a OR b AND c` is `(a OR b) AND c`.
//! Operator words are upper case and must end at a word boundary.

use std::fmt;

/// A boolean operator in the keyword language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Both sides must match.
    And,
    /// Either side may match.
    Or,
    /// Left side must match and right side must not ("AND NOT").
    Not,
}

impl Operator {
    /// The keyword that spells this operator.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Parsed keyword expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
    /// A single keyword or a collapsed phrase.
    Keyword(String),
    /// A binary operator.
    Operator {
        /// Which operator.
        op: Operator,
        /// Everything parsed before the operator.
        left: Box<AstNode>,
        /// The term after the operator.
        right: Box<AstNode>,
    },
}

impl AstNode {
    /// Build a keyword node.
    pub fn keyword(text: impl Into<String>) -> Self {
        Self::Keyword(text.into())
    }

    /// Build an operator node.
    pub fn operator(op: Operator, left: AstNode, right: AstNode) -> Self {
        Self::Operator {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(text) if text.chars().any(char::is_whitespace) => {
                write!(f, "\"{text}\"")
            }
            Self::Keyword(text) => f.write_str(text),
            Self::Operator { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

/// Malformed keyword syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    /// Zero-based character offset of the problem.
    pub position: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    /// Build a parse error.
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Parse keyword search text into an AST.
///
/// Empty input, unbalanced parentheses and unterminated phrases are errors in
/// both modes. Other unparsable trailing input is an error when `strict` is
/// set; otherwise the trimmed remainder is kept as a literal keyword and
/// AND-ed onto what was parsed.
///
/// # Errors
///
/// Returns [`ParseError`] with the character position of the first problem.
pub fn parse(text: &str, strict: bool) -> Result<AstNode, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::new(0, "search text is empty"));
    }
    check_balance(text)?;

    let mut parser = Parser::new(text);
    let node = match parser.expr() {
        Ok(node) => node,
        Err(err) if strict => return Err(err),
        Err(err) => {
            tracing::debug!(error = %err, "keyword text unparsable, using it as a literal");
            return Ok(AstNode::keyword(text.trim()));
        }
    };

    parser.skip_ws();
    if parser.at_end() {
        return Ok(node);
    }

    if strict {
        let position = parser.pos;
        return Err(parser.last_error.take().unwrap_or_else(|| {
            ParseError::new(position, format!("unexpected input '{}'", parser.rest()))
        }));
    }
    let remainder = parser.rest();
    tracing::debug!(position = parser.pos, "keeping unparsable remainder as a literal keyword");
    Ok(AstNode::operator(
        Operator::And,
        node,
        AstNode::keyword(remainder.trim()),
    ))
}

/// Reject unbalanced parentheses and quotes before parsing.
fn check_balance(text: &str) -> Result<(), ParseError> {
    let mut open_groups: Vec<usize> = Vec::new();
    let mut open_quote: Option<usize> = None;

    for (position, c) in text.chars().enumerate() {
        match (c, open_quote) {
            ('"', Some(_)) => open_quote = None,
            ('"', None) => open_quote = Some(position),
            (_, Some(_)) => {}
            ('(', None) => open_groups.push(position),
            (')', None) => {
                if open_groups.pop().is_none() {
                    return Err(ParseError::new(position, "unmatched ')'"));
                }
            }
            _ => {}
        }
    }

    if let Some(position) = open_quote {
        return Err(ParseError::new(position, "unterminated phrase"));
    }
    if let Some(&position) = open_groups.last() {
        return Err(ParseError::new(position, "unmatched '('"));
    }
    Ok(())
}

fn is_keyword_char(c: char) -> bool {
    !(c.is_whitespace() || c == '(' || c == ')' || c == '"')
}

/// Recursive-descent parser over the input characters. Failed alternatives
/// rewind `pos`, giving PEG ordered-choice semantics.
struct Parser {
    chars: Vec<char>,
    pos: usize,
    last_error: Option<ParseError>,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            last_error: None,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    /// Skip whitespace, returning whether any was consumed.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    /// Consume `word` if it is next and ends at a word boundary.
    fn eat_word(&mut self, word: &str) -> bool {
        let len = word.chars().count();
        let Some(candidate) = self.chars.get(self.pos..self.pos + len) else {
            return false;
        };
        if !candidate.iter().copied().eq(word.chars()) {
            return false;
        }
        let boundary = self
            .chars
            .get(self.pos + len)
            .is_none_or(|&c| !is_keyword_char(c));
        if boundary {
            self.pos += len;
        }
        boundary
    }

    fn expr(&mut self) -> Result<AstNode, ParseError> {
        let mut node = self.term()?;
        loop {
            let save = self.pos;
            let Some(op) = self.operator() else {
                self.last_error = None;
                break;
            };
            match self.term() {
                Ok(right) => node = AstNode::operator(op, node, right),
                Err(err) => {
                    self.last_error = Some(err);
                    self.pos = save;
                    break;
                }
            }
        }
        Ok(node)
    }

    fn operator(&mut self) -> Option<Operator> {
        let save = self.pos;
        for op in [Operator::Or, Operator::Not, Operator::And] {
            self.skip_ws();
            if self.eat_word(op.keyword()) {
                self.skip_ws();
                return Some(op);
            }
            self.pos = save;
        }
        if self.skip_ws() {
            return Some(Operator::And);
        }
        None
    }

    fn term(&mut self) -> Result<AstNode, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => self.group(),
            Some('"') => self.phrase(),
            Some(c) if is_keyword_char(c) => Ok(AstNode::Keyword(self.keyword())),
            Some(c) => Err(ParseError::new(
                self.pos,
                format!("expected keyword, phrase or group, found '{c}'"),
            )),
            None => Err(ParseError::new(
                self.pos,
                "expected keyword, phrase or group, found end of input",
            )),
        }
    }

    fn group(&mut self) -> Result<AstNode, ParseError> {
        self.pos += 1;
        self.skip_ws();
        let inner = self.expr()?;
        self.skip_ws();
        if self.peek() != Some(')') {
            return Err(ParseError::new(self.pos, "expected ')'"));
        }
        self.pos += 1;
        Ok(inner)
    }

    fn phrase(&mut self) -> Result<AstNode, ParseError> {
        let open = self.pos;
        self.pos += 1;
        self.skip_ws();
        if !self.peek().is_some_and(is_keyword_char) {
            return Err(ParseError::new(
                self.pos,
                "phrase must contain at least one keyword",
            ));
        }
        let start = self.pos;
        self.keyword();
        let mut end = self.pos;
        loop {
            let save = self.pos;
            self.skip_ws();
            if self.peek().is_some_and(is_keyword_char) {
                self.keyword();
                end = self.pos;
            } else {
                self.pos = save;
                break;
            }
        }
        self.skip_ws();
        if self.peek() != Some('"') {
            return Err(ParseError::new(
                self.pos,
                format!("expected closing '\"' for phrase opened at {open}"),
            ));
        }
        self.pos += 1;
        Ok(AstNode::Keyword(self.chars[start..end].iter().collect()))
    }

    fn keyword(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_keyword_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}
