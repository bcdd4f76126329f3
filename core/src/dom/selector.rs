//! CSS selector subset
//!
//! Supports what the item and marker settings need: type selectors, `*`,
//! `#id`, `.class`, `[attr]`, `[attr=value]`, `[attr^=value]` (values bare
//! or quoted) and the descendant combinator (whitespace).

use std::fmt;
use std::str::FromStr;

use super::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected `{found}` at offset {offset} in `{input}`")]
    Unexpected {
        input: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated `{0}` in selector")]
    Unterminated(char),
}

#[derive(Debug, Clone, PartialEq)]
enum AttrMatch {
    Exists(String),
    Equals(String, String),
    Prefix(String, String),
}

impl AttrMatch {
    fn matches(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (AttrMatch::Exists(_), Some(_)) => true,
            (AttrMatch::Equals(_, want), Some(v)) => v == want,
            (AttrMatch::Prefix(_, want), Some(v)) => v.starts_with(want.as_str()),
            (_, None) => false,
        }
    }

    fn name(&self) -> &str {
        match self {
            AttrMatch::Exists(n) | AttrMatch::Equals(n, _) | AttrMatch::Prefix(n, _) => n,
        }
    }
}

/// One compound selector: everything between two combinators
#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(el) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag
            && *tag != el.tag
        {
            return false;
        }
        if let Some(id) = &self.id
            && el.attr("id") != Some(id.as_str())
        {
            return false;
        }
        self.classes.iter().all(|c| el.has_class(c))
            && self.attrs.iter().all(|a| a.matches(el.attr(a.name())))
    }
}

/// A parsed selector. The last compound is the subject; earlier ones must
/// match some ancestor, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    steps: Vec<Compound>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().peekable(),
        };
        let steps = parser.parse_steps()?;
        if steps.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self {
            source: input.trim().to_string(),
            steps,
        })
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some((subject, rest)) = self.steps.split_last() else {
            return false;
        };
        if !subject.matches(doc, node) {
            return false;
        }
        // Greedy right-to-left walk is exact for descendant-only chains
        let mut remaining = rest.iter().rev().peekable();
        let mut cursor = doc.parent(node);
        while let Some(step) = remaining.peek() {
            let Some(ancestor) = cursor else {
                return false;
            };
            if step.matches(doc, ancestor) {
                remaining.next();
            }
            cursor = doc.parent(ancestor);
        }
        true
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl Parser<'_> {
    fn unexpected(&self, offset: usize, found: char) -> SelectorError {
        SelectorError::Unexpected {
            input: self.input.to_string(),
            offset,
            found,
        }
    }

    fn parse_steps(&mut self) -> Result<Vec<Compound>, SelectorError> {
        let mut steps = Vec::new();
        loop {
            while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
            if self.chars.peek().is_none() {
                return Ok(steps);
            }
            steps.push(self.parse_compound()?);
        }
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        while let Some(&(offset, c)) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => break,
                '*' => {
                    self.chars.next();
                }
                '#' => {
                    self.chars.next();
                    compound.id = Some(self.ident(offset)?);
                }
                '.' => {
                    self.chars.next();
                    compound.classes.push(self.ident(offset)?);
                }
                '[' => {
                    self.chars.next();
                    compound.attrs.push(self.attribute()?);
                }
                c if is_ident_char(c) => {
                    compound.tag = Some(self.ident(offset)?.to_ascii_lowercase());
                }
                other => return Err(self.unexpected(offset, other)),
            }
        }
        Ok(compound)
    }

    fn ident(&mut self, offset: usize) -> Result<String, SelectorError> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| is_ident_char(*c)) {
            out.push(c);
        }
        if out.is_empty() {
            let (at, found) = self.chars.peek().copied().unwrap_or((offset, ' '));
            return Err(self.unexpected(at, found));
        }
        Ok(out)
    }

    fn attribute(&mut self) -> Result<AttrMatch, SelectorError> {
        let start = self.chars.peek().map(|(o, _)| *o).unwrap_or(0);
        let name = self.ident(start)?;
        match self.chars.next() {
            Some((_, ']')) => Ok(AttrMatch::Exists(name)),
            Some((_, '=')) => {
                let value = self.value()?;
                self.close_bracket()?;
                Ok(AttrMatch::Equals(name, value))
            }
            Some((offset, '^')) => match self.chars.next() {
                Some((_, '=')) => {
                    let value = self.value()?;
                    self.close_bracket()?;
                    Ok(AttrMatch::Prefix(name, value))
                }
                Some((o, c)) => Err(self.unexpected(o, c)),
                None => Err(self.unexpected(offset, '^')),
            },
            Some((offset, c)) => Err(self.unexpected(offset, c)),
            None => Err(SelectorError::Unterminated('[')),
        }
    }

    fn value(&mut self) -> Result<String, SelectorError> {
        match self.chars.peek().copied() {
            Some((_, quote @ ('"' | '\''))) => {
                self.chars.next();
                let mut out = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => return Ok(out),
                        Some((_, c)) => out.push(c),
                        None => return Err(SelectorError::Unterminated(quote)),
                    }
                }
            }
            Some((offset, _)) => self.ident(offset),
            None => Err(SelectorError::Unterminated('[')),
        }
    }

    fn close_bracket(&mut self) -> Result<(), SelectorError> {
        match self.chars.next() {
            Some((_, ']')) => Ok(()),
            Some((offset, c)) => Err(self.unexpected(offset, c)),
            None => Err(SelectorError::Unterminated('[')),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Viewport;

    fn el(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = doc.create_element(tag);
        for (k, v) in attrs {
            doc.set_attribute(id, k, v).unwrap();
        }
        doc.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn parses_the_default_settings() {
        assert!(Selector::parse("#base-container article").is_ok());
        assert!(Selector::parse("div.ePsyd").is_ok());
        assert!(Selector::parse("[aria-label=\"Keep reading\"]").is_ok());
        assert!(Selector::parse("use[href^=\"#\"]").is_ok());
        assert!(Selector::parse("img[srcset]").is_ok());
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Selector::parse("   "), Err(SelectorError::Empty));
        assert_eq!(
            Selector::parse("[href=\"x"),
            Err(SelectorError::Unterminated('"'))
        );
        assert!(matches!(
            Selector::parse("div > p"),
            Err(SelectorError::Unexpected { found: '>', .. })
        ));
    }

    #[test]
    fn descendant_combinator_requires_ancestor() {
        let mut doc = Document::new(Viewport::default());
        let body = doc.body();
        let container = el(&mut doc, body, "div", &[("id", "base-container")]);
        let inside = el(&mut doc, container, "article", &[]);
        let outside = el(&mut doc, body, "article", &[]);

        let sel = Selector::parse("#base-container article").unwrap();
        assert_eq!(doc.query_all(doc.root(), &sel), vec![inside]);
        assert!(!sel.matches(&doc, outside));
    }

    #[test]
    fn attribute_operators() {
        let mut doc = Document::new(Viewport::default());
        let body = doc.body();
        let local = el(&mut doc, body, "use", &[("href", "#icon-like")]);
        let remote = el(&mut doc, body, "use", &[("href", "https://x/y.svg#a")]);
        let button = el(&mut doc, body, "button", &[("aria-label", "Keep reading")]);

        let prefix = Selector::parse("use[href^=\"#\"]").unwrap();
        assert!(prefix.matches(&doc, local));
        assert!(!prefix.matches(&doc, remote));

        let exact = Selector::parse("[aria-label='Keep reading']").unwrap();
        assert_eq!(doc.query(doc.root(), &exact), Some(button));
    }

    #[test]
    fn class_and_tag_compound() {
        let mut doc = Document::new(Viewport::default());
        let body = doc.body();
        let notes = el(&mut doc, body, "div", &[("class", "x ePsyd y")]);
        let span = el(&mut doc, body, "span", &[("class", "ePsyd")]);

        let sel = Selector::parse("div.ePsyd").unwrap();
        assert!(sel.matches(&doc, notes));
        assert!(!sel.matches(&doc, span));
        assert_eq!(sel.to_string(), "div.ePsyd");
    }
}
