//! Pull-style XML cursor with explicit depth tracking.
//!
//! [`XmlCursor`] wraps a `quick-xml` reader and hands out one [`Node`] per
//! call, each tagged with its structural depth (the root element is depth 0).
//! Nothing is materialized beyond the stack of open element names, so memory
//! use is independent of document size.
//!
//! Two helpers cover what feed parsing needs on top of plain iteration:
//!
//! - [`XmlCursor::read_text`] consumes an element and returns its text content
//! - [`XmlCursor::subtree`] yields only the nodes inside one element

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;

use super::parser::ParseError;

/// What kind of markup a [`Node`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// `<name ...>`
    Start,
    /// `<name .../>`
    Empty,
    /// `</name>`
    End,
    /// Character data or CDATA
    Text,
    /// Declarations, comments, processing instructions, doctype
    Other,
}

/// A single step of the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Qualified tag name (`content:encoded` keeps its prefix). Empty for
    /// non-element nodes.
    pub name: String,
    /// Number of elements enclosing this node.
    pub depth: usize,
}

impl Node {
    /// True for `<name>` and `<name/>`
    pub fn is_element_start(&self) -> bool {
        matches!(self.kind, NodeKind::Start | NodeKind::Empty)
    }
}

/// Forward-only cursor over an XML byte stream.
pub struct XmlCursor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    open: Vec<String>,
    saw_root: bool,
    finished: bool,
}

impl<R: BufRead> XmlCursor<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            open: Vec::new(),
            saw_root: false,
            finished: false,
        }
    }

    /// Current nesting depth (number of open elements)
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Advance by one node. Returns `None` once the document is complete.
    ///
    /// # Errors
    ///
    /// [`ParseError::Xml`] for malformed markup, a document that ends with
    /// open elements, or a document with no root element at all.
    pub fn next_node(&mut self) -> Result<Option<Node>, ParseError> {
        if self.finished {
            return Ok(None);
        }

        self.buf.clear();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map_err(|e| xml_error(&self.reader, e))?;

        let node = match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let depth = self.open.len();
                self.open.push(name.clone());
                self.saw_root = true;
                Node {
                    kind: NodeKind::Start,
                    name,
                    depth,
                }
            }
            Event::Empty(e) => {
                self.saw_root = true;
                Node {
                    kind: NodeKind::Empty,
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    depth: self.open.len(),
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                self.open.pop();
                Node {
                    kind: NodeKind::End,
                    name,
                    depth: self.open.len(),
                }
            }
            Event::Text(_) | Event::CData(_) => Node {
                kind: NodeKind::Text,
                name: String::new(),
                depth: self.open.len(),
            },
            Event::Eof => {
                self.finished = true;
                if let Some(unclosed) = self.open.last() {
                    return Err(ParseError::Xml(format!(
                        "unexpected end of document inside <{}>",
                        unclosed
                    )));
                }
                if !self.saw_root {
                    return Err(ParseError::Xml("document has no root element".to_string()));
                }
                return Ok(None);
            }
            _ => Node {
                kind: NodeKind::Other,
                name: String::new(),
                depth: self.open.len(),
            },
        };

        Ok(Some(node))
    }

    /// Read the text content of `start` and consume everything up to and
    /// including its end tag.
    ///
    /// `start` must be the node most recently returned. Text and CDATA
    /// sections are concatenated; markup nested inside the element is
    /// skipped, its text kept. Whitespace between fragments is preserved and
    /// only the outer ends are trimmed. An empty element yields an empty
    /// string.
    pub fn read_text(&mut self, start: &Node) -> Result<String, ParseError> {
        if start.kind != NodeKind::Start {
            return Ok(String::new());
        }

        self.reader.config_mut().trim_text(false);
        let text = self.collect_text(start);
        self.reader.config_mut().trim_text(true);

        text.map(|t| t.trim().to_string())
    }

    fn collect_text(&mut self, start: &Node) -> Result<String, ParseError> {
        let mut text = String::new();
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error(&self.reader, e))?;

            match event {
                Event::Text(e) => {
                    let unescaped = e.unescape().map_err(|e| xml_error(&self.reader, e))?;
                    text.push_str(&unescaped);
                }
                Event::CData(e) => {
                    let raw = std::str::from_utf8(&e)
                        .map_err(|e| ParseError::Xml(format!("invalid UTF-8 in CDATA: {}", e)))?;
                    text.push_str(raw);
                }
                Event::Start(e) => {
                    self.open
                        .push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                Event::End(_) => {
                    self.open.pop();
                    if self.open.len() == start.depth {
                        return Ok(text);
                    }
                }
                Event::Eof => {
                    self.finished = true;
                    return Err(ParseError::Xml(format!(
                        "unexpected end of document inside <{}>",
                        start.name
                    )));
                }
                _ => {}
            }
        }
    }

    /// Open a bounded scope over the children of `start`.
    ///
    /// `start` must be the node most recently returned. The returned
    /// [`Subtree`] yields the nodes inside the element and stops after
    /// consuming its end tag, leaving the cursor just past the element.
    pub fn subtree(&mut self, start: &Node) -> Subtree<'_, R> {
        Subtree {
            base_depth: start.depth,
            done: start.kind != NodeKind::Start,
            cursor: self,
        }
    }
}

/// Nodes of one element's subtree. See [`XmlCursor::subtree`].
pub struct Subtree<'c, R> {
    cursor: &'c mut XmlCursor<R>,
    base_depth: usize,
    done: bool,
}

impl<R: BufRead> Subtree<'_, R> {
    /// Next node inside the scope, `None` once the closing tag is consumed
    pub fn next_node(&mut self) -> Result<Option<Node>, ParseError> {
        if self.done {
            return Ok(None);
        }
        match self.cursor.next_node()? {
            Some(node) if node.kind == NodeKind::End && node.depth == self.base_depth => {
                self.done = true;
                Ok(None)
            }
            Some(node) => Ok(Some(node)),
            // next_node reports an error for EOF with open elements, so this
            // only happens if the scope was opened on a closed element.
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// See [`XmlCursor::read_text`]
    pub fn read_text(&mut self, start: &Node) -> Result<String, ParseError> {
        self.cursor.read_text(start)
    }

    /// Consume whatever is left of the scope
    pub fn skip_rest(&mut self) -> Result<(), ParseError> {
        while self.next_node()?.is_some() {}
        Ok(())
    }
}

fn xml_error<R, E: std::fmt::Display>(reader: &Reader<R>, err: E) -> ParseError {
    ParseError::Xml(format!(
        "{} at byte {}",
        err,
        reader.buffer_position()
    ))
}
