//! Owned XML element tree used by the wire codec.
//!
//! coqtop emits a handful of HTML entities (`&nbsp;`, `&apos;`, `&#40;`,
//! `&#41;`) that a parser with no DTD does not know, so raw bytes go through
//! [`escape_entities`] before they reach quick-xml. Reading is done on whole
//! fragments wrapped in a synthetic `<root>`; a fragment that does not parse is
//! simply incomplete.

use crate::error::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// A node in an element's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and mixed content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub nodes: Vec<Node>,
}

/// Why a fragment could not be parsed (yet).
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("fragment ends inside <{0}>")]
    Unclosed(String),
}

impl Element {
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_attr<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.nodes.push(Node::Element(child));
        self
    }

    pub fn with_children<I: IntoIterator<Item = Element>>(mut self, children: I) -> Self {
        self.nodes
            .extend(children.into_iter().map(Node::Element));
        self
    }

    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.nodes.push(Node::Text(text.into()));
        self
    }

    /// Value of the attribute `name`, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text nodes.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child_count(&self) -> usize {
        self.children().count()
    }

    /// First child element with the given tag.
    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.children().find(|c| c.tag == tag)
    }

    /// Concatenation of the element's own text nodes.
    pub fn own_text(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Concatenation of every descendant text node, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Serialize to UTF-8 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.tag.as_str());
        for (k, v) in &self.attrs {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.nodes.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| Error::Xml(e.to_string()));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| Error::Xml(e.to_string()))?;
        for node in &self.nodes {
            match node {
                Node::Element(e) => e.write(writer)?,
                Node::Text(t) => writer
                    .write_event(Event::Text(BytesText::new(t)))
                    .map_err(|e| Error::Xml(e.to_string()))?,
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.tag.as_str())))
            .map_err(|e| Error::Xml(e.to_string()))
    }
}

/// Prepares raw subprocess output for the XML parser.
///
/// Returns the escaped text and the number of input bytes it covers. A UTF-8
/// sequence cut off at the end of `raw` is left unconsumed so the next read
/// can complete it; any other invalid byte becomes a numeric character
/// reference.
pub fn escape_entities(raw: &[u8]) -> (String, usize) {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut consumed = 0;

    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                text.push_str(s);
                consumed += rest.len();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        for byte in &rest[valid..valid + len] {
                            text.push_str(&format!("&#{};", byte));
                        }
                        consumed += valid + len;
                        rest = &rest[valid + len..];
                    }
                    None => {
                        consumed += valid;
                        break;
                    }
                }
            }
        }
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&apos;", "'")
        .replace("&#40;", "(")
        .replace("&#41;", ")");
    (text, consumed)
}

/// Parses `body` as the content of a synthetic `<root>` element and returns
/// its top-level child elements.
pub fn parse_fragment(body: &str) -> std::result::Result<Vec<Element>, FragmentError> {
    let wrapped = format!("<root>{}</root>", body);
    let mut reader = Reader::from_str(&wrapped);
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, Node::Element(element));
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(FragmentError::Unclosed("root".to_string()));
                };
                if stack.is_empty() {
                    return Ok(element
                        .nodes
                        .into_iter()
                        .filter_map(|n| match n {
                            Node::Element(e) => Some(e),
                            Node::Text(_) => None,
                        })
                        .collect());
                }
                attach(&mut stack, Node::Element(element));
            }
            Event::Text(text) => {
                let text = text.unescape()?.into_owned();
                attach(&mut stack, Node::Text(text));
            }
            Event::CData(cdata) => {
                let text = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                attach(&mut stack, Node::Text(text));
            }
            Event::Eof => {
                let open = stack.pop().map(|e| e.tag).unwrap_or_default();
                return Err(FragmentError::Unclosed(open));
            }
            _ => {}
        }
    }
}

fn element_from(start: &BytesStart<'_>) -> std::result::Result<Element, FragmentError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.nodes.push(node);
    }
}
