//! Order-preserving element tree for Larian `.lsx` documents.
//!
//! Only elements, attributes and text are kept. Comments, processing instructions and
//! formatting whitespace are dropped, so rendering a parsed document yields the canonical
//! four-space layout the game itself writes.

use quick_xml::{
    events::{attributes::AttrError, BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LsxError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Attribute(#[from] AttrError),
    #[error("element <{0}> is never closed")]
    Unclosed(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("content after the root element")]
    TrailingContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoding: Some("UTF-8".to_string()),
            standalone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// `<node id="..">`
    pub fn node(id: &str) -> Self {
        Self::new("node").with_attr("id", id)
    }

    /// `<attribute id=".." type=".." value=".."/>`
    pub fn attribute(id: &str, kind: &str, value: &str) -> Self {
        Self::new("attribute")
            .with_attr("id", id)
            .with_attr("type", kind)
            .with_attr("value", value)
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    fn matches(&self, name: &str, id: Option<&str>) -> bool {
        self.name == name && id.map_or(true, |id| self.id() == Some(id))
    }

    pub fn child(&self, name: &str, id: Option<&str>) -> Option<&Element> {
        self.children.iter().find(|child| child.matches(name, id))
    }

    pub fn child_mut(&mut self, name: &str, id: Option<&str>) -> Option<&mut Element> {
        self.children.iter_mut().find(|child| child.matches(name, id))
    }

    /// Finds a child, or inserts `fallback` at `position` (clamped) and returns it.
    pub fn child_or_insert(
        &mut self,
        name: &str,
        id: Option<&str>,
        position: usize,
        fallback: Element,
    ) -> &mut Element {
        let index = match self.children.iter().position(|child| child.matches(name, id)) {
            Some(index) => index,
            None => {
                let index = position.min(self.children.len());
                self.children.insert(index, fallback);
                index
            }
        };
        &mut self.children[index]
    }

    /// Value of a nested `<attribute id=key value=..>` child.
    pub fn attribute_value(&self, key: &str) -> Option<&str> {
        self.child("attribute", Some(key))
            .and_then(|attribute| attribute.attr("value"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub declaration: Option<Declaration>,
    pub root: Element,
}

impl Document {
    pub fn render(&self) -> Result<String, LsxError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        write_document(&mut writer, self)?;
        let mut xml = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        xml.push('\n');
        Ok(xml.replace("/>\n", " />\n"))
    }
}

pub fn parse(raw: &str) -> Result<Document, LsxError> {
    let mut reader = Reader::from_str(raw);
    reader.trim_text(true);

    let mut declaration = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Decl(decl) => declaration = Some(read_declaration(&decl)?),
            Event::Start(start) => {
                if root.is_some() {
                    return Err(LsxError::TrailingContent);
                }
                stack.push(read_element(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(LsxError::TrailingContent);
                }
                let element = read_element(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(LsxError::TrailingContent);
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let value = text.unescape()?;
                match stack.last_mut() {
                    Some(parent) => parent.text.get_or_insert_with(String::new).push_str(&value),
                    None => return Err(LsxError::TrailingContent),
                }
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                match stack.last_mut() {
                    Some(parent) => parent.text.get_or_insert_with(String::new).push_str(&value),
                    None => return Err(LsxError::TrailingContent),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(LsxError::Unclosed(open.name));
    }
    let root = root.ok_or(LsxError::NoRoot)?;
    Ok(Document { declaration, root })
}

fn read_declaration(decl: &BytesDecl<'_>) -> Result<Declaration, LsxError> {
    let version = String::from_utf8_lossy(&decl.version()?).into_owned();
    let encoding = match decl.encoding() {
        Some(value) => Some(String::from_utf8_lossy(&value?).into_owned()),
        None => None,
    };
    let standalone = match decl.standalone() {
        Some(value) => Some(String::from_utf8_lossy(&value?).into_owned()),
        None => None,
    };
    Ok(Declaration {
        version,
        encoding,
        standalone,
    })
}

fn read_element(start: &BytesStart<'_>) -> Result<Element, LsxError> {
    let mut element = Element::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn write_document(writer: &mut Writer<Vec<u8>>, doc: &Document) -> quick_xml::Result<()> {
    if let Some(decl) = &doc.declaration {
        writer.write_event(Event::Decl(BytesDecl::new(
            &decl.version,
            decl.encoding.as_deref(),
            decl.standalone.as_deref(),
        )))?;
    }
    write_element(writer, &doc.root)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> quick_xml::Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_none() {
        return writer.write_event(Event::Empty(start));
    }

    writer.write_event(Event::Start(start))?;
    if let Some(text) = &element.text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))
}
