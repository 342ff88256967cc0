//! Minimal XML tree reading and prefixed writing on top of quick-xml
//!
//! Documents are read into a small [`Element`] tree keyed by local names, so the
//! namespace prefix a server picks does not matter. Elements listed as raw keep
//! their inner markup verbatim as text, which is how content blocks carry STIX
//! documents through untouched.

use crate::envelope::TaxiiVersion;
use anyhow::{anyhow, Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| anyhow!("{} is missing the {} attribute", self.name, name))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Trimmed text of the first child called `name`
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.trim())
    }
}

/// Parse a document into its root element
///
/// Elements whose local name is in `raw_elements` are not descended into; their
/// inner markup is kept as their text.
pub fn parse_document(xml: &str, raw_elements: &[&str]) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(start) => {
                let mut element = open_element(&start)?;
                if raw_elements.contains(&element.name.as_str()) {
                    let end = start.name().as_ref().to_vec();
                    element.text = reader
                        .read_text(QName(&end))
                        .context("malformed XML")?
                        .into_owned();
                    attach(&mut stack, &mut root, element);
                } else {
                    stack.push(element);
                }
            }
            Event::Empty(start) => {
                let element = open_element(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| anyhow!("malformed XML: unexpected closing tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&text.unescape().context("malformed XML text")?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(anyhow!("malformed XML: unclosed element {}", stack[0].name));
    }
    root.ok_or_else(|| anyhow!("document has no root element"))
}

fn open_element(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.context("malformed XML attribute")?;
        let key = attribute.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .context("malformed XML attribute value")?
            .into_owned();
        attributes.push((local, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Writes elements under the namespace prefix of one TAXII version
pub struct MessageWriter {
    writer: Writer<Vec<u8>>,
    version: TaxiiVersion,
}

impl MessageWriter {
    pub fn new(version: TaxiiVersion) -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            version,
        }
    }

    pub fn version(&self) -> TaxiiVersion {
        self.version
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}:{}", self.version.prefix(), name)
    }

    fn start_tag(&self, name: &str, attributes: &[(&str, &str)]) -> BytesStart<'static> {
        let mut tag = BytesStart::new(self.qualified(name));
        for attribute in attributes {
            tag.push_attribute(*attribute);
        }
        tag
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .context("unable to write XML message")
    }

    /// Write the declaration and open the root element with its namespace binding
    pub fn start_root(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let xmlns = format!("xmlns:{}", self.version.prefix());
        let mut tag = BytesStart::new(self.qualified(name));
        tag.push_attribute((xmlns.as_str(), self.version.namespace()));
        for attribute in attributes {
            tag.push_attribute(*attribute);
        }
        self.write(Event::Start(tag))
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let tag = self.start_tag(name, attributes);
        self.write(Event::Start(tag))
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let tag = self.start_tag(name, attributes);
        self.write(Event::Empty(tag))
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        let tag = BytesEnd::new(self.qualified(name));
        self.write(Event::End(tag))
    }

    pub fn text_element(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attributes)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_prefixes() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
            <t:Discovery_Response xmlns:t="urn:x" message_id="42" in_response_to="1">
                <t:Service_Instance service_type="POLL" available="true">
                    <t:Address> http://example.com/poll </t:Address>
                </t:Service_Instance>
            </t:Discovery_Response>"#,
            &[],
        )
        .unwrap();

        assert_eq!(root.name, "Discovery_Response");
        assert_eq!(root.attr("message_id"), Some("42"));
        assert!(root.attr("xmlns:t").is_none());
        let service = root.child("Service_Instance").unwrap();
        assert_eq!(service.attr("service_type"), Some("POLL"));
        assert_eq!(service.child_text("Address"), Some("http://example.com/poll"));
    }

    #[test]
    fn test_raw_elements_keep_markup() {
        let root = parse_document(
            r#"<Content_Block><Content><stix:STIX_Package id="a"><x>1 &amp; 2</x></stix:STIX_Package></Content></Content_Block>"#,
            &["Content"],
        )
        .unwrap();

        let content = root.child("Content").unwrap();
        assert!(content.children.is_empty());
        assert_eq!(
            content.text,
            r#"<stix:STIX_Package id="a"><x>1 &amp; 2</x></stix:STIX_Package>"#
        );
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_document("<a><b></a>", &[]).is_err());
        assert!(parse_document("<a>", &[]).is_err());
        assert!(parse_document("", &[]).is_err());
        assert!(parse_document("not xml at all", &[]).is_err());
    }

    #[test]
    fn test_writer_prefixes_and_escapes() {
        let mut writer = MessageWriter::new(TaxiiVersion::V11);
        writer
            .start_root("Poll_Request", &[("message_id", "1"), ("collection_name", "a&b")])
            .unwrap();
        writer.text_element("Subscription_ID", &[], "<id>").unwrap();
        writer.empty("Poll_Parameters", &[("allow_asynch", "false")]).unwrap();
        writer.end("Poll_Request").unwrap();

        let xml = String::from_utf8(writer.finish()).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(
            r#"<taxii_11:Poll_Request xmlns:taxii_11="http://taxii.mitre.org/messages/taxii_xml_binding-1.1" message_id="1" collection_name="a&amp;b">"#
        ));
        assert!(xml.contains("<taxii_11:Subscription_ID>&lt;id&gt;</taxii_11:Subscription_ID>"));
        assert!(xml.contains(r#"<taxii_11:Poll_Parameters allow_asynch="false"/>"#));

        let root = parse_document(&xml, &[]).unwrap();
        assert_eq!(root.attr("collection_name"), Some("a&b"));
        assert_eq!(root.child_text("Subscription_ID"), Some("<id>"));
    }
}
