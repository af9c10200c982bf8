//! Minimal XML tree reader.
//!
//! Handles exactly the subset the parser front-end emits: elements with
//! attributes, nested children, text content, comments, and processing
//! instructions. No namespaces, no DTDs, no CDATA. The five standard
//! entities are decoded in text and attribute values and encoded by
//! [`escape`].

use crate::error::FrontendError;

/// One XML element.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Required string attribute.
    pub fn string_attr(&self, name: &str) -> Result<&str, FrontendError> {
        self.attr(name)
            .ok_or_else(|| FrontendError::Schema(format!(
                "element <{}> is missing attribute '{}'",
                self.name, name
            )))
    }

    /// Required boolean attribute (`"true"`/`"false"`/`"1"`/`"0"`).
    pub fn bool_attr(&self, name: &str) -> Result<bool, FrontendError> {
        match self.string_attr(name)? {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(FrontendError::Schema(format!(
                "attribute '{}' on <{}> is not a boolean: '{}'",
                name, self.name, other
            ))),
        }
    }

    /// Required child by position.
    pub fn child(&self, index: usize) -> Result<&XmlNode, FrontendError> {
        self.children.get(index).ok_or_else(|| {
            FrontendError::Schema(format!(
                "element <{}> is missing child {}",
                self.name, index
            ))
        })
    }
}

/// Escapes text for embedding in an XML document.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let (replacement, consumed) = if tail.starts_with("&amp;") {
            ('&', 5)
        } else if tail.starts_with("&lt;") {
            ('<', 4)
        } else if tail.starts_with("&gt;") {
            ('>', 4)
        } else if tail.starts_with("&quot;") {
            ('"', 6)
        } else if tail.starts_with("&apos;") {
            ('\'', 6)
        } else {
            ('&', 1)
        };
        out.push(replacement);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// Parses a document, returning its root element.
pub fn parse(input: &str) -> Result<XmlNode, FrontendError> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    parser.skip_misc();
    let root = parser.parse_element()?;
    parser.skip_misc();
    if parser.pos < parser.bytes.len() {
        return Err(FrontendError::xml(
            parser.pos,
            "unexpected content after document root",
        ));
    }
    Ok(root)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.bytes[self.pos..].starts_with(prefix.as_bytes())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skips whitespace, comments, and processing instructions.
    fn skip_misc(&mut self) {
        loop {
            self.skip_whitespace();
            if self.starts_with("<!--") {
                match find_from(self.bytes, self.pos + 4, b"-->") {
                    Some(end) => self.pos = end + 3,
                    None => {
                        self.pos = self.bytes.len();
                        return;
                    }
                }
            } else if self.starts_with("<?") {
                match find_from(self.bytes, self.pos + 2, b"?>") {
                    Some(end) => self.pos = end + 2,
                    None => {
                        self.pos = self.bytes.len();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, FrontendError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' | b'.')
        ) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(FrontendError::xml(self.pos, "expected a name"));
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn expect(&mut self, byte: u8) -> Result<(), FrontendError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(FrontendError::xml(
                self.pos,
                format!("expected '{}'", byte as char),
            ))
        }
    }

    fn parse_element(&mut self) -> Result<XmlNode, FrontendError> {
        self.expect(b'<')?;
        let name = self.parse_name()?;
        let mut node = XmlNode {
            name,
            attrs: Vec::new(),
            children: Vec::new(),
            text: String::new(),
        };

        // Attributes.
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'/') => {
                    self.pos += 1;
                    self.expect(b'>')?;
                    return Ok(node);
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let key = self.parse_name()?;
                    self.skip_whitespace();
                    self.expect(b'=')?;
                    self.skip_whitespace();
                    let quote = self.peek().ok_or_else(|| {
                        FrontendError::xml(self.pos, "unexpected end in attribute")
                    })?;
                    if quote != b'"' && quote != b'\'' {
                        return Err(FrontendError::xml(self.pos, "expected quoted value"));
                    }
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some() && self.peek() != Some(quote) {
                        self.pos += 1;
                    }
                    let raw =
                        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                    self.expect(quote)?;
                    node.attrs.push((key, unescape(&raw)));
                }
                None => return Err(FrontendError::xml(self.pos, "unexpected end in tag")),
            }
        }

        // Content: text and child elements until the closing tag.
        loop {
            if self.starts_with("<!--") || self.starts_with("<?") {
                self.skip_misc();
                continue;
            }
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.parse_name()?;
                if close != node.name {
                    return Err(FrontendError::xml(
                        self.pos,
                        format!("mismatched closing tag </{}> for <{}>", close, node.name),
                    ));
                }
                self.skip_whitespace();
                self.expect(b'>')?;
                return Ok(node);
            }
            match self.peek() {
                Some(b'<') => {
                    let child = self.parse_element()?;
                    node.children.push(child);
                }
                Some(_) => {
                    let start = self.pos;
                    while self.peek().is_some() && self.peek() != Some(b'<') {
                        self.pos += 1;
                    }
                    let raw =
                        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                    node.text.push_str(&unescape(&raw));
                }
                None => {
                    return Err(FrontendError::xml(
                        self.pos,
                        format!("unexpected end inside <{}>", node.name),
                    ))
                }
            }
        }
    }
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements() {
        let doc = r#"<A><B x="1"/><C>text</C></A>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "A");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].attr("x"), Some("1"));
        assert_eq!(root.children[1].text, "text");
    }

    #[test]
    fn decodes_entities() {
        let doc = r#"<T v="a&amp;b">1 &lt; 2</T>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.attr("v"), Some("a&b"));
        assert_eq!(root.text, "1 < 2");
    }

    #[test]
    fn escape_round_trips() {
        let s = "a<b>&\"'c";
        assert_eq!(unescape(&escape(s)), s);
    }

    #[test]
    fn skips_declaration_and_comments() {
        let doc = "<?xml version=\"1.0\"?><!-- hi --><R></R>";
        assert_eq!(parse(doc).unwrap().name, "R");
    }

    #[test]
    fn rejects_mismatched_tags() {
        let err = parse("<A></B>").unwrap_err();
        assert!(matches!(err, FrontendError::Xml { .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("<A/><B/>").is_err());
    }

    #[test]
    fn bool_attr_parses() {
        let root = parse(r#"<S outputSuppressed="true"/>"#).unwrap();
        assert!(root.bool_attr("outputSuppressed").unwrap());
    }
}
