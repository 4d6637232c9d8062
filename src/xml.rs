use std::borrow::Cow;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    /// `text` is unescaped. `raw` keeps the escaped source form so untouched text is written
    /// back byte for byte; anything that edits `text` must clear it.
    Text {
        text: String,
        raw: Option<String>,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    /// A text node with no source form, escaped on write.
    pub fn text(text: impl Into<String>) -> Self {
        XmlEvent::Text {
            text: text.into(),
            raw: None,
        }
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, XmlEvent::Text { text, .. } if text.trim().is_empty())
    }
}

/// An element located in [`XmlDocument::events`].
///
/// `start` is the index of its `Start`/`Empty` event and `end` the index of the matching `End`
/// event (equal to `start` for empty elements).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementRange {
    pub start: usize,
    pub end: usize,
}

impl ElementRange {
    pub fn is_empty_element(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Clone, Debug)]
pub struct XmlDocument {
    pub events: Vec<XmlEvent>,
}

impl XmlDocument {
    pub fn parse(xml_bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Reader::from_reader(xml_bytes);
        reader.config_mut().trim_text(false);

        let mut events: Vec<XmlEvent> = Vec::new();
        let mut open: Vec<String> = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let pos = reader.buffer_position();
            let ev = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("read xml event near byte {pos}"))?;
            match ev {
                Event::Eof => break,
                Event::Decl(d) => {
                    let version = bytes_to_string(d.version().context("decl version")?);
                    let encoding = d
                        .encoding()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    let standalone = d
                        .standalone()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    events.push(XmlEvent::Decl {
                        version,
                        encoding,
                        standalone,
                    });
                }
                Event::Start(s) => {
                    let name = bytes_to_string(s.name().as_ref());
                    open.push(name.clone());
                    events.push(XmlEvent::Start {
                        name,
                        attrs: collect_attrs(&s)?,
                    });
                }
                Event::End(e) => {
                    let name = bytes_to_string(e.name().as_ref());
                    match open.pop() {
                        Some(expected) if expected == name => {}
                        Some(expected) => {
                            return Err(anyhow!(
                                "mismatched end tag: expected </{expected}>, found </{name}>"
                            ))
                        }
                        None => return Err(anyhow!("unexpected end tag </{name}>")),
                    }
                    events.push(XmlEvent::End { name });
                }
                Event::Empty(s) => {
                    events.push(XmlEvent::Empty {
                        name: bytes_to_string(s.name().as_ref()),
                        attrs: collect_attrs(&s)?,
                    });
                }
                Event::Text(t) => {
                    let raw = bytes_to_string(&*t);
                    let text = t.unescape().context("unescape text")?.into_owned();
                    events.push(XmlEvent::Text {
                        text,
                        raw: Some(raw),
                    });
                }
                Event::CData(t) => {
                    events.push(XmlEvent::CData {
                        text: bytes_to_string(t.into_inner()),
                    });
                }
                Event::Comment(t) => {
                    events.push(XmlEvent::Comment {
                        text: bytes_to_string(t.into_inner()),
                    });
                }
                Event::PI(t) => {
                    let target = bytes_to_string(t.target());
                    let content = bytes_to_string(t.content());
                    events.push(XmlEvent::PI {
                        content: format!("{target}{content}"),
                    });
                }
                Event::DocType(t) => {
                    events.push(XmlEvent::DocType {
                        text: bytes_to_string(t.into_inner()),
                    });
                }
            }
        }

        if let Some(name) = open.last() {
            return Err(anyhow!("unexpected end of document: <{name}> is not closed"));
        }
        let doc = Self { events };
        if doc.root().is_none() {
            return Err(anyhow!("document has no root element"));
        }
        Ok(doc)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        write_events(&self.events)
    }

    pub fn to_xml_string(&self) -> anyhow::Result<String> {
        String::from_utf8(self.to_bytes()?).context("serialized xml is not utf-8")
    }

    pub fn root(&self) -> Option<ElementRange> {
        let start = self
            .events
            .iter()
            .position(|ev| matches!(ev, XmlEvent::Start { .. } | XmlEvent::Empty { .. }))?;
        self.element_at(start)
    }

    /// Resolves the element whose opening event sits at `start`.
    pub fn element_at(&self, start: usize) -> Option<ElementRange> {
        match self.events.get(start)? {
            XmlEvent::Empty { .. } => Some(ElementRange { start, end: start }),
            XmlEvent::Start { .. } => {
                let mut depth = 0usize;
                for (idx, ev) in self.events.iter().enumerate().skip(start) {
                    match ev {
                        XmlEvent::Start { .. } => depth += 1,
                        XmlEvent::End { .. } => {
                            depth -= 1;
                            if depth == 0 {
                                return Some(ElementRange { start, end: idx });
                            }
                        }
                        _ => {}
                    }
                }
                None
            }
            _ => None,
        }
    }

    pub fn children(&self, parent: ElementRange) -> Vec<ElementRange> {
        let mut out = Vec::new();
        if parent.is_empty_element() {
            return out;
        }
        let mut idx = parent.start + 1;
        while idx < parent.end {
            match &self.events[idx] {
                XmlEvent::Start { .. } | XmlEvent::Empty { .. } => match self.element_at(idx) {
                    Some(child) => {
                        out.push(child);
                        idx = child.end + 1;
                    }
                    None => break,
                },
                _ => idx += 1,
            }
        }
        out
    }

    pub fn children_named(&self, parent: ElementRange, local: &str) -> Vec<ElementRange> {
        self.children(parent)
            .into_iter()
            .filter(|c| local_name(self.name(*c)) == local)
            .collect()
    }

    pub fn first_child_named(&self, parent: ElementRange, local: &str) -> Option<ElementRange> {
        self.children(parent)
            .into_iter()
            .find(|c| local_name(self.name(*c)) == local)
    }

    /// All elements below `parent` (at any depth) with the given local name, in document order.
    pub fn descendants_named(&self, parent: ElementRange, local: &str) -> Vec<ElementRange> {
        let mut out = Vec::new();
        if parent.is_empty_element() {
            return out;
        }
        for idx in parent.start + 1..parent.end {
            match &self.events[idx] {
                XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. }
                    if local_name(name) == local =>
                {
                    if let Some(el) = self.element_at(idx) {
                        out.push(el);
                    }
                }
                _ => {}
            }
        }
        out
    }

    pub fn name(&self, el: ElementRange) -> &str {
        match &self.events[el.start] {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => name,
            _ => "",
        }
    }

    pub fn attrs(&self, el: ElementRange) -> &[(String, String)] {
        match &self.events[el.start] {
            XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Unescaped attribute value. Matches the qualified name first, then the local name.
    pub fn attr(&self, el: ElementRange, key: &str) -> Option<String> {
        let attrs = self.attrs(el);
        let raw = attrs
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| attrs.iter().find(|(k, _)| local_name(k) == key))
            .map(|(_, v)| v.as_str())?;
        Some(unescape_attr(raw).into_owned())
    }

    /// Concatenated text and CDATA below `el`, skipping the content of elements whose local
    /// name is in `skip`.
    pub fn text_content(&self, el: ElementRange, skip: &[&str]) -> String {
        let mut out = String::new();
        if el.is_empty_element() {
            return out;
        }
        let mut skip_depth = 0usize;
        for ev in &self.events[el.start + 1..el.end] {
            match ev {
                XmlEvent::Start { name, .. } => {
                    if skip_depth > 0 || skip.contains(&local_name(name)) {
                        skip_depth += 1;
                    }
                }
                XmlEvent::End { .. } => {
                    skip_depth = skip_depth.saturating_sub(1);
                }
                XmlEvent::Text { text, .. } | XmlEvent::CData { text } if skip_depth == 0 => {
                    out.push_str(text);
                }
                _ => {}
            }
        }
        out
    }

    /// True when the element holds nothing but text (no child elements, comments or CDATA).
    pub fn has_plain_text_only(&self, el: ElementRange) -> bool {
        if el.is_empty_element() {
            return true;
        }
        self.events[el.start + 1..el.end]
            .iter()
            .all(|ev| matches!(ev, XmlEvent::Text { .. }))
    }

    /// Replaces the content of `el` with a single text node. An empty element is expanded into a
    /// start/end pair. Returns how many events the document grew (or shrank) by.
    pub fn replace_text(&mut self, el: ElementRange, text: &str) -> isize {
        let before = self.events.len();
        let (name, attrs) = match &self.events[el.start] {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
                (name.clone(), attrs.clone())
            }
            _ => return 0,
        };
        let mut replacement = vec![XmlEvent::Start {
            name: name.clone(),
            attrs,
        }];
        if !text.is_empty() {
            replacement.push(XmlEvent::text(text));
        }
        replacement.push(XmlEvent::End { name });
        self.events.splice(el.start..=el.end, replacement);
        self.events.len() as isize - before as isize
    }

    /// SHA-256 over every event outside the `skip` ranges. Whitespace-only text that sits directly
    /// inside `indent_parent` is ignored, since dropping an element also drops its indentation.
    pub fn skeleton_hash(&self, skip: &[ElementRange], indent_parent: Option<ElementRange>) -> String {
        let mut hasher = Sha256::new();
        let mut idx = 0usize;
        let mut depth_in_parent = 0usize;
        while idx < self.events.len() {
            if let Some(r) = skip.iter().find(|r| r.start == idx) {
                idx = r.end + 1;
                continue;
            }
            let ev = &self.events[idx];
            if let Some(parent) = indent_parent {
                if idx > parent.start && idx < parent.end {
                    let direct = depth_in_parent == 0;
                    match ev {
                        XmlEvent::Start { .. } => depth_in_parent += 1,
                        XmlEvent::End { .. } => depth_in_parent = depth_in_parent.saturating_sub(1),
                        _ => {}
                    }
                    if direct && ev.is_blank_text() {
                        idx += 1;
                        continue;
                    }
                }
            }
            hash_event(&mut hasher, ev);
            idx += 1;
        }
        hex::encode(hasher.finalize())
    }
}

/// Strips a namespace prefix (`mq:errorwarning` -> `errorwarning`).
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

pub fn unescape_attr(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape(raw).unwrap_or(Cow::Borrowed(raw))
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        let key = bytes_to_string(a.key.as_ref());
        // Raw (still escaped) so values such as `&#10;` survive the round-trip untouched.
        let val = bytes_to_string(a.value.as_ref());
        attrs.push((key, val));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn write_events(events: &[XmlEvent]) -> anyhow::Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();

    fn escape_text_into(out: &mut Vec<u8>, text: &str) {
        for ch in text.chars() {
            match ch {
                '&' => out.extend_from_slice(b"&amp;"),
                '<' => out.extend_from_slice(b"&lt;"),
                '>' => out.extend_from_slice(b"&gt;"),
                _ => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn write_start_like(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
        out.push(b'<');
        out.extend_from_slice(name.as_bytes());
        for (k, v) in attrs {
            out.push(b' ');
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(v.as_bytes());
            out.push(b'"');
        }
        if empty {
            out.extend_from_slice(b"/>");
        } else {
            out.push(b'>');
        }
    }

    for ev in events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                let d =
                    BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                let mut writer = quick_xml::Writer::new(Vec::new());
                writer.write_event(Event::Decl(d)).context("write decl")?;
                out.extend_from_slice(&writer.into_inner());
            }
            XmlEvent::Start { name, attrs } => write_start_like(&mut out, name, attrs, false),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
            }
            XmlEvent::Empty { name, attrs } => write_start_like(&mut out, name, attrs, true),
            XmlEvent::Text { raw: Some(raw), .. } => out.extend_from_slice(raw.as_bytes()),
            XmlEvent::Text { text, raw: None } => escape_text_into(&mut out, text),
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.push(b'>');
            }
        }
    }

    Ok(out)
}

fn hash_event(hasher: &mut Sha256, ev: &XmlEvent) {
    match ev {
        XmlEvent::Decl {
            version,
            encoding,
            standalone,
        } => {
            hasher.update(b"D:");
            hasher.update(version.as_bytes());
            hasher.update(b"|");
            if let Some(e) = encoding.as_ref() {
                hasher.update(e.as_bytes());
            }
            hasher.update(b"|");
            if let Some(s) = standalone.as_ref() {
                hasher.update(s.as_bytes());
            }
        }
        XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
            hasher.update(if matches!(ev, XmlEvent::Empty { .. }) { b"X:" } else { b"S:" });
            hasher.update(name.as_bytes());
            for (k, v) in attrs {
                hasher.update(b"|");
                hasher.update(k.as_bytes());
                hasher.update(b"=");
                hasher.update(v.as_bytes());
            }
        }
        XmlEvent::End { name } => {
            hasher.update(b"E:");
            hasher.update(name.as_bytes());
        }
        XmlEvent::Text { text, .. } => {
            hasher.update(b"T:");
            hasher.update(text.as_bytes());
        }
        XmlEvent::CData { text } => {
            hasher.update(b"C:");
            hasher.update(text.as_bytes());
        }
        XmlEvent::Comment { text } => {
            hasher.update(b"M:");
            hasher.update(text.as_bytes());
        }
        XmlEvent::PI { content } => {
            hasher.update(b"P:");
            hasher.update(content.as_bytes());
        }
        XmlEvent::DocType { text } => {
            hasher.update(b"Y:");
            hasher.update(text.as_bytes());
        }
    }
    hasher.update(b"\n");
}
