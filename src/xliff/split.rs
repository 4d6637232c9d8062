use std::io::{Cursor, Write};

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::xml::{write_events, XmlDocument, XmlEvent};

use super::{parse_xliff, trans_units};

pub const DEFAULT_SPLIT_EXTENSION: &str = "mqxliff";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorGroup {
    pub code: String,
    pub entry_name: String,
    pub unit_count: usize,
}

#[derive(Debug)]
pub struct SplitOutput {
    /// ZIP bytes; `None` when no unit carries an error code.
    pub archive: Option<Vec<u8>>,
    pub groups: Vec<ErrorGroup>,
}

impl SplitOutput {
    pub fn render_report(&self) -> String {
        if self.groups.is_empty() {
            return "No segments with error codes found.".to_string();
        }
        self.groups
            .iter()
            .map(|g| {
                format!(
                    "Created file for error code {} with {} segments.",
                    g.code, g.unit_count
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Groups trans-units by the `code` of their `errorwarning` descendants and packs one standalone
/// document per code into a ZIP. `extension` names the entries (`error_<code>.<extension>`).
pub fn split_by_error_code(text: &str, extension: &str) -> anyhow::Result<SplitOutput> {
    let (doc, root) = parse_xliff(text)?;

    // (code, unit start indices) in first-seen order.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for unit in trans_units(&doc, root) {
        for warning in doc.descendants_named(unit, "errorwarning") {
            let Some(code) = doc.attr(warning, "code").filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            let pos = match groups.iter().position(|(c, _)| *c == code) {
                Some(pos) => pos,
                None => {
                    groups.push((code, Vec::new()));
                    groups.len() - 1
                }
            };
            let members = &mut groups[pos].1;
            if !members.contains(&unit.start) {
                members.push(unit.start);
            }
        }
    }

    if groups.is_empty() {
        return Ok(SplitOutput {
            archive: None,
            groups: Vec::new(),
        });
    }

    let extension = extension.trim_start_matches('.');
    let extension = if extension.is_empty() {
        DEFAULT_SPLIT_EXTENSION
    } else {
        extension
    };

    let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut report = Vec::with_capacity(groups.len());
    let mut used_names: Vec<String> = Vec::new();
    for (code, members) in &groups {
        let mut entry_name = format!("error_{}.{extension}", sanitize_code(code));
        let mut n = 2;
        while used_names.contains(&entry_name) {
            entry_name = format!("error_{}_{n}.{extension}", sanitize_code(code));
            n += 1;
        }
        used_names.push(entry_name.clone());

        let body = standalone_document(&doc, members)?;
        zout.start_file(entry_name.as_str(), opts)
            .with_context(|| format!("start zip file: {entry_name}"))?;
        zout.write_all(&body)
            .with_context(|| format!("write zip file: {entry_name}"))?;
        report.push(ErrorGroup {
            code: code.clone(),
            entry_name,
            unit_count: members.len(),
        });
    }
    let archive = zout.finish().context("finish zip")?.into_inner();

    Ok(SplitOutput {
        archive: Some(archive),
        groups: report,
    })
}

/// Declaration, root, the first `file` and a `body` wrapping copies of the given units.
fn standalone_document(doc: &XmlDocument, unit_starts: &[usize]) -> anyhow::Result<Vec<u8>> {
    let mut events: Vec<XmlEvent> = Vec::new();
    if let Some(XmlEvent::Decl {
        version,
        encoding,
        standalone,
    }) = doc.events.first()
    {
        // Entries are always written as UTF-8.
        events.push(XmlEvent::Decl {
            version: version.clone(),
            encoding: encoding.as_ref().map(|_| "UTF-8".to_string()),
            standalone: standalone.clone(),
        });
        events.push(newline(""));
    }

    let Some(root) = doc.root() else {
        return write_events(&events);
    };
    let root_name = doc.name(root).to_string();
    let file = doc.descendants_named(root, "file").into_iter().next();
    let file_name = file
        .map(|f| doc.name(f).to_string())
        .unwrap_or_else(|| "file".to_string());
    let file_attrs = file.map(|f| doc.attrs(f).to_vec()).unwrap_or_default();
    let body_name = file
        .and_then(|f| doc.first_child_named(f, "body"))
        .map(|b| doc.name(b).to_string())
        .unwrap_or_else(|| "body".to_string());

    events.push(XmlEvent::Start {
        name: root_name.clone(),
        attrs: doc.attrs(root).to_vec(),
    });
    events.push(newline("  "));
    events.push(XmlEvent::Start {
        name: file_name.clone(),
        attrs: file_attrs,
    });
    events.push(newline("    "));
    events.push(XmlEvent::Start {
        name: body_name.clone(),
        attrs: Vec::new(),
    });
    for start in unit_starts {
        let Some(unit) = doc.element_at(*start) else {
            continue;
        };
        events.push(newline("      "));
        events.extend_from_slice(&doc.events[unit.start..=unit.end]);
    }
    events.push(newline("    "));
    events.push(XmlEvent::End { name: body_name });
    events.push(newline("  "));
    events.push(XmlEvent::End { name: file_name });
    events.push(newline(""));
    events.push(XmlEvent::End { name: root_name });
    events.push(newline(""));
    write_events(&events)
}

fn newline(indent: &str) -> XmlEvent {
    XmlEvent::text(format!("\n{indent}"))
}

fn sanitize_code(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
