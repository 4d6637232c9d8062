use std::collections::HashSet;

use serde::Deserialize;

use crate::error::CleanError;
use crate::xml::{ElementRange, XmlDocument, XmlEvent};

/// Inline elements whose content is native markup, not translatable text.
const CODE_ELEMENTS: &[&str] = &["bpt", "ept", "it", "ph", "ut"];

/// How the source and target `<tuv>` of a unit are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantSelection {
    /// First `<tuv>` is the source, second is the target.
    #[default]
    Positional,
    /// The `<tuv>` tagged with the header's `srclang` is the source; the first other one is the
    /// target. Falls back to positional when the header names no usable source language.
    LanguageTag,
}

impl VariantSelection {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("").trim().to_ascii_lowercase().as_str() {
            "language-tag" | "language_tag" | "lang" => Self::LanguageTag,
            _ => Self::Positional,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextVariant {
    pub lang: Option<String>,
    /// `None` when the variant has no `<seg>`.
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationUnit {
    /// Position among the `<tu>` elements of the body.
    pub index: usize,
    pub id: Option<String>,
    pub source: Option<TextVariant>,
    pub target: Option<TextVariant>,
}

pub struct TmxDocument {
    xml: XmlDocument,
    body: ElementRange,
    unit_ranges: Vec<ElementRange>,
    units: Vec<TranslationUnit>,
}

impl TmxDocument {
    pub fn parse(text: &str, selection: VariantSelection) -> Result<Self, CleanError> {
        let xml = XmlDocument::parse(text.as_bytes())
            .map_err(|err| CleanError::DocumentParse(format!("{err:#}")))?;
        let root = xml
            .root()
            .ok_or_else(|| CleanError::DocumentParse("document has no root element".into()))?;
        let body = xml
            .first_child_named(root, "body")
            .ok_or_else(|| CleanError::DocumentParse("<body> element not found".into()))?;

        let srclang = match selection {
            VariantSelection::Positional => None,
            VariantSelection::LanguageTag => xml
                .first_child_named(root, "header")
                .and_then(|h| xml.attr(h, "srclang"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("*all*")),
        };

        let unit_ranges = xml.children_named(body, "tu");
        let units = unit_ranges
            .iter()
            .enumerate()
            .map(|(index, tu)| read_unit(&xml, *tu, index, srclang.as_deref()))
            .collect();

        Ok(Self {
            xml,
            body,
            unit_ranges,
            units,
        })
    }

    pub fn units(&self) -> &[TranslationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Serializes the document with only the units at `keep` (by [`TranslationUnit::index`]).
    /// Everything outside the body's `<tu>` list is written back unchanged.
    pub fn write_retaining(&self, keep: &[usize]) -> Result<String, CleanError> {
        let keep: HashSet<usize> = keep.iter().copied().collect();
        let events = &self.xml.events;
        let mut dropped = vec![false; events.len()];
        let mut removed: Vec<ElementRange> = Vec::new();

        for (index, range) in self.unit_ranges.iter().enumerate() {
            if keep.contains(&index) {
                continue;
            }
            removed.push(*range);
            for flag in &mut dropped[range.start..=range.end] {
                *flag = true;
            }
            // Indentation in front of the unit goes with it.
            let prev = range.start - 1;
            if prev > self.body.start
                && !dropped[prev]
                && matches!(&events[prev], XmlEvent::Text { text, .. } if text.trim().is_empty())
            {
                dropped[prev] = true;
            }
        }

        let out = XmlDocument {
            events: events
                .iter()
                .zip(dropped.iter())
                .filter(|(_, d)| !**d)
                .map(|(ev, _)| ev.clone())
                .collect(),
        };

        let out_body = out
            .root()
            .and_then(|r| out.first_child_named(r, "body"))
            .ok_or_else(|| CleanError::Output("<body> lost while removing units".into()))?;
        let before = self.xml.skeleton_hash(&removed, Some(self.body));
        let after = out.skeleton_hash(&[], Some(out_body));
        if before != after {
            return Err(CleanError::Output(format!(
                "structure outside removed units changed (before={before} after={after})"
            )));
        }

        out.to_xml_string()
            .map_err(|err| CleanError::Output(format!("{err:#}")))
    }
}

fn read_unit(
    xml: &XmlDocument,
    tu: ElementRange,
    index: usize,
    srclang: Option<&str>,
) -> TranslationUnit {
    let tuvs: Vec<TextVariant> = xml
        .children_named(tu, "tuv")
        .into_iter()
        .map(|tuv| read_variant(xml, tuv))
        .collect();

    let (source, target) = match srclang.and_then(|lang| pick_by_language(&tuvs, lang)) {
        Some((s, t)) => (Some(tuvs[s].clone()), t.map(|t| tuvs[t].clone())),
        None => (tuvs.first().cloned(), tuvs.get(1).cloned()),
    };

    TranslationUnit {
        index,
        id: xml.attr(tu, "tuid"),
        source,
        target,
    }
}

fn read_variant(xml: &XmlDocument, tuv: ElementRange) -> TextVariant {
    let lang = xml
        .attr(tuv, "xml:lang")
        .or_else(|| xml.attr(tuv, "lang"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let text = xml
        .first_child_named(tuv, "seg")
        .map(|seg| xml.text_content(seg, CODE_ELEMENTS));
    TextVariant { lang, text }
}

/// Index of the source variant and, when one exists, the first other variant.
fn pick_by_language(tuvs: &[TextVariant], srclang: &str) -> Option<(usize, Option<usize>)> {
    let primary = |tag: &str| tag.split(['-', '_']).next().unwrap_or(tag).to_ascii_lowercase();
    let src = tuvs
        .iter()
        .position(|v| v.lang.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(srclang)))
        .or_else(|| {
            let want = primary(srclang);
            tuvs.iter()
                .position(|v| v.lang.as_deref().is_some_and(|l| primary(l) == want))
        })?;
    let tgt = (0..tuvs.len()).find(|i| *i != src);
    Some((src, tgt))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tmx version="1.4">
  <header srclang="en-US" datatype="plaintext" segtype="sentence"/>
  <body>
    <tu tuid="1">
      <tuv xml:lang="fr-FR"><seg>Bonjour</seg></tuv>
      <tuv xml:lang="en-US"><seg>Hello</seg></tuv>
    </tu>
    <tu tuid="2">
      <tuv lang="en"><seg>Save <bpt i="1">&lt;b&gt;</bpt>now<ept i="1">&lt;/b&gt;</ept></seg></tuv>
      <tuv lang="de"/>
    </tu>
    <tu><tuv xml:lang="en"><seg>Only one</seg></tuv></tu>
  </body>
</tmx>"#;

    #[test]
    fn positional_selection_reads_units_in_order() {
        let doc = TmxDocument::parse(SAMPLE, VariantSelection::Positional).expect("parse");
        assert_eq!(doc.len(), 3);
        let first = &doc.units()[0];
        assert_eq!(first.id.as_deref(), Some("1"));
        assert_eq!(first.source.as_ref().and_then(|v| v.text.as_deref()), Some("Bonjour"));
        assert_eq!(first.target.as_ref().and_then(|v| v.lang.as_deref()), Some("en-US"));

        let second = &doc.units()[1];
        assert_eq!(second.source.as_ref().and_then(|v| v.text.as_deref()), Some("Save now"));
        assert_eq!(second.target.as_ref().map(|v| v.text.is_none()), Some(true));

        let third = &doc.units()[2];
        assert!(third.id.is_none());
        assert!(third.target.is_none());
    }

    #[test]
    fn language_tag_selection_follows_header_srclang() {
        let doc = TmxDocument::parse(SAMPLE, VariantSelection::LanguageTag).expect("parse");
        let first = &doc.units()[0];
        assert_eq!(first.source.as_ref().and_then(|v| v.text.as_deref()), Some("Hello"));
        assert_eq!(first.target.as_ref().and_then(|v| v.text.as_deref()), Some("Bonjour"));
        // "en" matches "en-US" by primary subtag.
        let second = &doc.units()[1];
        assert_eq!(second.source.as_ref().and_then(|v| v.lang.as_deref()), Some("en"));
    }

    #[test]
    fn language_tag_selection_falls_back_without_srclang() {
        let xml = r#"<tmx><header srclang="*all*"/><body><tu><tuv xml:lang="de"><seg>a</seg></tuv><tuv xml:lang="en"><seg>b</seg></tuv></tu></body></tmx>"#;
        let doc = TmxDocument::parse(xml, VariantSelection::LanguageTag).expect("parse");
        assert_eq!(
            doc.units()[0].source.as_ref().and_then(|v| v.text.as_deref()),
            Some("a")
        );
    }

    #[test]
    fn missing_body_is_a_parse_error() {
        let err = TmxDocument::parse("<tmx><header/></tmx>", VariantSelection::Positional)
            .err()
            .expect("error");
        assert!(matches!(err, CleanError::DocumentParse(msg) if msg.contains("<body>")));

        let err = TmxDocument::parse("<tmx><body>", VariantSelection::Positional)
            .err()
            .expect("error");
        assert!(matches!(err, CleanError::DocumentParse(_)));
    }

    #[test]
    fn empty_body_has_no_units() {
        let doc = TmxDocument::parse("<tmx><body/></tmx>", VariantSelection::Positional)
            .expect("parse");
        assert!(doc.is_empty());
        assert_eq!(doc.write_retaining(&[]).expect("write"), "<tmx><body/></tmx>");
    }

    #[test]
    fn write_retaining_drops_units_and_their_indentation() {
        let doc = TmxDocument::parse(SAMPLE, VariantSelection::Positional).expect("parse");
        let out = doc.write_retaining(&[1]).expect("write");
        assert!(!out.contains("tuid=\"1\""));
        assert!(out.contains("tuid=\"2\""));
        assert!(!out.contains("Only one"));
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<tmx version=\"1.4\">"));
        assert!(out.contains("<header srclang=\"en-US\" datatype=\"plaintext\" segtype=\"sentence\"/>"));
        assert!(out.contains("<body>\n    <tu tuid=\"2\">"));
        assert!(out.contains("</tu>\n  </body>\n</tmx>"));
        assert!(out.contains("&lt;b&gt;"));
    }

    #[test]
    fn write_retaining_everything_round_trips() {
        let doc = TmxDocument::parse(SAMPLE, VariantSelection::Positional).expect("parse");
        assert_eq!(doc.write_retaining(&[0, 1, 2]).expect("write"), SAMPLE);
    }
}
