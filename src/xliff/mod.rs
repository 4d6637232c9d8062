//! Batch tools for XLIFF 1.2 and memoQ MQXLIFF files: splitting by QA error code, mechanical
//! whitespace fixes and termbase-driven target corrections.

mod qa;
mod split;
mod terms;

pub use qa::{resolve_qa, QaOptions, QaOutput};
pub use split::{split_by_error_code, ErrorGroup, SplitOutput, DEFAULT_SPLIT_EXTENSION};
pub use terms::{fix_terminology, PromptCorrector, TermCorrector, TermFix, TermOutput};

use anyhow::{anyhow, Context};

use crate::xml::{ElementRange, XmlDocument};

/// Inline native-code elements whose content is not translatable text.
pub(crate) const INLINE_CODE: &[&str] = &["bpt", "ept", "it", "ph"];

pub(crate) fn parse_xliff(text: &str) -> anyhow::Result<(XmlDocument, ElementRange)> {
    let doc = XmlDocument::parse(text.as_bytes()).context("parse xliff")?;
    let root = doc
        .root()
        .ok_or_else(|| anyhow!("document has no root element"))?;
    Ok((doc, root))
}

/// Every `trans-unit`, nested groups included, in document order.
pub(crate) fn trans_units(doc: &XmlDocument, root: ElementRange) -> Vec<ElementRange> {
    doc.descendants_named(root, "trans-unit")
}

pub(crate) fn unit_id(doc: &XmlDocument, unit: ElementRange) -> String {
    doc.attr(unit, "id").unwrap_or_default()
}
