use std::collections::HashMap;

use anyhow::Context;

use crate::models::ChatModel;
use crate::progress::ConsoleProgress;
use crate::prompts::{render_template, TERMINOLOGY_SYSTEM};
use crate::terminology::{TermEntry, Termbase};
use crate::textutil::{snippet, strip_wrapping_quotes};
use crate::xml::ElementRange;

use super::{parse_xliff, trans_units, unit_id, INLINE_CODE};

const REPORT_SNIPPET_CHARS: usize = 40;

/// Proposes a target that uses the required terminology. Returning the current target unchanged
/// means "nothing to fix".
pub trait TermCorrector {
    fn correct(&self, source: &str, target: &str, terms: &[&TermEntry]) -> anyhow::Result<String>;
}

impl<C: TermCorrector + ?Sized> TermCorrector for &C {
    fn correct(&self, source: &str, target: &str, terms: &[&TermEntry]) -> anyhow::Result<String> {
        (**self).correct(source, target, terms)
    }
}

/// A corrector that fills a `{{source}}` / `{{target}}` / `{{terms}}` template and asks a chat
/// model for the corrected target.
pub struct PromptCorrector<M> {
    model: M,
    template: String,
}

impl<M: ChatModel> PromptCorrector<M> {
    pub fn new(model: M, template: impl Into<String>) -> Self {
        Self {
            model,
            template: template.into(),
        }
    }
}

impl<M: ChatModel> TermCorrector for PromptCorrector<M> {
    fn correct(&self, source: &str, target: &str, terms: &[&TermEntry]) -> anyhow::Result<String> {
        let rendered_terms = Termbase::render_for_prompt(terms);
        let prompt = render_template(
            &self.template,
            &[
                ("source", source),
                ("target", target),
                ("terms", rendered_terms.trim_end()),
            ],
        );
        self.model.chat(TERMINOLOGY_SYSTEM, &prompt)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermFix {
    pub unit_id: String,
    pub before: String,
    pub after: String,
}

impl TermFix {
    pub fn render(&self) -> String {
        format!(
            "FIXED Unit ID '{}': From '{}' to '{}'",
            self.unit_id,
            snippet(&self.before, REPORT_SNIPPET_CHARS),
            snippet(&self.after, REPORT_SNIPPET_CHARS)
        )
    }
}

#[derive(Debug)]
pub struct TermOutput {
    pub document: String,
    pub fixes: Vec<TermFix>,
    /// Units whose target holds inline markup and was left alone.
    pub skipped: Vec<String>,
}

impl TermOutput {
    pub fn render_report(&self) -> String {
        let mut lines: Vec<String> = self.fixes.iter().map(TermFix::render).collect();
        lines.extend(self.skipped.iter().map(|id| {
            format!("SKIPPED Unit ID '{id}': target contains inline markup")
        }));
        if self.fixes.is_empty() {
            lines.insert(0, "No terminology issues found or fixed.".to_string());
        }
        lines.join("\n")
    }
}

struct SourceGroup {
    source: String,
    // (unit, target)
    members: Vec<(ElementRange, ElementRange)>,
}

/// Asks `corrector` once per distinct source that mentions a termbase entry and writes the
/// correction to every unit sharing that source.
pub fn fix_terminology<C: TermCorrector + ?Sized>(
    text: &str,
    termbase: &Termbase,
    corrector: &C,
    progress: &ConsoleProgress,
) -> anyhow::Result<TermOutput> {
    let (mut doc, root) = parse_xliff(text)?;

    // First-seen order in `groups`; `by_source` indexes into it.
    let mut groups: Vec<SourceGroup> = Vec::new();
    let mut by_source: HashMap<String, usize> = HashMap::new();
    for unit in trans_units(&doc, root) {
        let (Some(source), Some(target)) = (
            doc.first_child_named(unit, "source"),
            doc.first_child_named(unit, "target"),
        ) else {
            continue;
        };
        let source_text = doc.text_content(source, INLINE_CODE);
        if source_text.trim().is_empty() {
            continue;
        }
        match by_source.get(&source_text) {
            Some(&i) => groups[i].members.push((unit, target)),
            None => {
                by_source.insert(source_text.clone(), groups.len());
                groups.push(SourceGroup {
                    source: source_text,
                    members: vec![(unit, target)],
                });
            }
        }
    }

    let mut fixes = Vec::new();
    let mut skipped = Vec::new();
    let mut replacements: Vec<(ElementRange, String)> = Vec::new();
    let total = groups.len();
    for (i, group) in groups.iter().enumerate() {
        progress.progress("Terminology", i + 1, total);
        let terms = termbase.relevant_for_text(&group.source);
        if terms.is_empty() {
            continue;
        }
        let (_, first_target) = group.members[0];
        let current = doc.text_content(first_target, INLINE_CODE);
        let reply = corrector
            .correct(&group.source, &current, &terms)
            .with_context(|| format!("terminology correction for '{}'", snippet(&group.source, 40)))?;
        let corrected = strip_wrapping_quotes(reply.trim());
        if corrected.is_empty() {
            progress.warn(format!(
                "empty correction ignored for '{}'",
                snippet(&group.source, 40)
            ));
            continue;
        }
        if corrected == current {
            continue;
        }

        for (unit, target) in &group.members {
            let id = unit_id(&doc, *unit);
            if !doc.has_plain_text_only(*target) {
                skipped.push(id);
                continue;
            }
            let before = doc.text_content(*target, &[]);
            if before == corrected {
                continue;
            }
            fixes.push(TermFix {
                unit_id: id,
                before,
                after: corrected.to_string(),
            });
            replacements.push((*target, corrected.to_string()));
        }
    }

    if replacements.is_empty() {
        return Ok(TermOutput {
            document: text.to_string(),
            fixes,
            skipped,
        });
    }
    // Back to front so earlier ranges stay valid.
    replacements.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (target, new_text) in &replacements {
        doc.replace_text(*target, new_text);
    }
    Ok(TermOutput {
        document: doc.to_xml_string()?,
        fixes,
        skipped,
    })
}
