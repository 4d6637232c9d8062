use crate::textutil::{collapse_spaces, trim_lines};
use crate::xml::XmlEvent;

use super::parse_xliff;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QaOptions {
    pub fix_double_spaces: bool,
    pub fix_line_endings: bool,
}

#[derive(Debug)]
pub struct QaOutput {
    pub document: String,
    pub double_spaces_fixed: usize,
    pub line_endings_fixed: usize,
}

impl QaOutput {
    pub fn changed(&self) -> bool {
        self.double_spaces_fixed > 0 || self.line_endings_fixed > 0
    }

    pub fn render_report(&self) -> String {
        let mut lines = Vec::new();
        if self.double_spaces_fixed > 0 {
            lines.push(format!(
                "Fixed double spaces in {} segments.",
                self.double_spaces_fixed
            ));
        }
        if self.line_endings_fixed > 0 {
            lines.push(format!(
                "Stripped leading/trailing whitespace from lines in {} segments.",
                self.line_endings_fixed
            ));
        }
        if lines.is_empty() {
            return "No issues found or no checks selected.".to_string();
        }
        lines.join("\n")
    }
}

/// Mechanical whitespace fixes on `target` text. Space runs are collapsed in every text node of a
/// target; line trimming only touches targets without inline markup, since the whitespace around
/// a tag is part of the sentence.
pub fn resolve_qa(text: &str, opts: QaOptions) -> anyhow::Result<QaOutput> {
    let (mut doc, root) = parse_xliff(text)?;
    let targets = doc.descendants_named(root, "target");

    let mut double_spaces_fixed = 0usize;
    let mut line_endings_fixed = 0usize;
    for target in targets {
        if target.is_empty_element() {
            continue;
        }
        let plain = doc.has_plain_text_only(target);

        let mut spaces_changed = false;
        let mut lines_changed = false;
        for ev in &mut doc.events[target.start + 1..target.end] {
            let XmlEvent::Text { text, raw } = ev else {
                continue;
            };
            if opts.fix_double_spaces && text.contains("  ") {
                *text = collapse_spaces(text);
                *raw = None;
                spaces_changed = true;
            }
            if opts.fix_line_endings && plain {
                let trimmed = trim_lines(text);
                if trimmed != *text {
                    *text = trimmed;
                    *raw = None;
                    lines_changed = true;
                }
            }
        }
        double_spaces_fixed += usize::from(spaces_changed);
        line_endings_fixed += usize::from(lines_changed);
    }

    let document = if double_spaces_fixed + line_endings_fixed > 0 {
        doc.to_xml_string()?
    } else {
        text.to_string()
    };
    Ok(QaOutput {
        document,
        double_spaces_fixed,
        line_endings_fixed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<xliff><file><body>\
<trans-unit id=\"1\"><source>A  b</source><target>Ein  Satz   hier</target></trans-unit>\
<trans-unit id=\"2\"><source>x</source><target>  erste \n zweite  </target></trans-unit>\
<trans-unit id=\"3\"><source>y</source><target>Klick  <g id=\"1\">hier</g> jetzt </target></trans-unit>\
<trans-unit id=\"4\"><source>z</source><target/></trans-unit>\
</body></file></xliff>";

    #[test]
    fn double_spaces_only_touch_targets() {
        let out = resolve_qa(
            SAMPLE,
            QaOptions {
                fix_double_spaces: true,
                fix_line_endings: false,
            },
        )
        .expect("qa");
        assert_eq!(out.double_spaces_fixed, 3);
        assert!(out.document.contains("<source>A  b</source>"));
        assert!(out.document.contains("<target>Ein Satz hier</target>"));
        assert!(out.document.contains("<target>Klick <g id=\"1\">hier</g> jetzt </target>"));
        assert_eq!(out.render_report(), "Fixed double spaces in 3 segments.");
    }

    #[test]
    fn line_trimming_skips_inline_markup() {
        let out = resolve_qa(
            SAMPLE,
            QaOptions {
                fix_double_spaces: false,
                fix_line_endings: true,
            },
        )
        .expect("qa");
        assert_eq!(out.line_endings_fixed, 1);
        assert!(out.document.contains("<target>erste\nzweite</target>"));
        assert!(out.document.contains("jetzt </target>"));
        assert_eq!(
            out.render_report(),
            "Stripped leading/trailing whitespace from lines in 1 segments."
        );
    }

    #[test]
    fn nothing_selected_leaves_document_untouched() {
        let out = resolve_qa(SAMPLE, QaOptions::default()).expect("qa");
        assert!(!out.changed());
        assert_eq!(out.document, SAMPLE);
        assert_eq!(out.render_report(), "No issues found or no checks selected.");
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(resolve_qa("<xliff><target>", QaOptions::default()).is_err());
    }
}
