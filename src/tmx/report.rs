use serde::Serialize;

use crate::textutil::snippet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Omission {
    /// The unit lacks a source or a target `<tuv>`.
    MissingVariant,
    /// The source `<tuv>` has no `<seg>`, or its text is blank.
    MissingSourceText,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalReason {
    Duplicate,
    Malformed(Omission),
    LowSimilarity,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemovalRecord {
    pub unit_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    /// Trimmed source text, when the unit had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub reason: RemovalReason,
    /// Similarity rounded to two decimals (low-similarity removals only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl RemovalRecord {
    pub fn render(&self, snippet_chars: usize) -> String {
        let tag = match self.unit_id.as_deref() {
            Some(id) => format!(" (tu {id})"),
            None => String::new(),
        };
        let text = snippet(self.source.as_deref().unwrap_or(""), snippet_chars);
        match self.reason {
            RemovalReason::Duplicate => format!("Removed duplicate source{tag}: '{text}'"),
            RemovalReason::Malformed(Omission::MissingVariant) => {
                format!("Removed a TU with missing source or target <tuv> elements{tag}.")
            }
            RemovalReason::Malformed(Omission::MissingSourceText) => {
                format!("Removed a TU with a missing source segment{tag}.")
            }
            RemovalReason::LowSimilarity => format!(
                "Removed low similarity pair (Score: {:.2}){tag}: '{text}'",
                self.score.unwrap_or(0.0)
            ),
        }
    }
}

/// Rounds a similarity score to two decimals for reporting.
pub fn round_score(score: f32) -> f32 {
    (score * 100.0).round() / 100.0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub original: usize,
    pub retained: usize,
    /// Extractor removals first, then filter removals, each in decision order.
    pub removals: Vec<RemovalRecord>,
}

impl CleanReport {
    pub fn removed(&self) -> usize {
        self.original.saturating_sub(self.retained)
    }

    pub fn count(&self, reason: RemovalReason) -> usize {
        self.removals.iter().filter(|r| r.reason == reason).count()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Processing complete. Original TUs: {}, Final TUs: {}, Removed: {}",
            self.original,
            self.retained,
            self.removed()
        )
    }

    pub fn render(&self, snippet_chars: usize) -> String {
        let mut lines = Vec::with_capacity(self.removals.len() + 1);
        lines.push(self.summary_line());
        lines.extend(self.removals.iter().map(|r| r.render(snippet_chars)));
        lines.join("\n")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        serde_json::to_string_pretty(self).context("serialize clean report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reason: RemovalReason, id: Option<&str>, source: &str, score: Option<f32>) -> RemovalRecord {
        RemovalRecord {
            unit_index: 0,
            unit_id: id.map(str::to_string),
            source: Some(source.to_string()),
            reason,
            score,
        }
    }

    #[test]
    fn renders_summary_then_removals_in_order() {
        let report = CleanReport {
            original: 4,
            retained: 1,
            removals: vec![
                record(RemovalReason::Duplicate, Some("B"), "Hello", None),
                record(RemovalReason::Malformed(Omission::MissingVariant), Some("D"), "Thanks", None),
                record(RemovalReason::LowSimilarity, None, "Goodbye", Some(round_score(0.3049))),
            ],
        };
        let text = report.render(50);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Processing complete. Original TUs: 4, Final TUs: 1, Removed: 3",
                "Removed duplicate source (tu B): 'Hello'",
                "Removed a TU with missing source or target <tuv> elements (tu D).",
                "Removed low similarity pair (Score: 0.30): 'Goodbye'",
            ]
        );
        assert_eq!(report.count(RemovalReason::Duplicate), 1);
    }

    #[test]
    fn long_sources_are_truncated() {
        let r = record(RemovalReason::Duplicate, None, "abcdefghij", None);
        assert_eq!(r.render(4), "Removed duplicate source: 'abcd...'");
    }

    #[test]
    fn json_uses_kebab_case_reasons() {
        let report = CleanReport {
            original: 1,
            retained: 0,
            removals: vec![record(
                RemovalReason::Malformed(Omission::MissingSourceText),
                None,
                "",
                None,
            )],
        };
        let json = report.to_json().expect("json");
        assert!(json.contains("\"malformed\": \"missing-source-text\""));
        assert!(!json.contains("score"));
    }
}
