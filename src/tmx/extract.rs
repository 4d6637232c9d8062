use std::collections::HashSet;

use super::document::{TextVariant, TranslationUnit};
use super::report::{Omission, RemovalReason, RemovalRecord};

/// A structurally valid unit that survived deduplication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignedUnit {
    pub index: usize,
    pub id: Option<String>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    /// Source text as found in the document (untrimmed).
    pub source: String,
    /// Target text as found in the document; empty when the target `<tuv>` has no `<seg>`.
    pub target: String,
}

impl AlignedUnit {
    /// Deduplication key: the trimmed source, compared byte for byte.
    pub fn key(&self) -> &str {
        self.source.trim()
    }
}

impl From<&AlignedUnit> for TranslationUnit {
    fn from(unit: &AlignedUnit) -> Self {
        TranslationUnit {
            index: unit.index,
            id: unit.id.clone(),
            source: Some(TextVariant {
                lang: unit.source_lang.clone(),
                text: Some(unit.source.clone()),
            }),
            target: Some(TextVariant {
                lang: unit.target_lang.clone(),
                text: Some(unit.target.clone()),
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// Survivors in document order.
    pub retained: Vec<AlignedUnit>,
    pub removals: Vec<RemovalRecord>,
}

/// Drops malformed units and every unit whose trimmed source repeats an earlier one.
///
/// The first occurrence of a source wins regardless of its target. A blank target is not a
/// reason for removal here.
pub fn extract(units: &[TranslationUnit]) -> Extraction {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Extraction::default();

    for unit in units {
        let (source, target) = match (&unit.source, &unit.target) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                out.removals.push(RemovalRecord {
                    unit_index: unit.index,
                    unit_id: unit.id.clone(),
                    source: source_hint(unit),
                    reason: RemovalReason::Malformed(Omission::MissingVariant),
                    score: None,
                });
                continue;
            }
        };

        let source_text = match source.text.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                out.removals.push(RemovalRecord {
                    unit_index: unit.index,
                    unit_id: unit.id.clone(),
                    source: None,
                    reason: RemovalReason::Malformed(Omission::MissingSourceText),
                    score: None,
                });
                continue;
            }
        };

        let key = source_text.trim();
        if !seen.insert(key) {
            out.removals.push(RemovalRecord {
                unit_index: unit.index,
                unit_id: unit.id.clone(),
                source: Some(key.to_string()),
                reason: RemovalReason::Duplicate,
                score: None,
            });
            continue;
        }

        out.retained.push(AlignedUnit {
            index: unit.index,
            id: unit.id.clone(),
            source_lang: source.lang.clone(),
            target_lang: target.lang.clone(),
            source: source_text.to_string(),
            target: target.text.clone().unwrap_or_default(),
        });
    }

    out
}

fn source_hint(unit: &TranslationUnit) -> Option<String> {
    unit.source
        .as_ref()
        .and_then(|s| s.text.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(index: usize, id: &str, source: Option<&str>, target: Option<&str>) -> TranslationUnit {
        let variant = |text: &str| TextVariant {
            lang: None,
            text: Some(text.to_string()),
        };
        TranslationUnit {
            index,
            id: Some(id.to_string()),
            source: source.map(variant),
            target: target.map(variant),
        }
    }

    #[test]
    fn keeps_first_occurrence_and_drops_malformed() {
        let units = vec![
            unit(0, "A", Some("Hello"), Some("Bonjour")),
            unit(1, "B", Some("Hello"), Some("Hola")),
            unit(2, "C", Some("Goodbye"), Some("Au revoir")),
            unit(3, "D", Some("Thanks"), None),
        ];
        let ex = extract(&units);
        let ids: Vec<_> = ex.retained.iter().map(|u| u.id.as_deref().unwrap_or("")).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(ex.removals.len(), 2);
        assert_eq!(ex.removals[0].reason, RemovalReason::Duplicate);
        assert_eq!(ex.removals[0].unit_id.as_deref(), Some("B"));
        assert_eq!(
            ex.removals[1].reason,
            RemovalReason::Malformed(Omission::MissingVariant)
        );
        assert_eq!(ex.removals[1].source.as_deref(), Some("Thanks"));
    }

    #[test]
    fn dedup_key_is_trimmed_and_case_sensitive() {
        let units = vec![
            unit(0, "1", Some("  Hello "), Some("x")),
            unit(1, "2", Some("Hello"), Some("y")),
            unit(2, "3", Some("hello"), Some("z")),
        ];
        let ex = extract(&units);
        assert_eq!(ex.retained.len(), 2);
        assert_eq!(ex.retained[0].source, "  Hello ");
        assert_eq!(ex.retained[1].key(), "hello");
    }

    #[test]
    fn blank_source_is_malformed_but_blank_target_is_kept() {
        let mut no_seg = unit(1, "2", Some("ignored"), Some("t"));
        if let Some(src) = no_seg.source.as_mut() {
            src.text = None;
        }
        let mut no_target_seg = unit(3, "4", Some("Fine"), Some("t"));
        if let Some(tgt) = no_target_seg.target.as_mut() {
            tgt.text = None;
        }
        let units = vec![
            unit(0, "1", Some("   "), Some("t")),
            no_seg,
            unit(2, "3", Some("Hello"), Some("  ")),
            no_target_seg,
        ];
        let ex = extract(&units);
        assert_eq!(ex.removals.len(), 2);
        assert!(ex
            .removals
            .iter()
            .all(|r| r.reason == RemovalReason::Malformed(Omission::MissingSourceText)));
        assert_eq!(ex.retained.len(), 2);
        assert_eq!(ex.retained[0].target, "  ");
        assert_eq!(ex.retained[1].target, "");
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let ex = extract(&[]);
        assert!(ex.retained.is_empty());
        assert!(ex.removals.is_empty());
    }

    #[test]
    fn extraction_is_idempotent() {
        let units = vec![
            unit(0, "1", Some("a"), Some("x")),
            unit(1, "2", Some("a "), Some("y")),
            unit(2, "3", None, Some("z")),
            unit(3, "4", Some("b"), Some("")),
        ];
        let first = extract(&units);
        let again: Vec<TranslationUnit> = first.retained.iter().map(TranslationUnit::from).collect();
        let second = extract(&again);
        assert!(second.removals.is_empty());
        assert_eq!(second.retained, first.retained);
    }
}
