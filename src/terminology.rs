use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TermEntry {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize)]
struct TermFile {
    #[serde(default)]
    term: Vec<TermEntry>,
}

/// Required source-to-target term pairs, matched case-insensitively on the source side.
#[derive(Clone, Debug, Default)]
pub struct Termbase {
    // (lower-cased source, entry) in load order.
    entries: Vec<(String, TermEntry)>,
}

impl Termbase {
    /// Later entries whose lower-cased source repeats an earlier one are ignored, as are entries
    /// with a blank side.
    pub fn from_entries(entries: impl IntoIterator<Item = TermEntry>) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for e in entries {
            let source = e.source.trim();
            let target = e.target.trim();
            if source.is_empty() || target.is_empty() {
                continue;
            }
            let key = source.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            out.push((
                key,
                TermEntry {
                    source: source.to_string(),
                    target: target.to_string(),
                },
            ));
        }
        Self { entries: out }
    }

    /// Loads `[[term]]` tables from a `.toml` file, or a JSON array of `{source, target}` objects
    /// from anything else.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read termbase: {}", path.display()))?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&text).with_context(|| format!("parse termbase: {}", path.display()))
        } else {
            Self::from_json(&text).with_context(|| format!("parse termbase: {}", path.display()))
        }
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let file: TermFile = toml::from_str(text)?;
        Ok(Self::from_entries(file.term))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let entries: Vec<TermEntry> = serde_json::from_str(text)
            .map_err(|e| anyhow!("expected a JSON array of {{\"source\", \"target\"}}: {e}"))?;
        Ok(Self::from_entries(entries))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose source occurs anywhere in `text`, ignoring case.
    #[must_use]
    pub fn relevant_for_text(&self, text: &str) -> Vec<&TermEntry> {
        if self.entries.is_empty() || text.is_empty() {
            return Vec::new();
        }
        let lowered = text.to_lowercase();
        self.entries
            .iter()
            .filter(|(key, _)| lowered.contains(key.as_str()))
            .map(|(_, e)| e)
            .collect()
    }

    #[must_use]
    pub fn render_for_prompt(terms: &[&TermEntry]) -> String {
        let mut out = String::new();
        for t in terms {
            out.push_str("- ");
            out.push_str(&t.source);
            out.push_str(" -> ");
            out.push_str(&t.target);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(s: &str, t: &str) -> TermEntry {
        TermEntry {
            source: s.to_string(),
            target: t.to_string(),
        }
    }

    #[test]
    fn first_entry_wins_case_insensitively() {
        let tb = Termbase::from_entries([
            entry("Server", "serveur"),
            entry("server", "serveur informatique"),
            entry(" ", "vide"),
        ]);
        assert_eq!(tb.len(), 1);
        let hits = tb.relevant_for_text("Restart the SERVER now");
        assert_eq!(hits, vec![&entry("Server", "serveur")]);
    }

    #[test]
    fn relevance_is_substring_match_in_load_order() {
        let tb = Termbase::from_entries([entry("log file", "fichier journal"), entry("log", "journal")]);
        let hits = tb.relevant_for_text("Open the log file.");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "log file");
        assert!(tb.relevant_for_text("Nothing here").is_empty());
    }

    #[test]
    fn parses_toml_and_json() {
        let toml_tb = Termbase::from_toml(
            "[[term]]\nsource = \"invoice\"\ntarget = \"facture\"\n\n[[term]]\nsource = \"VAT\"\ntarget = \"TVA\"\n",
        )
        .expect("toml");
        assert_eq!(toml_tb.len(), 2);

        let json_tb =
            Termbase::from_json(r#"[{"source": "invoice", "target": "facture"}]"#).expect("json");
        assert_eq!(json_tb.relevant_for_text("Invoice total")[0].target, "facture");
        assert!(Termbase::from_json(r#"{"source": "x"}"#).is_err());
    }

    #[test]
    fn prompt_rendering_lists_pairs() {
        let e = entry("invoice", "facture");
        assert_eq!(Termbase::render_for_prompt(&[&e]), "- invoice -> facture\n");
        assert_eq!(Termbase::render_for_prompt(&[]), "");
    }
}
