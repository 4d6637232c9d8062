use std::path::Path;

use anyhow::Context;

use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::error::CleanError;
use crate::progress::ConsoleProgress;
use crate::textio::{decode_document, encode_document};

use super::document::{TmxDocument, VariantSelection};
use super::extract::extract;
use super::filter::{filter, SimilarityThreshold};
use super::report::CleanReport;

pub const DEFAULT_SNIPPET_CHARS: usize = 50;

#[derive(Clone, Debug)]
pub struct CleanOptions {
    pub threshold: SimilarityThreshold,
    pub variant_selection: VariantSelection,
    pub snippet_chars: usize,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            threshold: SimilarityThreshold::default(),
            variant_selection: VariantSelection::Positional,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

impl CleanOptions {
    /// `[cleaner]` settings over the defaults.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, CleanError> {
        let mut opts = Self::default();
        if let Some(t) = cfg.cleaner.similarity_threshold {
            opts.threshold = SimilarityThreshold::new(t)?;
        }
        if let Some(v) = cfg.cleaner.variant_selection.as_deref() {
            opts.variant_selection = VariantSelection::parse(Some(v));
        }
        if let Some(n) = cfg.cleaner.snippet_chars {
            opts.snippet_chars = n;
        }
        Ok(opts)
    }
}

#[derive(Clone, Debug)]
pub struct CleanOutput {
    /// The filtered TMX, serialized the same way the input was written.
    pub document: String,
    pub report: CleanReport,
}

impl CleanOutput {
    pub fn render_report(&self, snippet_chars: usize) -> String {
        self.report.render(snippet_chars)
    }
}

pub struct TmxCleaner {
    opts: CleanOptions,
    progress: ConsoleProgress,
}

impl TmxCleaner {
    pub fn new(opts: CleanOptions, progress: ConsoleProgress) -> Self {
        Self { opts, progress }
    }

    /// Parse, deduplicate, filter by similarity and re-serialize one TMX document.
    pub fn clean<E: Embedder + ?Sized>(
        &self,
        text: &str,
        embedder: &E,
    ) -> Result<CleanOutput, CleanError> {
        let doc = TmxDocument::parse(text, self.opts.variant_selection)?;
        self.progress
            .info(format!("Parsed TMX: {} translation units", doc.len()));

        let extraction = extract(doc.units());
        self.progress.info(format!(
            "Deduplicated: {} kept, {} removed",
            extraction.retained.len(),
            extraction.removals.len()
        ));

        if !extraction.retained.is_empty() {
            self.progress.info(format!(
                "Embedding {} source/target pairs (threshold {:.2})",
                extraction.retained.len(),
                self.opts.threshold.value()
            ));
        }
        let filtered = filter(extraction.retained, self.opts.threshold, embedder)?;
        self.progress.info(format!(
            "Similarity filter: {} kept, {} removed",
            filtered.retained.len(),
            filtered.removals.len()
        ));

        let keep: Vec<usize> = filtered.retained.iter().map(|u| u.index).collect();
        let document = doc.write_retaining(&keep)?;

        let mut removals = extraction.removals;
        removals.extend(filtered.removals);
        let report = CleanReport {
            original: doc.len(),
            retained: keep.len(),
            removals,
        };
        Ok(CleanOutput { document, report })
    }

    /// Cleans `input` into `output`, writing the same encoding and byte-order mark it read.
    pub fn clean_file<E: Embedder + ?Sized>(
        &self,
        input: &Path,
        output: &Path,
        embedder: &E,
    ) -> anyhow::Result<CleanReport> {
        self.progress.info(format!("Read TMX: {}", input.display()));
        let bytes =
            std::fs::read(input).with_context(|| format!("read input: {}", input.display()))?;
        let decoded = decode_document(&bytes).map_err(|e| CleanError::DocumentParse(format!("{e:#}")))?;

        let out = self.clean(&decoded.text, embedder)?;
        let encoded = encode_document(&out.document, &decoded)
            .map_err(|e| CleanError::Output(format!("{e:#}")))?;
        std::fs::write(output, encoded)
            .map_err(|e| CleanError::Output(format!("write {}: {e}", output.display())))?;
        self.progress.info(format!("Wrote: {}", output.display()));
        Ok(out.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::error::EmbedError;

    /// "good" texts point one way, everything else the other.
    struct Polarity;

    impl Embedder for Polarity {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("bad") || t.contains("schlecht") {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    const DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-16\"?>\n<tmx version=\"1.4\">\n  <header srclang=\"en\"/>\n  <body>\n    <tu tuid=\"1\"><tuv xml:lang=\"en\"><seg>good day</seg></tuv><tuv xml:lang=\"de\"><seg>guten Tag</seg></tuv></tu>\n    <tu tuid=\"2\"><tuv xml:lang=\"en\"><seg>good day</seg></tuv><tuv xml:lang=\"de\"><seg>Tag</seg></tuv></tu>\n    <tu tuid=\"3\"><tuv xml:lang=\"en\"><seg>bad pair</seg></tuv><tuv xml:lang=\"de\"><seg>Katze</seg></tuv></tu>\n  </body>\n</tmx>\n";

    #[test]
    fn options_come_from_the_cleaner_section() {
        let cfg = parse_config(
            "[cleaner]\nsimilarity_threshold = 0.75\nvariant_selection = \"language-tag\"\nsnippet_chars = 20\n",
        )
        .expect("cfg");
        let opts = CleanOptions::from_config(&cfg).expect("opts");
        assert_eq!(opts.threshold.value(), 0.75);
        assert_eq!(opts.variant_selection, VariantSelection::LanguageTag);
        assert_eq!(opts.snippet_chars, 20);

        let bad = parse_config("[cleaner]\nsimilarity_threshold = 1.5\n").expect("cfg");
        assert!(matches!(
            CleanOptions::from_config(&bad),
            Err(CleanError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn clean_reports_every_stage() {
        let cleaner = TmxCleaner::new(CleanOptions::default(), ConsoleProgress::disabled());
        let out = cleaner.clean(DOC, &Polarity).expect("clean");
        assert_eq!(out.report.original, 3);
        assert_eq!(out.report.retained, 1);
        assert!(out.document.contains("guten Tag"));
        assert!(!out.document.contains("tuid=\"2\""));
        assert!(!out.document.contains("Katze"));
        let text = out.render_report(50);
        assert!(text.starts_with("Processing complete. Original TUs: 3, Final TUs: 1, Removed: 2"));
        assert!(text.contains("Removed duplicate source (tu 2): 'good day'"));
    }

    #[test]
    fn clean_file_keeps_the_input_encoding() {
        let dir = std::env::temp_dir().join(format!("bitext-clean-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let input = dir.join("in.tmx");
        let output = dir.join("out.tmx");

        let mut bytes = vec![0xFF, 0xFE];
        for u in DOC.encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        std::fs::write(&input, &bytes).expect("write");

        let cleaner = TmxCleaner::new(CleanOptions::default(), ConsoleProgress::disabled());
        let report = cleaner.clean_file(&input, &output, &Polarity).expect("clean");
        assert_eq!(report.retained, 1);

        let written = std::fs::read(&output).expect("read");
        assert_eq!(&written[..2], &[0xFF, 0xFE]);
        let decoded = decode_document(&written).expect("decode");
        assert!(decoded.text.contains("guten Tag"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
