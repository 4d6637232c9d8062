use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};

use bitext_toolkit::config::{locate_and_load, AppConfig};
use bitext_toolkit::embedding::LazyEmbedder;
use bitext_toolkit::models::{
    open_chat_model, open_embedder, ChatSettings, DEFAULT_CHAT_BACKEND, DEFAULT_EMBEDDING_BACKEND,
};
use bitext_toolkit::progress::ConsoleProgress;
use bitext_toolkit::prompts::{init_default_config, load_terminology_prompt};
use bitext_toolkit::terminology::Termbase;
use bitext_toolkit::textio::{decode_document, encode_document, DecodedText};
use bitext_toolkit::tmx::{CleanOptions, SimilarityThreshold, TmxCleaner, VariantSelection};
use bitext_toolkit::xliff::{
    fix_terminology, resolve_qa, split_by_error_code, PromptCorrector, QaOptions,
};

#[derive(Parser, Debug)]
#[command(name = "bitext-toolkit")]
#[command(about = "Translation-memory cleaner and XLIFF batch tools (local GGUF models)", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .tmx (default mode) or .xliff/.mqxliff (tool modes)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output file (default: derived from the input name)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Config file path (default: search for bitext-toolkit.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum source/target cosine similarity to keep a TU (0.0-1.0, default 0.6)
    #[arg(long)]
    threshold: Option<f32>,

    /// Pick the source <tuv> by the header's srclang instead of position
    #[arg(long)]
    language_tags: bool,

    /// Embedding backend name from config (e.g. labse)
    #[arg(long)]
    embedding_backend: Option<String>,

    /// Embedding model GGUF (overrides embedding_backend)
    #[arg(long)]
    embedding_model: Option<PathBuf>,

    /// Write the report to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Also write the TMX cleaning report as JSON
    #[arg(long, value_name = "JSON")]
    report_json: Option<PathBuf>,

    /// Split an XLIFF/MQXLIFF into a ZIP with one file per QA error code
    #[arg(long)]
    split_errors: bool,

    /// Apply mechanical QA fixes to target segments
    #[arg(long)]
    resolve_qa: bool,

    /// With --resolve-qa: collapse runs of spaces
    #[arg(long)]
    fix_double_spaces: bool,

    /// With --resolve-qa: strip leading/trailing whitespace from every line
    #[arg(long)]
    fix_line_endings: bool,

    /// Correct targets against a termbase with a chat model
    #[arg(long)]
    fix_terms: bool,

    /// Termbase file (.toml with [[term]] tables, or a JSON array)
    #[arg(long, value_name = "FILE")]
    termbase: Option<PathBuf>,

    /// Chat backend name from config used by --fix-terms (e.g. qwen)
    #[arg(long)]
    term_backend: Option<String>,

    /// Chat model GGUF (overrides term_backend)
    #[arg(long)]
    term_model: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  bitext-toolkit <memory.tmx>\n  bitext-toolkit <file.mqxliff> --split-errors\n  bitext-toolkit <file.xliff> --resolve-qa --fix-double-spaces\n  bitext-toolkit <file.xliff> --fix-terms --termbase terms.toml\n\nTIPS:\n  - Run --init-config once to get bitext-toolkit.toml and the prompt templates.\n  - Default config search: bitext-toolkit.toml (upwards), or set BITEXT_TOOLKIT_CONFIG.\n  - Model-backed modes need a build with `--features native`.\n"
            );
            return Ok(());
        }
    };

    let modes = [args.split_errors, args.resolve_qa, args.fix_terms]
        .iter()
        .filter(|m| **m)
        .count();
    if modes > 1 {
        return Err(anyhow::anyhow!(
            "choose one of --split-errors, --resolve-qa, --fix-terms"
        ));
    }

    let workdir = input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let (cfg, cfg_path) = locate_and_load(args.config.clone(), &workdir)?;

    if args.split_errors {
        run_split(&args, &input)
    } else if args.resolve_qa {
        run_qa(&args, &cfg, &input, &progress)
    } else if args.fix_terms {
        run_terms(&args, &cfg, &cfg_path, &input, &progress)
    } else {
        run_clean(&args, &cfg, &cfg_path, &input, progress)
    }
}

fn run_clean(
    args: &Args,
    cfg: &AppConfig,
    cfg_path: &Path,
    input: &Path,
    progress: ConsoleProgress,
) -> anyhow::Result<()> {
    let mut opts = CleanOptions::from_config(cfg)?;
    if let Some(t) = args.threshold {
        opts.threshold = SimilarityThreshold::new(t)?;
    }
    if args.language_tags {
        opts.variant_selection = VariantSelection::LanguageTag;
    }
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| derived_output(input, "_cleaned", "tmx"));

    let backend = args
        .embedding_backend
        .clone()
        .or_else(|| cfg.embedding.backend.clone())
        .unwrap_or_else(|| DEFAULT_EMBEDDING_BACKEND.to_string());
    progress.info(format!("Embedding model: {backend}"));
    let embedder = LazyEmbedder::new(|| {
        open_embedder(cfg, cfg_path, &backend, args.embedding_model.as_deref())
    });

    let snippet_chars = opts.snippet_chars;
    let cleaner = TmxCleaner::new(opts, progress);
    let report = cleaner.clean_file(input, &output, &embedder)?;

    if let Some(json_path) = args.report_json.as_ref() {
        std::fs::write(json_path, report.to_json()?)
            .with_context(|| format!("write report json: {}", json_path.display()))?;
    }
    emit_report(args, &report.render(snippet_chars))
}

fn run_split(args: &Args, input: &Path) -> anyhow::Result<()> {
    let decoded = read_document(input)?;
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let out = split_by_error_code(&decoded.text, ext)?;
    if let Some(zip) = out.archive.as_ref() {
        let output = args.output.clone().unwrap_or_else(|| {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output");
            input.with_file_name(format!("{stem}_errors.zip"))
        });
        std::fs::write(&output, zip).with_context(|| format!("write zip: {}", output.display()))?;
        eprintln!("Wrote: {}", output.display());
    }
    emit_report(args, &out.render_report())
}

fn run_qa(
    args: &Args,
    cfg: &AppConfig,
    input: &Path,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    // Flags win; without any, the [qa] section decides.
    let opts = if args.fix_double_spaces || args.fix_line_endings {
        QaOptions {
            fix_double_spaces: args.fix_double_spaces,
            fix_line_endings: args.fix_line_endings,
        }
    } else {
        QaOptions {
            fix_double_spaces: cfg.qa.fix_double_spaces.unwrap_or(false),
            fix_line_endings: cfg.qa.fix_line_endings.unwrap_or(false),
        }
    };
    let decoded = read_document(input)?;
    let out = resolve_qa(&decoded.text, opts)?;
    if out.changed() {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| derived_output(input, "_qa", "xliff"));
        write_document(&output, &out.document, &decoded)?;
        progress.info(format!("Wrote: {}", output.display()));
    }
    emit_report(args, &out.render_report())
}

fn run_terms(
    args: &Args,
    cfg: &AppConfig,
    cfg_path: &Path,
    input: &Path,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let termbase_path = match args.termbase.clone() {
        Some(p) => p,
        None => {
            let p = cfg
                .terminology
                .termbase
                .clone()
                .context("--fix-terms needs --termbase (or [terminology].termbase in config)")?;
            if p.is_relative() {
                cfg_path.parent().unwrap_or_else(|| Path::new(".")).join(p)
            } else {
                p
            }
        }
    };
    let termbase = Termbase::load(&termbase_path)?;
    progress.info(format!(
        "Termbase: {} entries ({})",
        termbase.len(),
        termbase_path.display()
    ));
    if termbase.is_empty() {
        progress.warn("termbase is empty; nothing to check");
    }

    let backend = args
        .term_backend
        .clone()
        .or_else(|| cfg.terminology.backend.clone())
        .unwrap_or_else(|| DEFAULT_CHAT_BACKEND.to_string());
    let defaults = ChatSettings::default();
    let settings = ChatSettings {
        max_tokens: cfg.terminology.max_tokens.unwrap_or(defaults.max_tokens),
        temperature: cfg.terminology.temperature.unwrap_or(defaults.temperature),
    };
    let template = load_terminology_prompt(cfg_path, cfg)?;
    progress.info(format!("Chat model: {backend}"));
    let model = open_chat_model(cfg, cfg_path, &backend, args.term_model.as_deref(), settings)?;
    let corrector = PromptCorrector::new(model, template);

    let decoded = read_document(input)?;
    let out = fix_terminology(&decoded.text, &termbase, &corrector, progress)?;
    if !out.fixes.is_empty() {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| derived_output(input, "_terms", "xliff"));
        write_document(&output, &out.document, &decoded)?;
        progress.info(format!("Wrote: {}", output.display()));
    }
    emit_report(args, &out.render_report())
}

fn read_document(path: &Path) -> anyhow::Result<DecodedText> {
    let bytes = std::fs::read(path).with_context(|| format!("read input: {}", path.display()))?;
    decode_document(&bytes).with_context(|| format!("decode input: {}", path.display()))
}

fn write_document(path: &Path, text: &str, like: &DecodedText) -> anyhow::Result<()> {
    let bytes = encode_document(text, like)?;
    std::fs::write(path, bytes).with_context(|| format!("write output: {}", path.display()))
}

fn emit_report(args: &Args, report: &str) -> anyhow::Result<()> {
    match args.report.as_ref() {
        Some(path) => std::fs::write(path, format!("{report}\n"))
            .with_context(|| format!("write report: {}", path.display())),
        None => {
            println!("{report}");
            Ok(())
        }
    }
}

/// `<stem><suffix>.<ext>`, keeping the input's extension when it has one.
fn derived_output(input: &Path, suffix: &str, default_ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(default_ext);
    input.with_file_name(format!("{stem}{suffix}.{ext}"))
}
