use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "bitext-toolkit.toml";
pub const CONFIG_ENV_VAR: &str = "BITEXT_TOOLKIT_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cleaner: CleanerSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub terminology: TerminologySection,
    #[serde(default)]
    pub qa: QaSection,
    #[serde(default)]
    pub models: ModelsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CleanerSection {
    /// Pairs scoring below this cosine similarity are dropped. Must lie in [0, 1].
    #[serde(default)]
    pub similarity_threshold: Option<f32>,

    /// "positional" (default) or "language-tag".
    #[serde(default)]
    pub variant_selection: Option<String>,

    /// Characters of source text quoted per report line.
    #[serde(default)]
    pub snippet_chars: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TerminologySection {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub termbase: Option<PathBuf>,
    #[serde(default)]
    pub prompt: Option<PathBuf>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QaSection {
    #[serde(default)]
    pub fix_double_spaces: Option<bool>,
    #[serde(default)]
    pub fix_line_endings: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub backends: HashMap<String, ModelBackend>,

    /// Preferred directory for relative backend paths. Relative to the config file's directory
    /// when not absolute.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelBackend {
    pub path: PathBuf,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBackend {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub batch_size: Option<u32>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}

/// Explicit path, then `$BITEXT_TOOLKIT_CONFIG`, then an upward search. Returns the default
/// (empty) config when nothing is found, together with the path the config would live at.
pub fn locate_and_load(
    explicit: Option<PathBuf>,
    workdir: &Path,
) -> anyhow::Result<(AppConfig, PathBuf)> {
    let cfg_file = explicit
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, DEFAULT_CONFIG_FILENAME));

    let mut cfg = AppConfig::default();
    if let Some(p) = cfg_file.as_ref() {
        if p.exists() {
            cfg = load_config(p)?;
        }
    }
    let path = cfg_file.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_FILENAME));
    Ok((cfg, path))
}

/// Resolves a named backend, or a direct model path that bypasses `[models.backends]`.
pub fn resolve_backend(
    cfg: &AppConfig,
    config_path: &Path,
    name: &str,
    direct_model: Option<&Path>,
    default_ctx: u32,
) -> anyhow::Result<ResolvedBackend> {
    if let Some(path) = direct_model {
        if !path.exists() {
            return Err(anyhow!("{name} model not found: {}", path.display()));
        }
        return Ok(ResolvedBackend {
            name: name.to_string(),
            model_path: path.to_path_buf(),
            ctx_size: default_ctx,
            threads: None,
            gpu_layers: None,
            batch_size: None,
        });
    }

    let b = cfg.models.backends.get(name).ok_or_else(|| {
        anyhow!(
            "backend not configured: {name} (add [models.backends.{name}] to {})",
            config_path.display()
        )
    })?;

    let search_dirs = model_search_dirs(cfg, config_path);
    let mut path = b.path.clone();
    if path.is_relative() {
        path = search_dirs
            .iter()
            .map(|dir| dir.join(&b.path))
            .find(|cand| cand.exists())
            .ok_or_else(|| {
                anyhow!(
                    "backend {} model not found: {} (searched: {}) (config={})",
                    name,
                    b.path.display(),
                    search_dirs
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                    config_path.display()
                )
            })?;
    } else if !path.exists() {
        return Err(anyhow!(
            "backend {} model not found: {} (config={})",
            name,
            path.display(),
            config_path.display()
        ));
    }

    Ok(ResolvedBackend {
        name: name.to_string(),
        model_path: path,
        ctx_size: b.ctx_size.unwrap_or(default_ctx),
        threads: b.threads,
        gpu_layers: b.gpu_layers,
        batch_size: b.batch_size,
    })
}

fn model_search_dirs(cfg: &AppConfig, config_path: &Path) -> Vec<PathBuf> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(md) = cfg.models.model_dir.as_ref() {
        if md.is_relative() {
            dirs.push(config_dir.join(md));
        } else {
            dirs.push(md.clone());
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.to_path_buf());
        }
    }
    dirs.push(config_dir.to_path_buf());

    let mut seen: HashSet<PathBuf> = HashSet::new();
    dirs.retain(|d| d.is_dir() && seen.insert(d.clone()));
    dirs
}

pub const DEFAULT_CONFIG_TOML: &str = r#"[cleaner]
# Pairs whose source/target embeddings score below this cosine similarity are removed.
similarity_threshold = 0.6
# "positional": first <tuv> is the source, second the target.
# "language-tag": pick the source <tuv> by the header's srclang.
variant_selection = "positional"
snippet_chars = 50

[embedding]
# A multilingual sentence-embedding GGUF (e.g. LaBSE or multilingual-e5).
backend = "labse"

[terminology]
backend = "qwen"
# termbase = "termbase.toml"
prompt = "prompts/terminology.txt"
max_tokens = 512
temperature = 0.1

[qa]
fix_double_spaces = true
fix_line_endings = false

[models]
model_dir = "models"

[models.backends.labse]
path = "labse-f16.gguf"
ctx_size = 2048
batch_size = 2048
# threads = 8
# gpu_layers = -1

[models.backends.qwen]
path = "qwen2.5-7b-instruct-q4_k_m.gguf"
ctx_size = 4096
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let cfg = parse_config(DEFAULT_CONFIG_TOML).expect("parse");
        assert_eq!(cfg.cleaner.similarity_threshold, Some(0.6));
        assert_eq!(cfg.cleaner.variant_selection.as_deref(), Some("positional"));
        assert_eq!(cfg.embedding.backend.as_deref(), Some("labse"));
        assert_eq!(cfg.qa.fix_double_spaces, Some(true));
        assert_eq!(
            cfg.models.backends.get("labse").map(|b| b.batch_size),
            Some(Some(2048))
        );
    }

    #[test]
    fn every_section_is_optional() {
        let cfg = parse_config("").expect("parse");
        assert!(cfg.cleaner.similarity_threshold.is_none());
        assert!(cfg.models.backends.is_empty());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let cfg = AppConfig::default();
        let err = resolve_backend(&cfg, Path::new("cfg.toml"), "labse", None, 512)
            .err()
            .expect("error");
        assert!(err.to_string().contains("backend not configured: labse"));
    }

    #[test]
    fn direct_model_must_exist() {
        let cfg = AppConfig::default();
        let missing = Path::new("definitely/not/here.gguf");
        assert!(resolve_backend(&cfg, Path::new("cfg.toml"), "labse", Some(missing), 512).is_err());
    }
}
