use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{AppConfig, DEFAULT_CONFIG_FILENAME, DEFAULT_CONFIG_TOML};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const DEFAULT_TERMINOLOGY: &str = "terminology.txt";

pub const DEFAULT_TERMINOLOGY_TEXT: &str = include_str!("../prompts/terminology.txt");

pub const TERMINOLOGY_SYSTEM: &str =
    "You are a translation QA specialist that only outputs corrected text.";

/// Loads the terminology prompt named by `[terminology].prompt`, falling back to the built-in
/// template when the config names nothing.
pub fn load_terminology_prompt(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<String> {
    let Some(rel) = cfg.terminology.prompt.as_ref() else {
        return Ok(DEFAULT_TERMINOLOGY_TEXT.to_string());
    };
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut p = rel.clone();
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for terminology: {} (run: bitext-toolkit --init-config)",
            p.display()
        ));
    }
    std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![(DEFAULT_TERMINOLOGY, DEFAULT_TERMINOLOGY_TEXT)]
}

/// Writes `bitext-toolkit.toml` and the prompt templates into `dir`. Existing files are kept
/// unless `force` is set.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if !cfg_path.exists() || force {
        std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("write config: {}", cfg_path.display()))?;
    }
    Ok(cfg_path)
}
