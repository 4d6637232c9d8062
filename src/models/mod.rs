//! Local model backends. The llama.cpp bindings are only compiled with the `native` feature;
//! without it the openers report the backend as unavailable.

#[cfg(feature = "native")]
pub mod native;

use std::path::Path;
use std::sync::Arc;

use crate::config::{resolve_backend, AppConfig};
use crate::embedding::Embedder;
use crate::error::EmbedError;

pub const DEFAULT_EMBEDDING_BACKEND: &str = "labse";
pub const DEFAULT_CHAT_BACKEND: &str = "qwen";

const DEFAULT_EMBEDDING_CTX: u32 = 512;
const DEFAULT_CHAT_CTX: u32 = 4096;

/// One-shot chat completion: a system prompt plus a single user turn.
pub trait ChatModel {
    fn chat(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

impl<M: ChatModel + ?Sized> ChatModel for &M {
    fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        (**self).chat(system, user)
    }
}

impl<M: ChatModel + ?Sized> ChatModel for Box<M> {
    fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        (**self).chat(system, user)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChatSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.1,
        }
    }
}

/// The process-wide sentence embedder for `backend` (or a direct GGUF path).
pub fn open_embedder(
    cfg: &AppConfig,
    config_path: &Path,
    backend: &str,
    direct_model: Option<&Path>,
) -> Result<Arc<dyn Embedder>, EmbedError> {
    let resolved = resolve_backend(cfg, config_path, backend, direct_model, DEFAULT_EMBEDDING_CTX)
        .map_err(|e| EmbedError::Unavailable(format!("{e:#}")))?;
    open_native_embedder(&resolved)
}

#[cfg(feature = "native")]
fn open_native_embedder(
    resolved: &crate::config::ResolvedBackend,
) -> Result<Arc<dyn Embedder>, EmbedError> {
    let shared = native::shared_embedder(resolved)?;
    Ok(shared)
}

#[cfg(not(feature = "native"))]
fn open_native_embedder(
    resolved: &crate::config::ResolvedBackend,
) -> Result<Arc<dyn Embedder>, EmbedError> {
    Err(EmbedError::Unavailable(format!(
        "cannot load {} ({}): built without the `native` feature",
        resolved.name,
        resolved.model_path.display()
    )))
}

/// Loads the chat model used for terminology corrections.
pub fn open_chat_model(
    cfg: &AppConfig,
    config_path: &Path,
    backend: &str,
    direct_model: Option<&Path>,
    settings: ChatSettings,
) -> anyhow::Result<Box<dyn ChatModel>> {
    let resolved = resolve_backend(cfg, config_path, backend, direct_model, DEFAULT_CHAT_CTX)?;
    open_native_chat(&resolved, settings)
}

#[cfg(feature = "native")]
fn open_native_chat(
    resolved: &crate::config::ResolvedBackend,
    settings: ChatSettings,
) -> anyhow::Result<Box<dyn ChatModel>> {
    Ok(Box::new(native::SharedChatModel::load(resolved, settings)?))
}

#[cfg(not(feature = "native"))]
fn open_native_chat(
    resolved: &crate::config::ResolvedBackend,
    _settings: ChatSettings,
) -> anyhow::Result<Box<dyn ChatModel>> {
    Err(anyhow::anyhow!(
        "cannot load {} ({}): built without the `native` feature",
        resolved.name,
        resolved.model_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_embedding_backend_is_unavailable() {
        let err = open_embedder(&AppConfig::default(), Path::new("cfg.toml"), "labse", None)
            .err()
            .expect("error");
        assert!(matches!(err, EmbedError::Unavailable(_)));
    }

    #[test]
    fn boxed_chat_models_delegate() {
        struct Upper;
        impl ChatModel for Upper {
            fn chat(&self, _system: &str, user: &str) -> anyhow::Result<String> {
                Ok(user.to_uppercase())
            }
        }
        let model: Box<dyn ChatModel> = Box::new(Upper);
        assert_eq!(model.chat("", "abc").expect("chat"), "ABC");
    }
}
