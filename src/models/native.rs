use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::DecodeError;
use once_cell::sync::OnceCell;

use crate::config::ResolvedBackend;
use crate::embedding::{EmbedMut, Serialized};
use crate::error::EmbedError;

use super::{ChatModel, ChatSettings};

static LLAMA_BACKEND: OnceCell<LlamaBackend> = OnceCell::new();
static SHARED_EMBEDDER: OnceCell<Arc<Serialized<NativeEmbeddingModel>>> = OnceCell::new();

pub fn llama_backend() -> anyhow::Result<&'static LlamaBackend> {
    LLAMA_BACKEND
        .get_or_try_init(LlamaBackend::init)
        .context("init llama backend")
}

/// Loads the embedding model once per process; later calls reuse it whatever backend they name.
pub fn shared_embedder(
    backend: &ResolvedBackend,
) -> Result<Arc<Serialized<NativeEmbeddingModel>>, EmbedError> {
    SHARED_EMBEDDER
        .get_or_try_init(|| {
            let llama = llama_backend().map_err(|e| EmbedError::Unavailable(format!("{e:#}")))?;
            let model = NativeEmbeddingModel::load(llama, backend)
                .map_err(|e| EmbedError::Unavailable(format!("{e:#}")))?;
            Ok(Arc::new(Serialized::new(model)))
        })
        .cloned()
}

/// Loaded model plus a context borrowing it.
struct ModelHandle {
    model: Option<Box<LlamaModel>>,
    ctx: Option<LlamaContext<'static>>,
}

impl ModelHandle {
    fn load(
        llama: &LlamaBackend,
        backend: &ResolvedBackend,
        embeddings: bool,
    ) -> anyhow::Result<(Self, u32)> {
        if !backend.model_path.exists() {
            return Err(anyhow!(
                "{} model not found: {}",
                backend.name,
                backend.model_path.display()
            ));
        }

        let mut model_params = LlamaModelParams::default();
        match backend.gpu_layers {
            // -1 offloads every layer.
            Some(-1) => model_params = model_params.with_n_gpu_layers(9999),
            Some(n) if n >= 0 => model_params = model_params.with_n_gpu_layers(n as u32),
            _ => {}
        }

        let model = Box::new(
            LlamaModel::load_from_file(llama, &backend.model_path, &model_params)
                .with_context(|| format!("load model {}", backend.model_path.display()))?,
        );
        // `LlamaContext` borrows `LlamaModel`. The model lives in a `Box` (stable address) and the
        // context is dropped first, so extending the borrow to 'static is sound.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let ctx_train = model_ref.n_ctx_train();
        let mut ctx_size = backend.ctx_size;
        if ctx_size == 0 {
            ctx_size = ctx_train.max(512);
        }
        if ctx_train > 0 && ctx_size > ctx_train {
            ctx_size = ctx_train;
        }
        ctx_size = ctx_size.max(256);

        let n_batch = backend.batch_size.unwrap_or(ctx_size).clamp(8, 65536);
        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(ctx_size))
            .with_n_batch(n_batch)
            .with_n_ubatch(n_batch)
            .with_embeddings(embeddings);
        if let Some(threads) = backend.threads.filter(|t| *t > 0) {
            ctx_params = ctx_params
                .with_n_threads(threads)
                .with_n_threads_batch(threads);
        }
        let ctx = model_ref
            .new_context(llama, ctx_params)
            .context("create model context")?;

        Ok((
            Self {
                model: Some(model),
                ctx: Some(ctx),
            },
            ctx_size,
        ))
    }

    fn model_ref(&self) -> anyhow::Result<&LlamaModel> {
        Ok(self.ctx_ref()?.model)
    }

    fn ctx_ref(&self) -> anyhow::Result<&LlamaContext<'static>> {
        self.ctx.as_ref().ok_or_else(|| anyhow!("model context already released"))
    }

    fn ctx_mut(&mut self) -> anyhow::Result<&mut LlamaContext<'static>> {
        self.ctx.as_mut().ok_or_else(|| anyhow!("model context already released"))
    }

    fn decode_checked(&mut self, batch: &mut LlamaBatch, name: &str, stage: &str) -> anyhow::Result<()> {
        self.ctx_mut()?.decode(batch).map_err(|err| match err {
            DecodeError::Unknown(-2) => anyhow!(
                "llama_decode threw a foreign exception (likely OOM) (model={name}, stage={stage})"
            ),
            other => anyhow!(other),
        })
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}

/// Sentence embeddings from a GGUF encoder (LaBSE, multilingual-e5 and the like).
pub struct NativeEmbeddingModel {
    pub name: String,
    pub model_path: PathBuf,
    handle: ModelHandle,
    n_batch: usize,
}

// SAFETY: the llama context is only reached through `&mut self`; `Serialized` hands it to one
// caller at a time.
unsafe impl Send for NativeEmbeddingModel {}

impl NativeEmbeddingModel {
    pub fn load(llama: &LlamaBackend, backend: &ResolvedBackend) -> anyhow::Result<Self> {
        let (handle, _ctx_size) = ModelHandle::load(llama, backend, true)?;
        let n_batch = (handle.ctx_ref()?.n_batch() as usize).max(8);
        Ok(Self {
            name: backend.name.clone(),
            model_path: backend.model_path.clone(),
            handle,
            n_batch,
        })
    }

    fn embed_all(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut batch = LlamaBatch::new(self.n_batch, 1);
        for text in texts {
            let mut tokens = self
                .handle
                .model_ref()?
                .str_to_token(text, AddBos::Always)
                .with_context(|| format!("tokenize for {}", self.name))?;
            // Overlong inputs keep their head.
            tokens.truncate(self.n_batch);

            // One sequence per decode: pooled output is read back as sequence 0.
            batch.clear();
            batch
                .add_sequence(&tokens, 0, false)
                .context("batch.add_sequence")?;
            self.handle.ctx_mut()?.clear_kv_cache();
            let name = self.name.clone();
            self.handle.decode_checked(&mut batch, &name, "decode(embed)")?;
            let emb = self
                .handle
                .ctx_ref()?
                .embeddings_seq_ith(0)
                .with_context(|| format!("read embedding from {name}"))?;
            out.push(emb.to_vec());
        }
        Ok(out)
    }
}

impl EmbedMut for NativeEmbeddingModel {
    fn embed_mut(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.embed_all(texts)
            .map_err(|e| EmbedError::Failed(format!("{e:#}")))
    }
}

/// A generative model behind the chat template shipped in its GGUF (ChatML otherwise).
pub struct NativeChatModel {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    handle: ModelHandle,
    template: LlamaChatTemplate,
    seed: u32,
}

// SAFETY: see `NativeEmbeddingModel`; `SharedChatModel` serializes access.
unsafe impl Send for NativeChatModel {}

impl NativeChatModel {
    pub fn load(llama: &LlamaBackend, backend: &ResolvedBackend) -> anyhow::Result<Self> {
        let (handle, ctx_size) = ModelHandle::load(llama, backend, false)?;
        let template = match handle.model_ref()?.chat_template(None) {
            Ok(t) => t,
            Err(_) => LlamaChatTemplate::new("chatml").context("build fallback chat template")?,
        };
        Ok(Self {
            name: backend.name.clone(),
            model_path: backend.model_path.clone(),
            ctx_size,
            handle,
            template,
            seed: 42,
        })
    }

    pub fn chat(
        &mut self,
        system_prompt: &str,
        user_prompt: &str,
        settings: ChatSettings,
    ) -> anyhow::Result<String> {
        let mut chat: Vec<LlamaChatMessage> = Vec::new();
        if !system_prompt.trim().is_empty() {
            chat.push(
                LlamaChatMessage::new("system".to_string(), system_prompt.to_string())
                    .context("build system message")?,
            );
        }
        chat.push(
            LlamaChatMessage::new("user".to_string(), user_prompt.to_string())
                .context("build user message")?,
        );
        let prompt = self
            .handle
            .model_ref()?
            .apply_chat_template(&self.template, &chat, true)
            .context("apply chat template")?;
        self.generate(&prompt, settings)
    }

    fn generate(&mut self, prompt: &str, settings: ChatSettings) -> anyhow::Result<String> {
        self.handle.ctx_mut()?.clear_kv_cache();

        let prompt_tokens = self
            .handle
            .model_ref()?
            .str_to_token(prompt, decide_add_bos(prompt))
            .context("tokenize prompt")?;
        if prompt_tokens.is_empty() {
            return Err(anyhow!("empty prompt tokens"));
        }

        let n_ctx = self.handle.ctx_ref()?.n_ctx() as usize;
        let available = n_ctx.saturating_sub(prompt_tokens.len() + 1);
        if available == 0 {
            return Err(anyhow!(
                "prompt_too_long: prompt_tokens={} n_ctx={}",
                prompt_tokens.len(),
                n_ctx
            ));
        }
        let max_tokens = (settings.max_tokens as usize).min(available);

        let n_batch = (self.handle.ctx_ref()?.n_batch() as usize).max(1);
        let last_index = prompt_tokens.len() - 1;
        for (chunk_no, chunk) in prompt_tokens.chunks(n_batch).enumerate() {
            let chunk_start = chunk_no * n_batch;
            let mut batch = LlamaBatch::new(chunk.len().max(512), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = chunk_start + i;
                batch
                    .add(token, pos as i32, &[0], pos == last_index)
                    .context("batch.add(prompt)")?;
            }
            let name = self.name.clone();
            self.handle.decode_checked(&mut batch, &name, "decode prompt")?;
        }

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::temp(settings.temperature),
            LlamaSampler::top_p(0.9, 1),
            if settings.temperature <= 0.0 {
                LlamaSampler::greedy()
            } else {
                LlamaSampler::dist(self.seed)
            },
        ]);
        sampler.accept_many(&prompt_tokens);

        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();
        let mut batch = LlamaBatch::new(512, 1);
        let mut n_cur = prompt_tokens.len() as i32;
        for _ in 0..max_tokens {
            let token = sampler.sample(self.handle.ctx_ref()?, -1);
            let model = self.handle.model_ref()?;
            if model.is_eog_token(token) {
                break;
            }
            let bytes = model
                .token_to_bytes(token, Special::Tokenize)
                .context("token_to_bytes")?;
            let mut piece = String::with_capacity(32);
            let _ = decoder.decode_to_string(&bytes, &mut piece, false);
            out.push_str(&piece);

            batch.clear();
            batch.add(token, n_cur, &[0], true).context("batch.add(gen)")?;
            n_cur += 1;
            let name = self.name.clone();
            self.handle.decode_checked(&mut batch, &name, "decode(gen)")?;
        }

        let mut tail = String::new();
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        out.push_str(&tail);
        Ok(out.trim().to_string())
    }
}

/// Shares one [`NativeChatModel`] behind `&self`.
pub struct SharedChatModel {
    inner: Mutex<NativeChatModel>,
    settings: ChatSettings,
}

impl SharedChatModel {
    pub fn load(backend: &ResolvedBackend, settings: ChatSettings) -> anyhow::Result<Self> {
        let model = NativeChatModel::load(llama_backend()?, backend)?;
        Ok(Self {
            inner: Mutex::new(model),
            settings,
        })
    }
}

impl ChatModel for SharedChatModel {
    fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.chat(system, user, self.settings)
    }
}

fn decide_add_bos(prompt: &str) -> AddBos {
    let p = prompt.trim_start();
    // Templates that already open with a BOS-like token get no second one.
    if p.starts_with("<s>")
        || p.starts_with("<|begin_of_text|>")
        || p.starts_with("<bos>")
        || p.starts_with("<|startoftext|>")
    {
        AddBos::Never
    } else {
        AddBos::Always
    }
}
