//! Local LLM client backed by llama-cpp-2.
//!
//! The model handle lives for the client's lifetime; every generation
//! acquires a fresh context and releases it before returning. GPU failures
//! fall back to a CPU reload when the injected decision callback agrees.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::data::LlamaTokenData;
use llama_cpp_2::token::data_array::LlamaTokenDataArray;
use log::{debug, info, warn};
use regex::Regex;

use super::backend::{self, BackendProbes, GpuLayers};
use super::LlmError;
use crate::types::FileType;

/// llama.cpp's default sampling seed.
const DEFAULT_SEED: u32 = u32::MAX;

const MIN_P: f32 = 0.05;
const TEMPERATURE: f32 = 0.8;

/// Token budget for a categorize call; one label line never needs more.
const CATEGORIZE_MAX_TOKENS: i32 = 64;

/// Asked whether a GPU failure may be retried on the CPU. The argument
/// describes the failure.
pub type FallbackDecision = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Construction options for [`LocalLlmClient`].
#[derive(Clone, Default)]
pub struct LocalLlmOptions {
    /// Consulted before a GPU-to-CPU reload. `None` permits the fallback.
    pub fallback_decision: Option<FallbackDecision>,
    /// Device probes; defaults query the real build configuration.
    pub probes: BackendProbes,
}

struct ModelState {
    model: LlamaModel,
    ctx_params: LlamaContextParams,
    n_ctx: u32,
    n_batch: u32,
    on_cpu: bool,
}

/// Local "text in, text out" categorization client.
pub struct LocalLlmClient {
    model_path: PathBuf,
    llama: LlamaBackend,
    state: Mutex<ModelState>,
    fallback_decision: Option<FallbackDecision>,
    prompt_logging: AtomicBool,
}

// SAFETY: all mutable model state sits behind the Mutex, and every
// generation builds a private context and sampler view from it. The
// llama-cpp-2 model and backend handles are documented as safe for read
// access across threads; the orchestrator additionally serializes calls.
unsafe impl Send for LocalLlmClient {}
unsafe impl Sync for LocalLlmClient {}

impl LocalLlmClient {
    /// Loads the model, selecting a compute backend and GPU layer count
    /// from the environment and the injected probes.
    pub fn new(model_path: &Path, options: LocalLlmOptions) -> Result<Self, LlmError> {
        info!(
            "Initializing local LLM client with model '{}'",
            model_path.display()
        );

        let llama = LlamaBackend::init().map_err(|e| LlmError::BackendInit(e.to_string()))?;

        let layers = backend::select_gpu_layers(model_path, &options.probes);
        let n_ctx = backend::resolve_context_length().clamp(512, 8192);
        info!("Configured context length {} token(s) for local LLM", n_ctx);

        let (model, on_cpu) = Self::load_model_with_fallback(
            &llama,
            model_path,
            layers,
            options.fallback_decision.as_ref(),
        )?;

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx);

        if backend::llama_logs_enabled() {
            info!("Verbose llama.cpp logging requested via environment configuration");
        }

        Ok(Self {
            model_path: model_path.to_path_buf(),
            llama,
            state: Mutex::new(ModelState {
                model,
                ctx_params,
                n_ctx,
                n_batch: n_ctx,
                on_cpu,
            }),
            fallback_decision: options.fallback_decision,
            prompt_logging: AtomicBool::new(false),
        })
    }

    fn model_params_for(layers: GpuLayers) -> LlamaModelParams {
        match layers.count() {
            Some(count) => LlamaModelParams::default().with_n_gpu_layers(count),
            None => LlamaModelParams::default(),
        }
    }

    fn load_model_with_fallback(
        llama: &LlamaBackend,
        model_path: &Path,
        layers: GpuLayers,
        fallback_decision: Option<&FallbackDecision>,
    ) -> Result<(LlamaModel, bool), LlmError> {
        let on_cpu = layers == GpuLayers::Count(0);
        let params = Self::model_params_for(layers);
        match LlamaModel::load_from_file(llama, model_path, &params) {
            Ok(model) => {
                info!("Loaded local model '{}'", model_path.display());
                Ok((model, on_cpu))
            }
            Err(err) if !on_cpu => {
                warn!("Failed to load model with GPU backend; retrying on CPU.");
                if !allow_gpu_fallback(fallback_decision, "model load failure") {
                    warn!("GPU fallback declined during model load; aborting.");
                    return Err(LlmError::ModelLoad(
                        "GPU backend failed to initialize and CPU fallback was declined."
                            .to_string(),
                    ));
                }
                let cpu_params = Self::model_params_for(GpuLayers::Count(0));
                match LlamaModel::load_from_file(llama, model_path, &cpu_params) {
                    Ok(model) => Ok((model, true)),
                    Err(_) => Err(LlmError::ModelLoad(format!(
                        "Failed to load model from '{}' ({})",
                        model_path.display(),
                        err
                    ))),
                }
            }
            Err(err) => Err(LlmError::ModelLoad(format!(
                "Failed to load model from '{}' ({})",
                model_path.display(),
                err
            ))),
        }
    }

    /// Generates a reply for `prompt`.
    fn generate(
        &self,
        prompt: &str,
        max_tokens: i32,
        apply_sanitizer: bool,
    ) -> Result<String, LlmError> {
        let mut state = self.state.lock().map_err(|_| LlmError::MutexPoisoned)?;
        let mut allow_fallback = true;

        loop {
            match run_generation(&self.llama, &mut state, prompt, max_tokens) {
                Ok(output) => {
                    debug!("Generation complete, produced {} character(s)", output.len());
                    return Ok(if apply_sanitizer {
                        sanitize_output(&output)
                    } else {
                        output
                    });
                }
                Err(err) if allow_fallback && !state.on_cpu => {
                    if !allow_gpu_fallback(
                        self.fallback_decision.as_ref(),
                        "generation failure",
                    ) {
                        return Err(LlmError::Inference(
                            "GPU backend failed during generation and CPU fallback was declined."
                                .to_string(),
                        ));
                    }
                    allow_fallback = false;
                    warn!("LLM generation failed on GPU ({}); retrying on CPU.", err);

                    let cpu_params = Self::model_params_for(GpuLayers::Count(0));
                    match LlamaModel::load_from_file(&self.llama, &self.model_path, &cpu_params) {
                        Ok(cpu_model) => {
                            state.model = cpu_model;
                            state.on_cpu = true;
                        }
                        Err(reload_err) => {
                            log::error!("Failed to reload model on CPU: {}", reload_err);
                            return Err(err);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn prompt_logging_enabled(&self) -> bool {
        self.prompt_logging.load(Ordering::Relaxed)
    }
}

impl super::LlmClient for LocalLlmClient {
    fn categorize_file(
        &self,
        file_name: &str,
        file_path: &str,
        file_type: FileType,
        hint_context: &str,
    ) -> Result<String, LlmError> {
        debug!(
            "Requesting local categorization for '{}' ({})",
            file_name, file_type
        );
        let prompt = make_prompt(file_name, file_path, file_type, hint_context);
        if self.prompt_logging_enabled() {
            println!("\n[DEV][PROMPT] Categorization request\n{}", prompt);
        }
        let response = self.generate(&prompt, CATEGORIZE_MAX_TOKENS, true)?;
        if self.prompt_logging_enabled() {
            println!("[DEV][RESPONSE] Categorization reply\n{}", response);
        }
        Ok(response)
    }

    fn complete_prompt(&self, prompt: &str, max_tokens: i32) -> Result<String, LlmError> {
        let capped = if max_tokens > 0 { max_tokens } else { 256 };
        self.generate(prompt, capped, false)
    }

    fn set_prompt_logging_enabled(&self, enabled: bool) {
        self.prompt_logging.store(enabled, Ordering::Relaxed);
    }
}

fn allow_gpu_fallback(callback: Option<&FallbackDecision>, reason: &str) -> bool {
    if backend::cpu_backend_requested() {
        return false;
    }
    match callback {
        Some(decide) => {
            let allowed = decide(reason);
            if !allowed {
                warn!("GPU fallback declined: {}", reason);
            }
            allowed
        }
        None => true,
    }
}

/// Wraps the entry description in the fixed categorization instruction.
fn make_prompt(
    file_name: &str,
    file_path: &str,
    file_type: FileType,
    hint_context: &str,
) -> String {
    let mut user_section = String::new();
    if !file_path.is_empty() {
        user_section.push_str(&format!("\nFull path: {}\n", file_path));
    }
    user_section.push_str(&format!("Name: {}\n", file_name));

    let mut prompt = match file_type {
        FileType::File => format!("\nCategorize this file:\n{}", user_section),
        FileType::Directory => format!("\nCategorize the directory:\n{}", user_section),
    };
    if !hint_context.is_empty() {
        prompt.push_str(&format!("\n{}\n", hint_context));
    }

    format!(
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\
         You are a file categorization assistant. You must always follow the exact format. \
         If the file is an installer, determine the type of software it installs. \
         Base your answer on the filename, extension, and any directory context provided. \
         The output must be:\n\
         <Main category> : <Subcategory>\n\
         Main category must be broad (one or two words, plural). Subcategory must be specific, \
         relevant, and never just repeat the main category. Output exactly one line. \
         Do not explain, add line breaks, or use words like 'Subcategory'. If uncertain, \
         always make your best guess based on the name only. Do not apologize or state \
         uncertainty. Never say you lack information.\n\
         Examples:\n\
         Texts : Documents\n\
         Productivity : File managers\n\
         Tables : Financial logs\n\
         Utilities : Task managers\n\
         <|eot_id|><|start_header_id|>user<|end_header_id|>\n\
         {}<|eot_id|><|start_header_id|>assistant<|end_header_id|>",
        prompt
    )
}

/// Descending `(n_ctx, n_batch)` retry schedule for context initialization,
/// skipping duplicates and entries that do not shrink the original request.
fn build_context_attempts(n_ctx: u32, n_batch: u32) -> Vec<(u32, u32)> {
    let mut attempts: Vec<(u32, u32)> = Vec::new();
    let mut add_attempt = |ctx: u32, batch: u32| {
        let ctx = ctx.max(512);
        let batch = batch.clamp(1, ctx);
        if ctx > n_ctx || batch > n_batch {
            return;
        }
        if ctx == n_ctx && batch == n_batch {
            return;
        }
        if attempts.contains(&(ctx, batch)) {
            return;
        }
        attempts.push((ctx, batch));
    };

    add_attempt(n_ctx.min(2048), n_batch.min(1024));
    add_attempt(n_ctx.min(1024), n_batch.min(512));
    add_attempt(n_ctx.min(512), n_batch.min(256));
    attempts
}

fn run_generation(
    llama: &LlamaBackend,
    state: &mut ModelState,
    prompt: &str,
    max_tokens: i32,
) -> Result<String, LlmError> {
    debug!(
        "Generating response with prompt length {} target {} token(s)",
        prompt.len(),
        max_tokens
    );

    let ModelState {
        model,
        ctx_params,
        n_ctx,
        n_batch,
        ..
    } = state;

    // Context init with the shrinking retry schedule; the surviving sizes
    // are kept for subsequent calls.
    let mut resolved = (*n_ctx, *n_batch);
    let mut ctx = None;
    for (attempt_ctx, attempt_batch) in std::iter::once((*n_ctx, *n_batch))
        .chain(build_context_attempts(*n_ctx, *n_batch))
    {
        let params = ctx_params
            .clone()
            .with_n_ctx(NonZeroU32::new(attempt_ctx))
            .with_n_batch(attempt_batch.min(attempt_ctx));
        match model.new_context(llama, params) {
            Ok(created) => {
                resolved = (attempt_ctx, attempt_batch.min(attempt_ctx));
                ctx = Some(created);
                break;
            }
            Err(err) => {
                warn!(
                    "Failed to initialize llama context (n_ctx={}, n_batch={}): {}",
                    attempt_ctx, attempt_batch, err
                );
            }
        }
    }
    let mut ctx = ctx.ok_or_else(|| {
        LlmError::ContextCreation("Failed to initialize llama context".to_string())
    })?;
    (*n_ctx, *n_batch) = resolved;
    *ctx_params = ctx_params
        .clone()
        .with_n_ctx(NonZeroU32::new(resolved.0))
        .with_n_batch(resolved.1);

    // Tokenize; when the prompt exceeds the context, the oldest tokens are
    // dropped.
    let mut tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| LlmError::Tokenization(e.to_string()))?;
    let ctx_len = resolved.0 as usize;
    if tokens.len() > ctx_len {
        let overflow = tokens.len() - ctx_len;
        warn!(
            "Prompt tokens ({}) exceed context ({}); truncating oldest tokens",
            tokens.len(),
            ctx_len
        );
        tokens.drain(0..overflow);
    }
    let n_prompt = tokens.len();
    debug!("Tokenized prompt into {} tokens", n_prompt);
    if n_prompt == 0 {
        return Err(LlmError::Tokenization("Empty prompt after tokenization".to_string()));
    }

    // Decode the prompt in n_batch-sized chunks.
    let batch_size = resolved.1 as usize;
    let mut batch = LlamaBatch::new(ctx_len, 1);
    let mut position = 0usize;
    for chunk in tokens.chunks(batch_size) {
        batch.clear();
        for (offset, token) in chunk.iter().enumerate() {
            let absolute = position + offset;
            let is_last_of_prompt = absolute == n_prompt - 1;
            batch
                .add(*token, absolute as i32, &[0], is_last_of_prompt)
                .map_err(|e| LlmError::Inference(format!("Failed to add token: {}", e)))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| LlmError::Inference(format!("Failed to decode prompt: {}", e)))?;
        position += chunk.len();
    }

    // Sample one token at a time until end-of-generation or the budget is
    // spent.
    let mut output = String::new();
    let mut n_cur = n_prompt;
    for _ in 0..max_tokens.max(0) {
        let candidates = ctx.candidates_ith(batch.n_tokens() - 1);
        let filtered = apply_sampling_filters(candidates.collect());
        let mut candidates_array = LlamaTokenDataArray::from_iter(filtered, false);
        let new_token = candidates_array.sample_token(DEFAULT_SEED);

        if model.is_eog_token(new_token) {
            break;
        }

        match model.token_to_str(new_token, Special::Tokenize) {
            Ok(piece) => output.push_str(&piece),
            Err(_) => break,
        }

        batch.clear();
        batch
            .add(new_token, n_cur as i32, &[0], true)
            .map_err(|e| LlmError::Inference(format!("Failed to add token: {}", e)))?;
        ctx.decode(&mut batch)
            .map_err(|e| LlmError::Inference(format!("Failed to decode: {}", e)))?;
        n_cur += 1;
    }

    Ok(output.trim_start().to_string())
}

/// Applies the sampling chain (temperature then min-p) to the raw logits
/// before the seeded draw.
fn apply_sampling_filters(mut candidates: Vec<LlamaTokenData>) -> Vec<LlamaTokenData> {
    if candidates.is_empty() {
        return candidates;
    }

    let max_logit = candidates
        .iter()
        .map(|data| data.logit())
        .fold(f32::NEG_INFINITY, f32::max);

    // Temperature rescales logits; min-p keeps tokens whose probability is
    // at least MIN_P of the best token's (always keeping the best one).
    let threshold = MIN_P.ln();
    let mut filtered: Vec<LlamaTokenData> = candidates
        .drain(..)
        .filter_map(|data| {
            let scaled = (data.logit() - max_logit) / TEMPERATURE;
            if scaled >= threshold {
                Some(LlamaTokenData::new(data.id(), scaled, 0.0))
            } else {
                None
            }
        })
        .collect();

    if filtered.is_empty() {
        filtered.push(LlamaTokenData::new(
            // max_logit came from a non-empty list, so this is unreachable
            // unless every logit was NaN; fall back to token 0.
            llama_cpp_2::token::LlamaToken(0),
            0.0,
            0.0,
        ));
    }
    filtered
}

/// Extracts the first `"<left> : <right>"` line from free-form output,
/// dropping a trailing parenthetical remark.
fn sanitize_output(output: &str) -> String {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"([^:\s][^\n:]*?\s*:\s*[^\n]+)").expect("valid regex"));

    let trimmed = output.trim();
    let Some(found) = pattern.find(trimmed) else {
        return trimmed.to_string();
    };

    let mut result = found.as_str().trim().to_string();
    if let Some(paren) = result.find(" (") {
        result.truncate(paren);
        result.truncate(result.trim_end().len());
    }
    result
}
