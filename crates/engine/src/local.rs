//! Local inference engine: runs GGUF-quantized models on your hardware.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) to run
//! quantized language models with no network access once the weights are cached.
//!
//! Supported model families:
//! - **TinyLlama** (1.1B params, Q4_K_M ~670 MB)
//! - **SmolLM** (135M to 1.7B params)
//! - **Phi-2** (2.7B params)
//! - **Qwen2** (0.5B, 1.5B)
//!
//! # Example
//! ```bash
//! RAGLINE_ENGINE=local RAGLINE_MODEL=tinyllama ragline serve
//! RAGLINE_ENGINE=local RAGLINE_MODEL=/path/to/model.gguf ragline ask "What is a lifetime?"
//! ```

use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use ragline_core::message::Role;
use ragline_core::{EngineError, FragmentIter, InferenceEngine, PromptMessage};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

// ── Well-known model aliases ───────────────────────────────────────────

/// Friendly aliases that resolve to HuggingFace repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    chat_template: ChatTemplate,
}

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    /// `<|system|>\n{content}</s>\n<|user|>\n{content}</s>\n<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>system\n{content}<|im_end|>\n...<|im_start|>assistant\n`
    ChatML,
    /// `[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{content} [/INST]`
    Llama2,
    /// `<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    match alias.to_lowercase().as_str() {
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            chat_template: ChatTemplate::TinyLlama,
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
            gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:1.7b" | "smollm-1.7b" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-1.7B-Instruct-GGUF",
            gguf_file: "smollm-1.7b-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-1.7B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "phi2" | "phi-2" => Some(ModelPreset {
            repo: "TheBloke/phi-2-GGUF",
            gguf_file: "phi-2.Q4_K_M.gguf",
            tokenizer_repo: "microsoft/phi-2",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
            gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
            gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        _ => None,
    }
}

// ── Local Engine ───────────────────────────────────────────────────────

/// An engine that runs a GGUF-quantized language model via Candle.
///
/// Not reentrant: generation borrows the model mutably, and the executor
/// drives it from a single worker thread.
pub struct LocalEngine {
    name: String,
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
    temperature: f32,
    seed: u64,
}

impl LocalEngine {
    /// Load a model by preset alias or `.gguf` path.
    ///
    /// Blocks while weights are downloaded (first use) and loaded.
    pub fn load(model_name: &str, temperature: f32, seed: u64) -> Result<Self, EngineError> {
        let device = Device::Cpu;

        let path = Path::new(model_name);
        let (model, tokenizer, chat_template) = if path.exists() && model_name.ends_with(".gguf") {
            Self::load_from_path(path, &device)?
        } else {
            Self::load_preset(model_name, &device)?
        };

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .or_else(|| tokenizer.token_to_id("<|eot_id|>"))
            .unwrap_or(2);

        info!(
            model = model_name,
            eos_token_id,
            template = ?chat_template,
            "Local model loaded"
        );

        Ok(Self {
            name: format!("local/{model_name}"),
            model,
            tokenizer,
            device,
            chat_template,
            eos_token_id,
            temperature,
            seed,
        })
    }

    fn load_preset(
        model_name: &str,
        device: &Device,
    ) -> Result<(qlm::ModelWeights, Tokenizer, ChatTemplate), EngineError> {
        let preset = resolve_preset(model_name).ok_or_else(|| {
            EngineError::ModelNotFound(format!(
                "Unknown local model '{model_name}'. Available presets: {}. \
                 Or provide a path to a .gguf file.",
                crate::local_presets().join(", ")
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        let api = Api::new().map_err(|e| {
            EngineError::LoadFailed(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let model_path = api
            .model(preset.repo.to_string())
            .get(preset.gguf_file)
            .map_err(|e| {
                EngineError::LoadFailed(format!(
                    "Failed to download model '{}' from '{}': {e}",
                    preset.gguf_file, preset.repo
                ))
            })?;

        let tokenizer_path = api
            .model(preset.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .map_err(|e| {
                EngineError::LoadFailed(format!(
                    "Failed to download tokenizer from '{}': {e}",
                    preset.tokenizer_repo
                ))
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;
        let model = read_weights(&model_path, device)?;

        Ok((model, tokenizer, preset.chat_template))
    }

    fn load_from_path(
        path: &Path,
        device: &Device,
    ) -> Result<(qlm::ModelWeights, Tokenizer, ChatTemplate), EngineError> {
        info!(path = %path.display(), "Loading local GGUF model");
        let model = read_weights(path, device)?;

        // tokenizer.json next to the GGUF file, else the TinyLlama tokenizer
        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer_path = if tokenizer_path.exists() {
            tokenizer_path
        } else {
            warn!("No tokenizer.json next to GGUF file, downloading TinyLlama tokenizer");
            Api::new()
                .and_then(|api| {
                    api.model("TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string())
                        .get("tokenizer.json")
                })
                .map_err(|e| {
                    EngineError::LoadFailed(format!("Failed to download fallback tokenizer: {e}"))
                })?
        };

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

        Ok((model, tokenizer, ChatTemplate::ChatML))
    }
}

fn read_weights(path: &Path, device: &Device) -> Result<qlm::ModelWeights, EngineError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to open model file: {e}")))?;
    let gguf = gguf_file::Content::read(&mut file)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;
    qlm::ModelWeights::from_gguf(gguf, &mut file, device)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to load model weights: {e}")))
}

// ── Chat templates ─────────────────────────────────────────────────────

fn format_prompt(template: ChatTemplate, messages: &[PromptMessage]) -> String {
    match template {
        ChatTemplate::TinyLlama => format_tinyllama(messages),
        ChatTemplate::ChatML => format_chatml(messages),
        ChatTemplate::Llama2 => format_llama2(messages),
        ChatTemplate::Llama3 => format_llama3(messages),
    }
}

fn format_tinyllama(messages: &[PromptMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("|>\n");
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn format_chatml(messages: &[PromptMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama2(messages: &[PromptMessage]) -> String {
    let mut prompt = String::new();
    let mut system_prompt = String::new();

    for msg in messages {
        match msg.role {
            // Llama2 has one system slot per [INST] block; consecutive system
            // messages are merged into the next user turn.
            Role::System => {
                if !system_prompt.is_empty() {
                    system_prompt.push_str("\n\n");
                }
                system_prompt.push_str(&msg.content);
            }
            Role::User => {
                prompt.push_str("[INST] ");
                if !system_prompt.is_empty() {
                    prompt.push_str("<<SYS>>\n");
                    prompt.push_str(&system_prompt);
                    prompt.push_str("\n<</SYS>>\n\n");
                    system_prompt.clear();
                }
                prompt.push_str(&msg.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&msg.content);
                prompt.push_str(" </s>");
            }
        }
    }
    // trailing persona directive
    if !system_prompt.is_empty() {
        prompt.push_str("[INST] <<SYS>>\n");
        prompt.push_str(&system_prompt);
        prompt.push_str("\n<</SYS>>\n\n [/INST]");
    }
    prompt
}

fn format_llama3(messages: &[PromptMessage]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&msg.content);
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Map Candle errors to EngineError.
fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Generation(format!("Candle inference error: {e}"))
}

// ── Token-by-token generation ──────────────────────────────────────────

/// Lazily samples one token per step and yields newly decoded text.
///
/// Tokens are decoded cumulatively so multi-token characters are only
/// emitted once complete.
struct TokenStream<'a> {
    engine: &'a mut LocalEngine,
    logits_processor: LogitsProcessor,
    next_input: Tensor,
    index_pos: usize,
    generated: Vec<u32>,
    emitted_bytes: usize,
    remaining: u32,
    finished: bool,
}

impl TokenStream<'_> {
    /// Run one forward pass. Returns `Ok(false)` at EOS.
    fn step(&mut self) -> Result<bool, EngineError> {
        let input_len = self.next_input.dim(1).map_err(map_candle_err)?;
        let logits = self
            .engine
            .model
            .forward(&self.next_input, self.index_pos)
            .map_err(map_candle_err)?;
        self.index_pos += input_len;

        let logits = logits
            .squeeze(0)
            .and_then(|l| l.to_dtype(DType::F32))
            .map_err(map_candle_err)?;
        let next_token = self
            .logits_processor
            .sample(&logits)
            .map_err(map_candle_err)?;

        if next_token == self.engine.eos_token_id {
            return Ok(false);
        }

        self.generated.push(next_token);
        self.next_input = Tensor::new(&[next_token][..], &self.engine.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        Ok(true)
    }

    /// Text decoded since the last emitted fragment.
    fn pending_text(&self, flush: bool) -> Result<Option<String>, EngineError> {
        let text = self
            .engine
            .tokenizer
            .decode(&self.generated, true)
            .map_err(|e| EngineError::Generation(format!("Detokenization failed: {e}")))?;

        // Incomplete UTF-8 sequences decode as U+FFFD until the next token lands
        if !flush && text.ends_with('\u{FFFD}') {
            return Ok(None);
        }
        match text.get(self.emitted_bytes..) {
            Some(delta) if !delta.is_empty() => Ok(Some(delta.to_string())),
            _ => Ok(None),
        }
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Result<String, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let more = if self.remaining == 0 {
                false
            } else {
                self.remaining -= 1;
                match self.step() {
                    Ok(more) => more,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            };

            if !more {
                self.finished = true;
                debug!(tokens = self.generated.len(), "Generation complete");
            }

            match self.pending_text(self.finished) {
                Ok(Some(delta)) => {
                    self.emitted_bytes += delta.len();
                    return Some(Ok(delta));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl InferenceEngine for LocalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &[PromptMessage],
        max_output_tokens: u32,
    ) -> Result<FragmentIter<'a>, EngineError> {
        if prompt.is_empty() {
            return Err(EngineError::MalformedPrompt("empty prompt".into()));
        }

        let text = format_prompt(self.chat_template, prompt);
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::MalformedPrompt(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_output_tokens,
            temperature = self.temperature,
            "Starting local generation"
        );

        let next_input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;

        let temperature = (self.temperature > 0.0).then_some(self.temperature as f64);
        let logits_processor = LogitsProcessor::new(self.seed, temperature, None);

        Ok(Box::new(TokenStream {
            engine: self,
            logits_processor,
            next_input,
            index_pos: 0,
            generated: Vec::new(),
            emitted_bytes: 0,
            remaining: max_output_tokens,
            finished: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_preset_aliases() {
        assert!(resolve_preset("tinyllama").is_some());
        assert!(resolve_preset("TinyLlama").is_some());
        assert!(resolve_preset("smollm:135m").is_some());
        assert!(resolve_preset("phi2").is_some());
        assert!(resolve_preset("qwen:0.5b").is_some());
        assert!(resolve_preset("nonexistent").is_none());
    }

    #[test]
    fn every_listed_preset_resolves() {
        for alias in crate::local_presets() {
            assert!(resolve_preset(alias).is_some(), "{alias}");
        }
    }

    #[test]
    fn unknown_model_is_not_found() {
        let err = LocalEngine::load("definitely-not-a-model", 0.0, 1).err().unwrap();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
    }

    #[test]
    fn chat_template_tinyllama() {
        let messages = vec![
            PromptMessage::user("Hello!"),
            PromptMessage::system("You are helpful."),
        ];
        let prompt = format_tinyllama(&messages);
        assert!(prompt.starts_with("<|user|>\nHello!</s>\n"));
        assert!(prompt.contains("<|system|>\nYou are helpful.</s>"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn chat_template_chatml() {
        let messages = vec![PromptMessage::system("You are helpful."), PromptMessage::user("Hi")];
        let prompt = format_chatml(&messages);
        assert!(prompt.contains("<|im_start|>system"));
        assert!(prompt.contains("<|im_start|>user"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn chat_template_llama2_merges_system_messages() {
        let messages = vec![
            PromptMessage::system("Retrieved context:"),
            PromptMessage::user("Question"),
            PromptMessage::system("Be helpful."),
        ];
        let prompt = format_llama2(&messages);
        assert!(prompt.starts_with("[INST] <<SYS>>\nRetrieved context:"));
        assert!(prompt.contains("Question [/INST]"));
        assert!(prompt.contains("Be helpful."));
    }

    #[test]
    fn chat_template_llama3() {
        let messages = vec![PromptMessage::user("Hello")];
        let prompt = format_llama3(&messages);
        assert!(prompt.contains("<|begin_of_text|>"));
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>"));
        assert!(prompt.contains("Hello"));
    }
}
