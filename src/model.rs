/// Model backend: streamed completions from a locally hosted LLM.
///
/// `OllamaClient` talks to any OpenAI-compatible `/v1/chat/completions`
/// endpoint (Ollama, llama.cpp server, LM Studio). Text arrives on a
/// `Completion` as it streams; dropping or cancelling the completion aborts
/// the HTTP request.
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ModelError;
use crate::mode::{AiMode, SuggestionKind};

const CHUNK_QUEUE: usize = 64;
/// Lines of prior command output included per history entry in the prompt.
const CONTEXT_OUTPUT_LINES: usize = 20;

// ── Prompt context ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PromptContext {
    pub query: String,
    pub cwd: PathBuf,
    pub mode: AiMode,
    /// (command, output) pairs, oldest first
    pub recent: Vec<(String, String)>,
}

impl PromptContext {
    pub fn system_prompt(&self) -> String {
        let task = match self.mode.suggestion_kind() {
            SuggestionKind::Code => {
                "Answer with a single code snippet in a fenced code block. Do not explain it."
            }
            SuggestionKind::Command => {
                "Answer with exactly one shell command on a single line and nothing else. \
                 No explanations, no markdown, no leading prompt characters."
            }
        };
        format!(
            "You are a shell assistant running inside the user's terminal.\n\
             Current working directory: {}\n{task}",
            self.cwd.display()
        )
    }

    pub fn user_message(&self) -> String {
        let mut s = String::new();
        if !self.recent.is_empty() {
            s.push_str("Recent commands:\n");
            for (cmd, output) in &self.recent {
                s.push_str(&format!("$ {cmd}\n"));
                let lines: Vec<&str> = output.lines().collect();
                let start = lines.len().saturating_sub(CONTEXT_OUTPUT_LINES);
                for line in &lines[start..] {
                    s.push_str(line);
                    s.push('\n');
                }
            }
            s.push('\n');
        }
        s.push_str(&self.query);
        s
    }
}

// ── Completion stream ─────────────────────────────────────────────────────────

/// An in-flight completion. Yields text chunks until the model is done.
pub struct Completion {
    rx: mpsc::Receiver<Result<String, ModelError>>,
    task: Option<JoinHandle<()>>,
}

impl Completion {
    pub fn new(rx: mpsc::Receiver<Result<String, ModelError>>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<Result<String, ModelError>> {
        self.rx.recv().await
    }

    /// Abort the underlying request. Further `next()` calls return `None`.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, ctx: PromptContext) -> Result<Completion, ModelError>;
}

// ── SSE decoding ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Line-buffered decoder for `data: {...}` server-sent events.
/// Network chunks may split anywhere, including inside the `data:` prefix.
#[derive(Default)]
pub struct SseDecoder {
    buf: String,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes; returns the text deltas completed by this feed.
    pub fn feed(&mut self, raw: &str) -> Result<Vec<String>, ModelError> {
        self.buf.push_str(raw);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "data: [DONE]" {
                self.done = true;
                continue;
            }
            let Some(json) = line.strip_prefix("data:") else { continue };
            let chunk: StreamChunk = serde_json::from_str(json.trim())
                .map_err(|e| ModelError::Malformed(format!("{e}: {json}")))?;
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(text) = choice.delta.and_then(|d| d.content) {
                    if !text.is_empty() {
                        out.push(text);
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

// ── Ollama / OpenAI-compatible client ─────────────────────────────────────────

pub struct OllamaClient {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
}

impl OllamaClient {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            api_key: None,
        }
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    fn request_body(&self, ctx: &PromptContext) -> Value {
        serde_json::json!({
            "model": self.model,
            "stream": true,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": ctx.system_prompt() },
                { "role": "user", "content": ctx.user_message() },
            ],
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn complete(&self, ctx: PromptContext) -> Result<Completion, ModelError> {
        let url = format!("{}/v1/chat/completions", self.endpoint.trim_end_matches('/'));

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(&ctx));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        tracing::debug!(%url, model = %self.model, "model request");
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Http { status, body });
        }

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        let task = tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::from(e))).await;
                        return;
                    }
                };
                match decoder.feed(&String::from_utf8_lossy(&bytes)) {
                    Ok(texts) => {
                        for text in texts {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }
        });

        Ok(Completion::new(rx, Some(task)))
    }
}

// ── Output cleanup ────────────────────────────────────────────────────────────

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?(?:</think>|\z)").expect("valid regex"));

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n?(.*?)```").expect("valid regex"));

/// Turn raw model output into the text to route.
///
/// Reasoning blocks are dropped and fenced code is unwrapped. For commands,
/// only the first non-empty line survives, minus any `$ ` prompt prefix.
/// Empty results are malformed output.
pub fn extract(text: &str, kind: SuggestionKind) -> Result<String, ModelError> {
    let without_think = THINK_BLOCK.replace_all(text, "");
    let body = match FENCE.captures(&without_think) {
        Some(cap) => cap[1].to_string(),
        None => without_think.to_string(),
    };

    let cleaned = match kind {
        SuggestionKind::Code => body.trim().to_string(),
        SuggestionKind::Command => body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.strip_prefix("$ ").unwrap_or(l).trim_matches('`').trim().to_string())
            .unwrap_or_default(),
    };

    if cleaned.is_empty() {
        return Err(ModelError::Malformed("empty completion".to_string()));
    }
    Ok(cleaned)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
