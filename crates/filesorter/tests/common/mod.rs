//! Shared fixtures for the integration suite: scripted LLM clients, an
//! environment-variable guard, and synthetic GGUF model files.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use filesorter::llm::{LlmClient, LlmError};
use filesorter::types::FileType;
use filesorter::{CategorizationService, Database, Settings};

/// Serializes tests that touch process environment variables.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sets an environment variable for the guard's lifetime, restoring the
/// previous value on drop.
pub struct EnvVarGuard {
    key: String,
    previous: Option<String>,
}

impl EnvVarGuard {
    pub fn set(key: &str, value: &str) -> Self {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value);
        Self {
            key: key.to_string(),
            previous,
        }
    }

    pub fn unset(key: &str) -> Self {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        Self {
            key: key.to_string(),
            previous,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var(&self.key, value),
            None => std::env::remove_var(&self.key),
        }
    }
}

/// Builds a service over a fresh in-memory database.
pub fn service_with(settings: Settings) -> CategorizationService {
    let db = Database::open_in_memory().expect("in-memory database");
    CategorizationService::new(settings, db).expect("service construction")
}

/// Builds a service and also hands back the shared database handle for
/// direct cache assertions.
pub fn service_and_db(settings: Settings) -> (CategorizationService, Database) {
    let db = Database::open_in_memory().expect("in-memory database");
    let service = CategorizationService::new(settings, db.clone()).expect("service construction");
    (service, db)
}

/// LLM stub returning one fixed reply, counting calls and recording the
/// hint context of each request.
pub struct FixedResponseLlm {
    response: String,
    calls: AtomicUsize,
    contexts: Mutex<Vec<String>>,
}

impl FixedResponseLlm {
    pub fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

impl LlmClient for FixedResponseLlm {
    fn categorize_file(
        &self,
        _file_name: &str,
        _file_path: &str,
        _file_type: FileType,
        hint_context: &str,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(hint_context.to_string());
        Ok(self.response.clone())
    }

    fn complete_prompt(&self, _prompt: &str, _max_tokens: i32) -> Result<String, LlmError> {
        Ok(String::new())
    }

    fn set_prompt_logging_enabled(&self, _enabled: bool) {}
}

/// LLM stub that rate-limits the first `failures` calls, then succeeds.
pub struct RateLimitedLlm {
    response: String,
    failures: usize,
    retry_after_seconds: u64,
    calls: AtomicUsize,
}

impl RateLimitedLlm {
    pub fn new(response: &str, failures: usize, retry_after_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            failures,
            retry_after_seconds,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for RateLimitedLlm {
    fn categorize_file(
        &self,
        _file_name: &str,
        _file_path: &str,
        _file_type: FileType,
        _hint_context: &str,
    ) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LlmError::RateLimited {
                retry_after_seconds: self.retry_after_seconds,
            });
        }
        Ok(self.response.clone())
    }

    fn complete_prompt(&self, _prompt: &str, _max_tokens: i32) -> Result<String, LlmError> {
        Ok(String::new())
    }

    fn set_prompt_logging_enabled(&self, _enabled: bool) {}
}

/// LLM stub that blocks before answering, to exercise the timeout path.
pub struct SlowLlm {
    delay: Duration,
}

impl SlowLlm {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

impl LlmClient for SlowLlm {
    fn categorize_file(
        &self,
        _file_name: &str,
        _file_path: &str,
        _file_type: FileType,
        _hint_context: &str,
    ) -> Result<String, LlmError> {
        std::thread::sleep(self.delay);
        Ok("Images : Photos".to_string())
    }

    fn complete_prompt(&self, _prompt: &str, _max_tokens: i32) -> Result<String, LlmError> {
        Ok(String::new())
    }

    fn set_prompt_logging_enabled(&self, _enabled: bool) {}
}

/// Collects progress lines from a run.
#[derive(Clone, Default)]
pub struct ProgressLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> filesorter::ProgressCallback {
        let lines = Arc::clone(&self.lines);
        Arc::new(move |message: &str| {
            lines.lock().unwrap().push(message.to_string());
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn any_contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

/// Writes a minimal GGUF file declaring `block_count` layers, padded to
/// `size_bytes`.
pub fn write_fake_model(block_count: u32, size_bytes: usize) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"GGUF");
    bytes.extend_from_slice(&3u32.to_le_bytes()); // version
    bytes.extend_from_slice(&0u64.to_le_bytes()); // tensor count
    bytes.extend_from_slice(&1u64.to_le_bytes()); // kv count

    let key = "llama.block_count";
    bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
    bytes.extend_from_slice(key.as_bytes());
    bytes.extend_from_slice(&4u32.to_le_bytes()); // GGUF uint32 type tag
    bytes.extend_from_slice(&block_count.to_le_bytes());

    if bytes.len() < size_bytes {
        bytes.resize(size_bytes, 0);
    }

    let mut file = tempfile::NamedTempFile::new().expect("temp model file");
    file.write_all(&bytes).expect("write model bytes");
    file.flush().expect("flush model bytes");
    file
}
