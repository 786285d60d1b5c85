//! Categorization orchestrator.
//!
//! Drives a batch of entries through cache lookup, prompt assembly, model
//! invocation with a wall-clock timeout, reply parsing, taxonomy
//! resolution, validation and persistence. Per-entry failures are reported
//! through the progress callback and never abort the batch; only a failing
//! LLM client factory is terminal.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::{LlmChoice, Settings};
use crate::db::{cache, Database, DatabaseError, ResolvedCategory, TaxonomyResolver};
use crate::labels::sanitize_path_label;
use crate::llm::{LlmClient, LlmError};
use crate::types::{CategorizedFile, FileEntry, FileType};

mod hints;
mod parse;
mod validate;

use hints::SessionHistory;

const LOCAL_TIMEOUT_ENV: &str = "AI_FILE_SORTER_LOCAL_LLM_TIMEOUT";
const REMOTE_TIMEOUT_ENV: &str = "AI_FILE_SORTER_REMOTE_LLM_TIMEOUT";
const CUSTOM_TIMEOUT_ENV: &str = "AI_FILE_SORTER_CUSTOM_LLM_TIMEOUT";

const DEFAULT_BACKOFF_SECONDS: u64 = 60;

/// Receives human-readable progress lines.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Announces that an entry entered the work queue.
pub type QueueCallback = Arc<dyn Fn(&FileEntry) + Send + Sync>;
/// Invoked when an entry needs another categorization attempt, with the
/// reason.
pub type RecategorizationCallback = Arc<dyn Fn(&CategorizedFile, &str) + Send + Sync>;
/// Lets the host substitute the name/path shown to the model.
pub type PromptOverrideProvider = Arc<dyn Fn(&FileEntry) -> Option<PromptOverride> + Send + Sync>;
/// Supplies a rename suggestion recorded next to the categorization.
pub type SuggestedNameProvider = Arc<dyn Fn(&FileEntry) -> String + Send + Sync>;

/// Replacement identity for prompt assembly.
#[derive(Debug, Clone)]
pub struct PromptOverride {
    pub name: String,
    pub path: String,
}

/// Optional observers and providers for a categorization run.
#[derive(Clone, Default)]
pub struct CategorizationHooks {
    pub progress: Option<ProgressCallback>,
    pub queue: Option<QueueCallback>,
    pub recategorization: Option<RecategorizationCallback>,
    pub prompt_override: Option<PromptOverrideProvider>,
    pub suggested_name: Option<SuggestedNameProvider>,
}

/// Terminal orchestrator errors.
#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("Failed to create LLM client: {0}")]
    ClientInit(#[source] LlmError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Outcome of one cache-or-model step.
enum StepOutcome {
    Done {
        resolved: ResolvedCategory,
        from_cache: bool,
    },
    /// Credentials were missing; already reported.
    Skip,
}

/// Per-run categorization driver over a settings snapshot and the shared
/// cache database.
pub struct CategorizationService {
    settings: Settings,
    db: Database,
    taxonomy: Mutex<TaxonomyResolver>,
}

impl CategorizationService {
    pub fn new(settings: Settings, db: Database) -> Result<Self, DatabaseError> {
        let taxonomy = TaxonomyResolver::load(&db)?;
        Ok(Self {
            settings,
            db,
            taxonomy: Mutex::new(taxonomy),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Checks that the configured remote provider has usable credentials.
    /// Returns a user-facing message when it does not. Local mode always
    /// passes.
    pub fn ensure_remote_credentials(&self) -> Result<(), String> {
        match self.settings.llm_choice {
            LlmChoice::Local => Ok(()),
            LlmChoice::RemoteCustom => {
                if self
                    .settings
                    .active_custom_endpoint()
                    .map(|endpoint| endpoint.is_valid())
                    .unwrap_or(false)
                {
                    Ok(())
                } else {
                    error!("Custom API endpoint selected but is missing required settings.");
                    Err("Custom API endpoint is missing required settings. \
                         Please edit it in the Select LLM dialog."
                        .to_string())
                }
            }
            LlmChoice::RemoteOpenAi | LlmChoice::RemoteGemini => {
                let (has_key, provider) = match self.settings.llm_choice {
                    LlmChoice::RemoteOpenAi => {
                        (!self.settings.openai_api_key.is_empty(), "OpenAI")
                    }
                    _ => (!self.settings.gemini_api_key.is_empty(), "Gemini"),
                };
                if has_key {
                    Ok(())
                } else {
                    error!("Remote LLM selected but {} API key is not configured.", provider);
                    Err(format!(
                        "Remote model credentials are missing. Enter your {} API key \
                         in the Select LLM dialog.",
                        provider
                    ))
                }
            }
        }
    }

    /// Deletes cached rows in `directory_path` that carry neither labels
    /// nor a rename decision. Returns the removed rows.
    pub fn prune_empty_cached_entries(
        &self,
        directory_path: &str,
    ) -> Result<Vec<CategorizedFile>, DatabaseError> {
        cache::prune_empty(&self.db, directory_path)
    }

    /// Loads cached decisions for a directory, recursively when the
    /// settings include subdirectories.
    pub fn load_cached_entries(
        &self,
        directory_path: &str,
    ) -> Result<Vec<CategorizedFile>, DatabaseError> {
        if self.settings.include_subdirectories {
            cache::list_recursive(&self.db, directory_path)
        } else {
            cache::list(&self.db, directory_path)
        }
    }

    /// Folds a raw label pair into the canonical taxonomy.
    pub fn resolve_category(&self, category: &str, subcategory: &str) -> ResolvedCategory {
        match self.taxonomy.lock() {
            Ok(mut taxonomy) => taxonomy.resolve(category, subcategory),
            Err(_) => {
                error!("Taxonomy lock poisoned; returning rejected resolution");
                ResolvedCategory {
                    taxonomy_id: -1,
                    category: category.to_string(),
                    subcategory: subcategory.to_string(),
                }
            }
        }
    }

    /// Bounded listing of canonical pairs for display purposes.
    pub fn taxonomy_snapshot(&self, max_entries: usize) -> Vec<(String, String)> {
        self.taxonomy
            .lock()
            .map(|taxonomy| taxonomy.snapshot(max_entries))
            .unwrap_or_default()
    }

    /// Categorizes `files` in order under the shared cancellation flag.
    ///
    /// Returns the successfully categorized entries; cancelled or failed
    /// entries are simply absent. The factory runs once, up front.
    pub fn categorize_entries(
        &self,
        files: &[FileEntry],
        stop_flag: &AtomicBool,
        hooks: &CategorizationHooks,
        llm_factory: impl FnOnce() -> Result<Arc<dyn LlmClient>, LlmError>,
    ) -> Result<Vec<CategorizedFile>, CategorizeError> {
        let mut categorized = Vec::new();
        if files.is_empty() || stop_flag.load(Ordering::SeqCst) {
            return Ok(categorized);
        }

        let llm = llm_factory().map_err(CategorizeError::ClientInit)?;
        let mut session_history = SessionHistory::new();

        for entry in files {
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if let Some(queue) = &hooks.queue {
                queue(entry);
            }

            let suggested_name = hooks
                .suggested_name
                .as_ref()
                .map(|provider| provider(entry))
                .unwrap_or_default();
            let prompt_override = hooks
                .prompt_override
                .as_ref()
                .and_then(|provider| provider(entry));

            if let Some(result) = self.categorize_single_entry(
                &llm,
                entry,
                prompt_override,
                &suggested_name,
                stop_flag,
                hooks,
                &mut session_history,
            ) {
                categorized.push(result);
            }
        }

        Ok(categorized)
    }

    #[allow(clippy::too_many_arguments)]
    fn categorize_single_entry(
        &self,
        llm: &Arc<dyn LlmClient>,
        entry: &FileEntry,
        prompt_override: Option<PromptOverride>,
        suggested_name: &str,
        stop_flag: &AtomicBool,
        hooks: &CategorizationHooks,
        session_history: &mut SessionHistory,
    ) -> Option<CategorizedFile> {
        let dir_path = parent_dir(&entry.full_path);
        let display_path = abbreviate_user_path(&entry.full_path);
        let (prompt_name, prompt_path) = match &prompt_override {
            Some(replacement) => (replacement.name.clone(), replacement.path.clone()),
            None => (entry.file_name.clone(), entry.full_path.clone()),
        };
        let prompt_path_display = abbreviate_user_path(&prompt_path);

        let use_hints = self.settings.use_consistency_hints;
        let extension = hints::extract_extension(&entry.file_name);
        let signature = hints::make_file_signature(entry.file_type, &extension);
        let hint_block = if use_hints {
            let gathered = hints::collect_consistency_hints(
                &self.db,
                &signature,
                session_history,
                &extension,
                entry.file_type,
            );
            hints::format_hint_block(&gathered)
        } else {
            String::new()
        };
        let combined_context = self.build_combined_context(&hint_block);

        let mut retried_after_backoff = false;
        let outcome = loop {
            let attempt = self.run_categorization_with_cache(
                llm,
                entry,
                &display_path,
                &dir_path,
                &prompt_name,
                &prompt_path_display,
                hooks,
                &combined_context,
            );
            match attempt {
                Ok(outcome) => break outcome,
                Err(LlmError::RateLimited {
                    retry_after_seconds,
                }) => {
                    if retried_after_backoff {
                        emit(hooks, &format!("[LLM-ERROR] {} (rate limit)", entry.file_name));
                        warn!(
                            "Rate limit persisted for '{}' after one retry; skipping",
                            entry.file_name
                        );
                        return None;
                    }
                    if !self.wait_for_backoff(entry, retry_after_seconds, stop_flag, hooks) {
                        return None;
                    }
                    retried_after_backoff = true;
                }
                Err(err) => {
                    emit(
                        hooks,
                        &format!("[LLM-ERROR] {} ({})", entry.file_name, err),
                    );
                    error!("LLM error while categorizing '{}': {}", entry.file_name, err);
                    return None;
                }
            }
        };

        let (resolved, from_cache) = match outcome {
            StepOutcome::Done {
                resolved,
                from_cache,
            } => (resolved, from_cache),
            StepOutcome::Skip => return None,
        };

        if self.handle_empty_result(entry, &dir_path, &resolved, use_hints, hooks) {
            return None;
        }

        // A cancelled entry must not write anything.
        if stop_flag.load(Ordering::SeqCst) {
            return None;
        }

        self.persist_result(
            entry,
            &dir_path,
            &resolved,
            use_hints,
            suggested_name,
            session_history,
        );

        let mut result = CategorizedFile::new(
            dir_path,
            entry.file_name.clone(),
            entry.file_type,
            resolved.category,
            resolved.subcategory,
            resolved.taxonomy_id,
        );
        result.from_cache = from_cache;
        result.used_consistency_hints = use_hints;
        result.suggested_name = suggested_name.to_string();
        Some(result)
    }

    /// Sleeps out a provider backoff one second at a time, pinging progress
    /// every ten seconds and during the final three. Returns `false` when
    /// cancellation interrupted the wait.
    fn wait_for_backoff(
        &self,
        entry: &FileEntry,
        retry_after_seconds: u64,
        stop_flag: &AtomicBool,
        hooks: &CategorizationHooks,
    ) -> bool {
        let wait_seconds = if retry_after_seconds > 0 {
            retry_after_seconds
        } else {
            DEFAULT_BACKOFF_SECONDS
        };
        emit(
            hooks,
            &format!(
                "[REMOTE] Rate limit hit. Waiting {}s before retrying {}...",
                wait_seconds, entry.file_name
            ),
        );
        warn!(
            "Rate limit hit for '{}'; retrying in {}s",
            entry.file_name, wait_seconds
        );

        for remaining in (1..=wait_seconds).rev() {
            if stop_flag.load(Ordering::SeqCst) {
                return false;
            }
            if remaining % 10 == 0 || remaining <= 3 {
                emit(
                    hooks,
                    &format!("[REMOTE] Retrying {} in {}s...", entry.file_name, remaining),
                );
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn run_categorization_with_cache(
        &self,
        llm: &Arc<dyn LlmClient>,
        entry: &FileEntry,
        display_path: &str,
        dir_path: &str,
        prompt_name: &str,
        prompt_path: &str,
        hooks: &CategorizationHooks,
        combined_context: &str,
    ) -> Result<StepOutcome, LlmError> {
        if let Some(resolved) =
            self.try_cached_categorization(&entry.file_name, display_path, dir_path, entry.file_type, hooks)
        {
            return Ok(StepOutcome::Done {
                resolved,
                from_cache: true,
            });
        }

        if self.settings.llm_choice.is_remote()
            && !self.ensure_remote_credentials_for_request(&entry.file_name, hooks)
        {
            return Ok(StepOutcome::Skip);
        }

        let resolved = self.categorize_via_llm(
            llm,
            &entry.file_name,
            display_path,
            prompt_name,
            prompt_path,
            entry.file_type,
            hooks,
            combined_context,
        )?;
        Ok(StepOutcome::Done {
            resolved,
            from_cache: false,
        })
    }

    /// A cache hit is accepted only when both labels sanitize non-empty and
    /// still pass validation.
    fn try_cached_categorization(
        &self,
        item_name: &str,
        item_path: &str,
        dir_path: &str,
        file_type: FileType,
        hooks: &CategorizationHooks,
    ) -> Option<ResolvedCategory> {
        let (category, subcategory) =
            match cache::cached_labels(&self.db, dir_path, item_name, file_type) {
                Ok(Some(labels)) => labels,
                Ok(None) => return None,
                Err(err) => {
                    warn!("Cache lookup failed for '{}': {}", item_name, err);
                    return None;
                }
            };

        let sanitized_category = sanitize_path_label(&category);
        let sanitized_subcategory = sanitize_path_label(&subcategory);
        if sanitized_category.is_empty() || sanitized_subcategory.is_empty() {
            warn!(
                "Ignoring cached categorization with empty values for '{}'",
                item_name
            );
            return None;
        }
        if let Err(reason) = validate::validate_labels(&sanitized_category, &sanitized_subcategory)
        {
            warn!(
                "Ignoring cached categorization for '{}' due to validation error: {} \
                 (cat='{}', sub='{}')",
                item_name, reason, sanitized_category, sanitized_subcategory
            );
            return None;
        }

        let resolved = self.resolve_category(&sanitized_category, &sanitized_subcategory);
        self.emit_progress(hooks, "CACHE", item_name, &resolved, item_path);
        Some(resolved)
    }

    /// Reports missing remote credentials for one entry. Returns whether
    /// the request may proceed.
    fn ensure_remote_credentials_for_request(
        &self,
        item_name: &str,
        hooks: &CategorizationHooks,
    ) -> bool {
        let message = match self.settings.llm_choice {
            LlmChoice::Local => return true,
            LlmChoice::RemoteCustom => {
                if self
                    .settings
                    .active_custom_endpoint()
                    .map(|endpoint| endpoint.is_valid())
                    .unwrap_or(false)
                {
                    return true;
                }
                format!("[REMOTE] {} (missing custom API settings)", item_name)
            }
            LlmChoice::RemoteOpenAi => {
                if !self.settings.openai_api_key.is_empty() {
                    return true;
                }
                format!("[REMOTE] {} (missing OpenAI API key)", item_name)
            }
            LlmChoice::RemoteGemini => {
                if !self.settings.gemini_api_key.is_empty() {
                    return true;
                }
                format!("[REMOTE] {} (missing Gemini API key)", item_name)
            }
        };
        emit(hooks, &message);
        error!("{}", message);
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn categorize_via_llm(
        &self,
        llm: &Arc<dyn LlmClient>,
        display_name: &str,
        display_path: &str,
        prompt_name: &str,
        prompt_path: &str,
        file_type: FileType,
        hooks: &CategorizationHooks,
        combined_context: &str,
    ) -> Result<ResolvedCategory, LlmError> {
        let reply =
            self.run_llm_with_timeout(llm, prompt_name, prompt_path, file_type, combined_context)?;

        let (category, subcategory) = parse::parse_category_reply(&reply);
        let mut resolved = self.resolve_category(&category, &subcategory);

        if self.settings.use_whitelist {
            let allowed_categories = &self.settings.allowed_categories;
            let allowed_subcategories = &self.settings.allowed_subcategories;
            if !is_allowed(&resolved.category, allowed_categories) {
                resolved.category = first_allowed_or_blank(allowed_categories);
            }
            if !is_allowed(&resolved.subcategory, allowed_subcategories) {
                resolved.subcategory = first_allowed_or_blank(allowed_subcategories);
            }
        }

        if let Err(reason) = validate::validate_labels(&resolved.category, &resolved.subcategory) {
            emit(
                hooks,
                &format!(
                    "[LLM-ERROR] {} (invalid category/subcategory: {})",
                    display_name, reason
                ),
            );
            warn!(
                "Invalid LLM output for '{}': {} (cat='{}', sub='{}')",
                display_name, reason, resolved.category, resolved.subcategory
            );
            return Ok(ResolvedCategory {
                taxonomy_id: -1,
                category: String::new(),
                subcategory: String::new(),
            });
        }

        if resolved.category.is_empty() {
            resolved.category = "Uncategorized".to_string();
        }
        self.emit_progress(hooks, "AI", display_name, &resolved, display_path);
        Ok(resolved)
    }

    /// Handles invalid or empty resolutions: removes any stale cache row
    /// and notifies the recategorization hook. Returns `true` when the
    /// entry was consumed.
    fn handle_empty_result(
        &self,
        entry: &FileEntry,
        dir_path: &str,
        resolved: &ResolvedCategory,
        used_consistency_hints: bool,
        hooks: &CategorizationHooks,
    ) -> bool {
        let invalid = resolved.taxonomy_id == -1;
        if !invalid && !resolved.category.is_empty() && !resolved.subcategory.is_empty() {
            return false;
        }

        let reason = if invalid {
            "Categorization returned invalid category/subcategory and was skipped."
        } else {
            "Categorization returned no result."
        };
        warn!("{} for '{}'.", reason, entry.file_name);

        if let Err(err) = cache::remove(&self.db, dir_path, &entry.file_name, entry.file_type) {
            warn!("Failed to drop cache row for '{}': {}", entry.file_name, err);
        }

        if let Some(recategorization) = &hooks.recategorization {
            let mut retry_entry = CategorizedFile::new(
                dir_path,
                entry.file_name.clone(),
                entry.file_type,
                resolved.category.clone(),
                resolved.subcategory.clone(),
                resolved.taxonomy_id,
            );
            retry_entry.used_consistency_hints = used_consistency_hints;
            recategorization(&retry_entry, reason);
        }
        true
    }

    fn persist_result(
        &self,
        entry: &FileEntry,
        dir_path: &str,
        resolved: &ResolvedCategory,
        used_consistency_hints: bool,
        suggested_name: &str,
        session_history: &mut SessionHistory,
    ) {
        info!(
            "Categorized '{}' as '{} / {}'.",
            entry.file_name,
            resolved.category,
            if resolved.subcategory.is_empty() {
                "<none>"
            } else {
                resolved.subcategory.as_str()
            }
        );

        if let Err(err) = cache::upsert(
            &self.db,
            &entry.file_name,
            entry.file_type,
            dir_path,
            resolved,
            used_consistency_hints,
            suggested_name,
            false,
            false,
        ) {
            // Best-effort persistence; the in-memory result is still valid.
            error!("Failed to persist categorization for '{}': {}", entry.file_name, err);
        }

        let signature = hints::make_file_signature(
            entry.file_type,
            &hints::extract_extension(&entry.file_name),
        );
        if !signature.is_empty() {
            hints::record_session_assignment(
                session_history.entry(signature).or_default(),
                &(resolved.category.clone(), resolved.subcategory.clone()),
            );
        }
    }

    /// Offloads the model call to a one-shot background task and waits with
    /// a wall-clock timeout. A timed-out call keeps running detached; its
    /// eventual result is dropped with the channel, so it can never touch
    /// orchestrator state.
    fn run_llm_with_timeout(
        &self,
        llm: &Arc<dyn LlmClient>,
        item_name: &str,
        item_path: &str,
        file_type: FileType,
        consistency_context: &str,
    ) -> Result<String, LlmError> {
        let timeout_seconds = self.resolve_llm_timeout();

        let (sender, receiver) = bounded(1);
        let client = Arc::clone(llm);
        let name = item_name.to_string();
        let path = item_path.to_string();
        let context = consistency_context.to_string();
        std::thread::spawn(move || {
            let result = client.categorize_file(&name, &path, file_type, &context);
            let _ = sender.send(result);
        });

        match receiver.recv_timeout(Duration::from_secs(timeout_seconds)) {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }

    /// Per-mode timeout: local 60 s, remote 10 s, remote-custom 60 s; each
    /// overridable through its environment variable. Non-positive values
    /// are ignored with a warning.
    fn resolve_llm_timeout(&self) -> u64 {
        let (default_seconds, env_key) = match self.settings.llm_choice {
            LlmChoice::Local => (60, LOCAL_TIMEOUT_ENV),
            LlmChoice::RemoteCustom => (60, CUSTOM_TIMEOUT_ENV),
            LlmChoice::RemoteOpenAi | LlmChoice::RemoteGemini => (10, REMOTE_TIMEOUT_ENV),
        };

        let mut timeout_seconds = default_seconds;
        if let Ok(raw) = std::env::var(env_key) {
            if !raw.is_empty() {
                match raw.trim().parse::<i64>() {
                    Ok(parsed) if parsed > 0 => timeout_seconds = parsed as u64,
                    Ok(_) => warn!("Ignoring non-positive LLM timeout '{}'", raw),
                    Err(err) => warn!("Failed to parse LLM timeout '{}': {}", raw, err),
                }
            }
        }

        debug!(
            "Using {} LLM timeout of {} second(s)",
            if self.settings.llm_choice.is_local() {
                "local"
            } else {
                "remote"
            },
            timeout_seconds
        );
        timeout_seconds
    }

    /// Builds the numbered whitelist block.
    fn build_whitelist_context(&self) -> String {
        let categories = &self.settings.allowed_categories;
        let subcategories = &self.settings.allowed_subcategories;

        let mut block = String::new();
        if !categories.is_empty() {
            block.push_str(
                "Allowed main categories (pick exactly one label from the numbered list):\n",
            );
            for (index, category) in categories.iter().enumerate() {
                block.push_str(&format!("{}) {}\n", index + 1, category));
            }
        }
        if !subcategories.is_empty() {
            block.push_str(
                "Allowed subcategories (pick exactly one label from the numbered list):\n",
            );
            for (index, subcategory) in subcategories.iter().enumerate() {
                block.push_str(&format!("{}) {}\n", index + 1, subcategory));
            }
        } else {
            block.push_str(
                "Allowed subcategories: any (pick a specific, relevant subcategory; \
                 do not repeat the main category).",
            );
        }
        block
    }

    /// Directive switching the label language, empty for English.
    fn build_category_language_context(&self) -> String {
        let language = self.settings.category_language;
        if language == crate::config::CategoryLanguage::English {
            return String::new();
        }
        let name = language.display_name();
        format!(
            "Use {} for both the main category and subcategory names. Respond in {}.",
            name, name
        )
    }

    /// Joins language directive, whitelist block and hint block with blank
    /// lines, omitting absent parts.
    fn build_combined_context(&self, hint_block: &str) -> String {
        let mut combined = String::new();

        let language_block = self.build_category_language_context();
        if !language_block.is_empty() {
            combined.push_str(&language_block);
        }

        if self.settings.use_whitelist {
            let whitelist_block = self.build_whitelist_context();
            if !whitelist_block.is_empty() {
                debug!(
                    "Applying category whitelist ({} cats, {} subs)",
                    self.settings.allowed_categories.len(),
                    self.settings.allowed_subcategories.len()
                );
                if !combined.is_empty() {
                    combined.push_str("\n\n");
                }
                combined.push_str(&whitelist_block);
            }
        }

        if !hint_block.is_empty() {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(hint_block);
        }

        combined
    }

    fn emit_progress(
        &self,
        hooks: &CategorizationHooks,
        source: &str,
        item_name: &str,
        resolved: &ResolvedCategory,
        item_path: &str,
    ) {
        let subcategory = if resolved.subcategory.is_empty() {
            "-"
        } else {
            resolved.subcategory.as_str()
        };
        let path_display = if item_path.is_empty() { "-" } else { item_path };
        emit(
            hooks,
            &format!(
                "[{}] {}\n    Category : {}\n    Subcat   : {}\n    Path     : {}",
                source, item_name, resolved.category, subcategory, path_display
            ),
        );
    }
}

fn emit(hooks: &CategorizationHooks, message: &str) {
    if let Some(progress) = &hooks.progress {
        progress(message);
    }
}

fn is_allowed(value: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let normalized = value.to_lowercase();
    allowed.iter().any(|item| item.to_lowercase() == normalized)
}

fn first_allowed_or_blank(allowed: &[String]) -> String {
    allowed.first().cloned().unwrap_or_default()
}

fn parent_dir(full_path: &str) -> String {
    Path::new(full_path)
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Replaces the home-directory prefix with `~` for display.
fn abbreviate_user_path(path: &str) -> String {
    let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"));
    if let Ok(home) = home {
        if !home.is_empty() && path.starts_with(&home) {
            return format!("~{}", &path[home.len()..]);
        }
    }
    path.to_string()
}
