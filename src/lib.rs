pub mod agent_core;
pub mod config;
pub mod inference;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{AssistantDatabase, FormAssistant, FormsCache, SessionManager};
use config::AppConfig;
use inference::{InferenceClient, LanguageModel, SharedInferenceClient};

/// Return the platform-standard data directory for the assistant.
///
/// - macOS: `~/Library/Application Support/form-assistant/`
/// - Windows: `{FOLDERID_RoamingAppData}\form-assistant\`
/// - Linux: `$XDG_DATA_HOME/form-assistant/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.form-assistant/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("form-assistant");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".form-assistant")
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Log to stderr instead of `assistant.log`.
    pub stderr: bool,
}

/// Initialize the tracing subscriber.
///
/// By default logs go to `assistant.log` in the data directory:
/// 1. Existing logs are rotated (assistant.log → .1 → .2 → .3, keeps last 3).
/// 2. A fresh assistant.log is opened with a line-flushing writer.
/// 3. A startup banner records where the log lives.
///
/// Returns the log file path, or `None` when logging to stderr.
pub fn init_tracing(options: LogOptions) -> std::io::Result<Option<PathBuf>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("form_assistant=info,warn"));

    if options.stderr {
        match options.format {
            LogFormat::Text => fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init(),
            LogFormat::Json => fmt::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init(),
        }
        return Ok(None);
    }

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("assistant.log");

    // Rotate: assistant.log.2 → .3, .1 → .2, assistant.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = FlushingWriter::new(log_file);

    match options.format {
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .init(),
        LogFormat::Json => fmt::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init(),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== form-assistant starting ==="
    );
    Ok(Some(log_path))
}

/// Rotate log files: `assistant.log` → `assistant.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────────────

/// Database path: the configured one, else `assistant.db` in the data
/// directory (created if needed).
pub fn resolve_db_path(config: &AppConfig) -> String {
    if let Some(path) = config.database_path.as_deref().filter(|p| !p.is_empty()) {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        return path.to_string();
    }
    let dir = data_dir();
    if !dir.exists() {
        let _ = std::fs::create_dir_all(&dir);
    }
    dir.join("assistant.db").to_string_lossy().into_owned()
}

/// Session manager over `db` with the configured expiry rules.
pub fn session_manager(db: Arc<AssistantDatabase>, config: &AppConfig) -> SessionManager {
    SessionManager::new(
        db,
        config.assistant.session_timeout_minutes,
        config.assistant.session_grace_minutes,
    )
}

/// Everything a running assistant needs, built from config.
pub struct AppContext {
    pub assistant: FormAssistant,
    pub database: Arc<AssistantDatabase>,
    pub model: Arc<SharedInferenceClient>,
}

/// Open the database, build the model client and inject both into a
/// `FormAssistant`.
pub fn build_app(config: &AppConfig) -> anyhow::Result<AppContext> {
    let db_path = resolve_db_path(config);
    let database = Arc::new(AssistantDatabase::open(&db_path)?);
    tracing::info!(path = %db_path, "database opened");

    let client = InferenceClient::from_config(config.inference.clone())?;
    let model = Arc::new(SharedInferenceClient::new(client));
    tracing::info!(model = %model.model_name(), "inference client ready");

    let cache = Arc::new(FormsCache::new(config.assistant.forms_cache_ttl()));
    let assistant = FormAssistant::new(
        model.clone(),
        database.clone(),
        session_manager(database.clone(), config),
        cache,
        config.assistant.clone(),
    );
    Ok(AppContext {
        assistant,
        database,
        model,
    })
}
