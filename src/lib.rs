pub mod agent_core;
pub mod config;
pub mod inference;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{LoggingConfig, RuntimeConfig};
use inference::{InferenceClient, InferenceError, ReasoningBackend, UnconfiguredBackend};

/// Log file name inside the log directory.
const LOG_FILE_NAME: &str = "runtime.log";

/// Rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for the runtime.
///
/// - macOS: `~/Library/Application Support/assistant-runtime/`
/// - Windows: `{FOLDERID_RoamingAppData}\assistant-runtime\`
/// - Linux: `$XDG_DATA_HOME/assistant-runtime/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.assistant-runtime/` only if none of the above resolve.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("assistant-runtime");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".assistant-runtime")
}

/// Build the reasoning backend named by `config.models`.
///
/// Without a models file the runtime still starts: instant and fact tiers
/// work and reasoning turns end in the apology path.
pub fn load_backend(config: &RuntimeConfig) -> Result<Arc<dyn ReasoningBackend>, InferenceError> {
    let Some(path) = &config.models else {
        tracing::warn!("no models file configured; reasoning tiers are unavailable");
        return Ok(Arc::new(UnconfiguredBackend));
    };
    let models = inference::config::load_models_config(path)?;
    let client = InferenceClient::from_config(models)?;
    tracing::info!(
        model = %client.current_model_name(),
        base_url = %client.current_base_url(),
        "reasoning backend ready"
    );
    Ok(Arc::new(client))
}

/// Initialize the tracing subscriber, writing structured logs to a file.
///
/// On each startup:
/// 1. Rotates existing logs (runtime.log → runtime.log.1 → .2 → .3).
/// 2. Opens a fresh runtime.log with a line-flushing writer.
/// 3. Logs a startup banner with the log file path.
///
/// Returns the path of the log file.
pub fn init_tracing(config: &LoggingConfig) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = config.log_dir.clone().unwrap_or_else(|| data_dir().join("logs"));
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("assistant_runtime=info,warn"));

    let installed = if config.json {
        fmt::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_current_span(true)
            .try_init()
    } else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .try_init()
    };
    installed.map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        json = config.json,
        pid = std::process::id(),
        "=== assistant runtime starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `runtime.log` → `runtime.log.1` → … → `.{keep}`.
///
/// The oldest file beyond `keep` is deleted. Missing files are skipped.
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

/// A writer that wraps a file and flushes after every write, so log lines
/// survive a crash.
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

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_shifts_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        for generation in 0..5 {
            std::fs::write(&base, format!("gen {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }
        assert!(!base.exists());
        let read = |suffix: u32| {
            std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap()
        };
        assert_eq!(read(1), "gen 4");
        assert_eq!(read(2), "gen 3");
        assert_eq!(read(3), "gen 2");
        assert!(!Path::new(&format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }

    #[test]
    fn test_data_dir_is_namespaced() {
        let dir = data_dir();
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.contains("assistant-runtime"));
    }

    #[tokio::test]
    async fn test_load_backend_without_models_is_unconfigured() {
        let backend = load_backend(&RuntimeConfig::default()).unwrap();
        assert_eq!(backend.name(), "unconfigured");
        assert!(backend.complete(vec![], None).await.is_err());
    }

    #[test]
    fn test_load_backend_missing_models_file_fails() {
        let config = RuntimeConfig {
            models: Some(PathBuf::from("/definitely/not/here/models.yaml")),
            ..RuntimeConfig::default()
        };
        assert!(load_backend(&config).is_err());
    }
}
