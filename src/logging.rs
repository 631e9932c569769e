use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "classportald";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

/// Starts rolling file logs under `<workspace>/logs`. Idempotent for the same
/// workspace; a later call with a different one is rejected rather than
/// silently re-pointing an active logger.
pub fn init(workspace: &Path) -> Result<(), String> {
    let log_dir = workspace.join("logs");

    if let Some(state) = LOGGING_STATE.get() {
        if state.log_dir == log_dir {
            return Ok(());
        }
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            state.log_dir.display(),
            log_dir.display()
        ));
    }

    let init_dir = log_dir.clone();
    LOGGING_STATE
        .get_or_try_init(|| -> Result<LoggingState, String> {
            std::fs::create_dir_all(&init_dir)
                .map_err(|e| format!("failed to create log directory `{}`: {e}", init_dir.display()))?;
            let logger = Logger::try_with_env_or_str("info")
                .map_err(|e| format!("invalid log spec: {e}"))?
                .log_to_file(
                    FileSpec::default()
                        .directory(init_dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
                .map_err(|e| format!("failed to start logger: {e}"))?;

            info!(
                "event=daemon_start version={} log_dir={}",
                env!("CARGO_PKG_VERSION"),
                init_dir.display()
            );

            Ok(LoggingState {
                log_dir: init_dir,
                _logger: logger,
            })
        })
        .map(|_| ())
}
