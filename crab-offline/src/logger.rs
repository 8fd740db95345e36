//! Logging Infrastructure
//!
//! - Console output, pretty or JSON
//! - Daily rotating application logs (deleted after 14 days)
//! - Permanent mutation audit logs (never deleted), one line per queue
//!   lifecycle hop written through [`mutation_log!`](crate::mutation_log)

use std::fs;
use std::path::{Path, PathBuf};
use tracing::Metadata;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{FilterExt, filter_fn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Filter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Target used by [`mutation_log!`](crate::mutation_log)
pub const MUTATION_AUDIT_TARGET: &str = "mutation_audit";

/// Application logs older than this are removed
const APP_LOG_RETENTION_DAYS: i64 = 14;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn is_audit(meta: &Metadata<'_>) -> bool {
    meta.target() == MUTATION_AUDIT_TARGET
}

fn is_not_audit(meta: &Metadata<'_>) -> bool {
    !is_audit(meta)
}

/// Clean up old application log files
///
/// Only `app.YYYY-MM-DD` files are considered; audit logs are kept forever.
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    let cutoff = chrono::Local::now().date_naive() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);

    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // RollingFileAppender names files `<prefix>.<date>`
        let Some(date) = name
            .strip_prefix("app.")
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            fs::remove_file(&path)?;
            removed += 1;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(removed)
}

/// `RUST_LOG` when set, `level` otherwise
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Application file: everything the level lets through except audit lines
fn app_filter(levels: EnvFilter) -> impl Filter<Registry> + Send + Sync + 'static {
    filter_fn(is_not_audit).and(levels)
}

fn file_layer<W, F>(writer: W, json: bool, filter: F) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: Filter<Registry> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed()
    }
}

fn console_layer(level: &str, json: bool) -> BoxedLayer {
    let env_filter = level_filter(level);
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    }
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn")
/// * `json_format` - JSON output (production) or pretty output (development)
/// * `log_dir` - Optional directory for file logging (e.g., `<work_dir>/logs`)
///
/// Must be called from inside a tokio runtime when `log_dir` is set: the
/// retention cleanup runs as a background task.
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(level, json_format)];

    if let Some(log_dir) = log_dir {
        let app_log_dir = log_dir.join("app");
        let audit_log_dir = log_dir.join("audit");
        fs::create_dir_all(&app_log_dir)?;
        fs::create_dir_all(&audit_log_dir)?;

        let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, "app");
        let audit_log = RollingFileAppender::new(Rotation::DAILY, audit_log_dir, "audit");

        layers.push(file_layer(
            std::sync::Mutex::new(app_log),
            json_format,
            app_filter(level_filter(level)),
        ));
        // Audit lines are kept whatever the level
        layers.push(file_layer(
            std::sync::Mutex::new(audit_log),
            json_format,
            filter_fn(is_audit),
        ));

        tokio::spawn(periodic_cleanup(log_dir.to_path_buf()));
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

/// Initialize the logging system (console only)
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}

/// Periodic cleanup task - runs every hour to clean old logs
async fn periodic_cleanup(log_dir: PathBuf) {
    use tokio::time::{Duration, sleep};

    loop {
        sleep(Duration::from_secs(3600)).await;

        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}

/// Mutation audit helper - one line per lifecycle hop of a queued write
///
/// Audit lines go to `audit/audit.YYYY-MM-DD` and are never deleted.
///
/// # Examples
/// ```ignore
/// mutation_log!(WriteState::Queued, entry.seq, entry.mutation.name());
/// mutation_log!(entry.write_state(), entry.seq, entry.mutation.name(), "insufficient stock");
/// ```
#[macro_export]
macro_rules! mutation_log {
    ($state:expr, $seq:expr, $mutation:expr) => {
        ::tracing::info!(
            target: $crate::logger::MUTATION_AUDIT_TARGET,
            state = %$state,
            seq = $seq,
            mutation = $mutation,
            timestamp = ::chrono::Local::now().to_rfc3339(),
            "MUTATION"
        );
    };
    ($state:expr, $seq:expr, $mutation:expr, $details:expr) => {
        ::tracing::info!(
            target: $crate::logger::MUTATION_AUDIT_TARGET,
            state = %$state,
            seq = $seq,
            mutation = $mutation,
            details = $details,
            timestamp = ::chrono::Local::now().to_rfc3339(),
            "MUTATION"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_file_layers_split_by_level_and_target() {
        let app = SharedBuf::default();
        let audit = SharedBuf::default();
        let app_writer = app.clone();
        let audit_writer = audit.clone();

        let layers = vec![
            file_layer(
                move || app_writer.clone(),
                false,
                app_filter(EnvFilter::new("info")),
            ),
            file_layer(move || audit_writer.clone(), false, filter_fn(is_audit)),
        ];
        let subscriber = tracing_subscriber::registry().with(layers);

        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!("wire bytes");
            tracing::debug!("pool checkout");
            tracing::info!("pull finished");
            crate::mutation_log!(crate::mutation::WriteState::Queued, 7u64, "close_session");
        });

        let app = app.contents();
        assert!(app.contains("pull finished"));
        assert!(!app.contains("wire bytes"));
        assert!(!app.contains("pool checkout"));
        assert!(!app.contains("MUTATION"));

        let audit = audit.contents();
        assert!(audit.contains("MUTATION"));
        assert!(audit.contains("state=queued"));
        assert!(!audit.contains("pull finished"));
    }

    #[test]
    fn test_cleanup_removes_only_old_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();

        let today = chrono::Local::now().date_naive();
        let old = today - chrono::Duration::days(30);
        let old_file = app_dir.join(format!("app.{}", old.format("%Y-%m-%d")));
        let new_file = app_dir.join(format!("app.{}", today.format("%Y-%m-%d")));
        let other_file = app_dir.join("notes.txt");
        for file in [&old_file, &new_file, &other_file] {
            fs::write(file, b"log").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 1);
        assert!(!old_file.exists());
        assert!(new_file.exists());
        assert!(other_file.exists());
    }

    #[test]
    fn test_cleanup_without_app_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 0);
    }
}
