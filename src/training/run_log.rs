use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, Registry};

use crate::error::{HarnessError, Result};

pub const LOG_FILE: &str = "log.txt";

/// Message-only run log, active on the current thread until dropped
///
/// Every `info!` event emitted while the guard lives is appended to the log
/// file and, optionally, echoed to stdout. Dropping it restores whatever
/// subscriber was in effect before.
pub struct RunLog {
    path: PathBuf,
    _guard: DefaultGuard,
}

impl RunLog {
    /// Open (or append to) `path` and route this thread's events to it
    pub fn open<P: AsRef<Path>>(path: P, console: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HarnessError::io(&path, e))?;

        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_level(false);

        let console_layer = console.then(|| {
            fmt::layer()
                .with_writer(std::io::stdout)
                .without_time()
                .with_target(false)
                .with_level(false)
        });

        let subscriber = Registry::default()
            .with(LevelFilter::INFO)
            .with(file_layer)
            .with(console_layer);

        Ok(Self {
            path,
            _guard: tracing::subscriber::set_default(subscriber),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing::{debug, info};

    #[test]
    fn test_writes_message_only_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);

        info!("before the run");
        {
            let log = RunLog::open(&path, false).unwrap();
            assert_eq!(log.path(), path.as_path());
            info!("lr: {}", "1.0e-03");
            debug!("not recorded");
            info!("CONVGRU|  Epoch [1/2], Step [40/80], Loss: {:.3}", 0.1234);
        }
        info!("after the run");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "lr: 1.0e-03\nCONVGRU|  Epoch [1/2], Step [40/80], Loss: 0.123\n"
        );
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);

        for line in ["first", "second"] {
            let _log = RunLog::open(&path, false).unwrap();
            info!("{}", line);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
