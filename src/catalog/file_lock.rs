//! Cross-process guard for catalog read-modify-write cycles
//!
//! A `<catalog>.lock` file created with `create_new` marks the owner. It is
//! held only while one mutation re-reads and rewrites the document, so a lock
//! file older than `STALE_AFTER` belongs to a process that died mid-write.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(5);

/// Held for the duration of one catalog mutation; removed on drop
#[derive(Debug)]
pub(super) struct CatalogFileLock {
    path: PathBuf,
}

impl CatalogFileLock {
    pub(super) async fn acquire(path: &Path) -> Result<Self> {
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await;
            match created {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!(path = %path.display(), "Removing stale catalog lock");
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::State {
                            message: format!(
                                "Timed out waiting for catalog lock {}",
                                path.display()
                            ),
                        });
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(Error::State {
                        message: format!("Failed to create {}: {e}", path.display()),
                    })
                }
            }
        }
    }
}

impl Drop for CatalogFileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}
