//! Removal of per-request disk artifacts.
//!
//! Every file the gateway writes for a request is wrapped in a
//! [`TempArtifact`]. The handler calls [`TempArtifact::cleanup`] once the relay
//! has resolved; if the request future is dropped first (client disconnect,
//! early return) the guard removes the file synchronously on drop. Removal
//! failures are logged and counted but never reach the client.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A disk file owned by a single request
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file, logging instead of failing if it cannot be removed
    pub async fn cleanup(mut self) {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Removed temp artifact"),
            Err(e) => report_failure(&self.path, &e),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned temp artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => report_failure(&self.path, &e),
        }
    }
}

fn report_failure(path: &Path, error: &io::Error) {
    warn!(path = %path.display(), error = %error, "Failed to remove temp artifact");
    metrics::counter!("gateway.cleanup.failed").increment(1);
}
