//! Non-fatal session events.
//!
//! Failures that must not abort a conversion, such as a temporary file that
//! could not be deleted, are logged and published on an optional channel the
//! caller can drain with [`ConvertStream::events`](crate::ConvertStream::events).

use std::path::{Path, PathBuf};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task;
use tracing::warn;

/// A non-fatal event raised during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A temporary file could not be deleted
    CleanupFailed {
        /// The file left behind
        path: PathBuf,
        /// The deletion error
        message: String,
    },
}

/// Publishes [`SessionEvent`]s; silently drops them when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct EventReporter {
    sender: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventReporter {
    /// A reporter paired with the receiver of its events.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn report(&self, event: SessionEvent) {
        if let Some(sender) = &self.sender {
            // Receiver gone means nobody is interested anymore.
            let _ = sender.send(event);
        }
    }

    /// Delete a temporary file, reporting instead of returning any failure.
    ///
    /// Runs from `Drop`, so the deletion is synchronous. On a multi-threaded
    /// runtime the worker first hands its other tasks off with
    /// [`task::block_in_place`].
    pub fn remove_file(&self, path: &Path) {
        let removed = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(|| std::fs::remove_file(path))
            },
            _ => std::fs::remove_file(path),
        };
        if let Err(e) = removed {
            warn!(path = %path.display(), error = %e, "Unable to delete temporary file");
            self.report(SessionEvent::CleanupFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    }
}
