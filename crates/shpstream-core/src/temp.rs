//! Temporary files backing the per-type encoder sinks.
//!
//! Each session writes its encoded records to files named
//! `<temp_dir>/<session_id>-<geometry_type>.<extension>`. A [`TempResource`]
//! owns one such file and deletes it when dropped, so a resource is removed
//! either once its content has been relayed to the output or, on failure,
//! when the tracker releases everything it still holds.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shpstream_common::{ByteSink, GeometryType, SinkProvider};
use tokio::fs::{File, OpenOptions};
use tracing::debug;
use uuid::Uuid;

use crate::error::ResourceError;
use crate::events::EventReporter;

/// A temporary file owned by one geometry type of one session.
#[derive(Debug)]
pub struct TempResource {
    geometry_type: GeometryType,
    extension: String,
    path: PathBuf,
    reporter: EventReporter,
}

impl TempResource {
    #[must_use]
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file for read-back.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Open`] if the file cannot be opened.
    pub async fn open(&self) -> Result<File, ResourceError> {
        File::open(&self.path)
            .await
            .map_err(|source| ResourceError::Open {
                path: self.path.clone(),
                source,
            })
    }

    /// Delete the backing file now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TempResource {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Releasing temporary file");
        self.reporter.remove_file(&self.path);
    }
}

/// Allocates and tracks the temporary files of a session.
#[derive(Debug)]
pub struct TempResourceTracker {
    session_id: String,
    temp_dir: PathBuf,
    reporter: EventReporter,
    /// Held resources, in allocation order
    resources: Vec<TempResource>,
}

impl TempResourceTracker {
    /// Create a tracker with a fresh random session id.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>, reporter: EventReporter) -> Self {
        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            temp_dir: temp_dir.into(),
            reporter,
            resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Path backing the `(geometry_type, extension)` pair.
    #[must_use]
    pub fn path_for(&self, geometry_type: GeometryType, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}-{geometry_type}.{extension}", self.session_id))
    }

    /// Create the backing file for `(geometry_type, extension)` and return it
    /// opened for writing.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::AlreadyAllocated`] if the pair was already
    /// allocated, or [`ResourceError::Create`] if the file cannot be created.
    pub async fn allocate(
        &mut self,
        geometry_type: GeometryType,
        extension: &str,
    ) -> Result<File, ResourceError> {
        if self
            .resources
            .iter()
            .any(|r| r.geometry_type == geometry_type && r.extension == extension)
        {
            return Err(ResourceError::AlreadyAllocated {
                geometry_type,
                extension: extension.to_string(),
            });
        }

        let path = self.path_for(geometry_type, extension);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| ResourceError::Create {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), %geometry_type, extension, "Allocated temporary file");
        self.resources.push(TempResource {
            geometry_type,
            extension: extension.to_string(),
            path,
            reporter: self.reporter.clone(),
        });
        Ok(file)
    }

    /// Resources still held, in allocation order.
    #[must_use]
    pub fn resources(&self) -> &[TempResource] {
        &self.resources
    }

    /// Hand over the resources of `geometry_type`, in allocation order.
    pub fn take(&mut self, geometry_type: GeometryType) -> Vec<TempResource> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resources)
            .into_iter()
            .partition(|r| r.geometry_type == geometry_type);
        self.resources = kept;
        taken
    }

    /// Delete every resource still held.
    pub fn release_all(&mut self) {
        if !self.resources.is_empty() {
            debug!(
                session = %self.session_id,
                count = self.resources.len(),
                "Releasing all temporary files"
            );
        }
        self.resources.clear();
    }

    /// A [`SinkProvider`] allocating resources for `geometry_type`.
    pub fn sinks_for(&mut self, geometry_type: GeometryType) -> TypedSinks<'_> {
        TypedSinks {
            tracker: self,
            geometry_type,
        }
    }
}

/// Sink provider scoped to one geometry type.
#[derive(Debug)]
pub struct TypedSinks<'a> {
    tracker: &'a mut TempResourceTracker,
    geometry_type: GeometryType,
}

#[async_trait]
impl SinkProvider for TypedSinks<'_> {
    async fn open(&mut self, extension: &str) -> anyhow::Result<ByteSink> {
        let file = self.tracker.allocate(self.geometry_type, extension).await?;
        Ok(Box::new(file))
    }
}
