//! Collaborator traits for encoding, packaging and reprojecting features.
//!
//! The conversion engine drives these traits but never implements them: the
//! binary record format, the archive container and the coordinate math all
//! live behind this boundary.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::crs::CrsDefinition;
use crate::feature::{Feature, GeometryType};
use crate::schema::Schema;

/// Writable byte destination handed to encoders and archivers.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable byte source handed to archivers.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Header bytes per produced file extension, as returned by
/// [`RecordEncoder::finish`].
pub type Headers = Vec<(String, Bytes)>;

/// Options forwarded verbatim to every encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Pad short values up to the declared field width (default: true)
    pub pad_values: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self { pad_values: true }
    }
}

/// Source of backing sinks for one geometry type.
///
/// Every sink opened here is tracked by the session and deleted once its
/// content has been relayed to the output, or when the session fails.
#[async_trait]
pub trait SinkProvider: Send {
    /// Opens the sink that stores records of the given file extension.
    async fn open(&mut self, extension: &str) -> Result<ByteSink>;
}

/// Creates one [`RecordEncoder`] per geometry type encountered in a session.
#[async_trait]
pub trait EncoderFactory: Send + Sync {
    /// Extension of the geometry-record file (e.g. `shp`). A projection
    /// companion file is emitted next to each file with this extension.
    fn primary_extension(&self) -> &str;

    /// Creates the encoder for `geometry_type`.
    ///
    /// # Arguments
    ///
    /// * `geometry_type` - The geometry family this encoder will receive
    /// * `schema` - The attribute schema fixed for the session
    /// * `options` - Encoding options
    /// * `sinks` - Provider of the backing sinks, one per produced extension
    async fn create(
        &self,
        geometry_type: GeometryType,
        schema: &Schema,
        options: &EncoderOptions,
        sinks: &mut dyn SinkProvider,
    ) -> Result<Box<dyn RecordEncoder>>;
}

/// Encoder for the records of a single geometry type.
#[async_trait]
pub trait RecordEncoder: Send {
    /// Encodes one record. Resolves once the record was accepted by the sink.
    async fn encode(&mut self, feature: &Feature) -> Result<()>;

    /// Flushes and shuts down every sink, returning the header bytes to
    /// prepend to each produced extension.
    async fn finish(self: Box<Self>) -> Result<Headers>;
}

/// Sequential archive writer (e.g. a zip container).
#[async_trait]
pub trait Archiver: Send {
    /// Adds an in-memory entry.
    async fn add_buffer(&mut self, name: &str, content: Bytes) -> Result<()>;

    /// Adds an entry whose content is read to the end from `content`.
    async fn add_stream(&mut self, name: &str, content: ByteSource) -> Result<()>;

    /// Writes the trailing bookkeeping and shuts the output down.
    async fn end(self: Box<Self>) -> Result<()>;
}

/// Creates an [`Archiver`] writing its container bytes to `output`.
pub trait ArchiverFactory: Send + Sync {
    fn create(&self, output: ByteSink) -> Box<dyn Archiver>;
}

/// Maps a feature's coordinates from one spatial reference to another.
pub trait Reprojector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the coordinates cannot be transformed.
    fn reproject(
        &self,
        feature: Feature,
        source: &CrsDefinition,
        target: &CrsDefinition,
    ) -> Result<Feature>;
}
