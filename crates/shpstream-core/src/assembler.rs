//! Packaging of finalized encoder output.
//!
//! Every produced file becomes one output unit: a `.prj` companion per type,
//! then each data file as its header bytes followed by the temporary file
//! content. Units go either into an [`Archiver`] whose bytes are pushed to the
//! output queue, or straight to the queue as named [`OutputFile`]s.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use shpstream_common::{Archiver, ArchiverFactory, ByteSource, GeometryType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;
use tracing::{debug, info};

use crate::error::{ConvertError, Result};
use crate::multiplexer::FinalizedContext;
use crate::temp::TempResource;

/// Extension of the spatial reference companion file.
pub const PROJECTION_EXTENSION: &str = "prj";

/// Name of an output file: `<layer>.<type>.<ext>`, or `<layer>.<ext>` when
/// `include_type` is false.
#[must_use]
pub fn file_name(
    layer: &str,
    geometry_type: GeometryType,
    extension: &str,
    include_type: bool,
) -> String {
    if include_type {
        format!("{layer}.{geometry_type}.{extension}")
    } else {
        format!("{layer}.{extension}")
    }
}

/// One item of the read side.
#[derive(Debug)]
pub enum ConvertOutput {
    /// A chunk of the archive
    Bytes(Bytes),
    /// A complete named file, in raw mode
    File(OutputFile),
}

/// A named output file whose content is read lazily.
///
/// Data files are backed by a temporary file that is deleted once the content
/// has been read to the end, or when this value is dropped.
pub struct OutputFile {
    name: String,
    content: ByteSource,
}

impl OutputFile {
    #[must_use]
    pub fn new(name: impl Into<String>, content: ByteSource) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The content reader.
    #[must_use]
    pub fn into_content(self) -> ByteSource {
        self.content
    }

    /// Read the whole content into memory.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut content = Vec::new();
        self.content.read_to_end(&mut content).await?;
        Ok(Bytes::from(content))
    }
}

impl fmt::Debug for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFile")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Header bytes followed by a temporary file; releases the file at EOF.
struct UnitReader {
    inner: ByteSource,
    resource: Option<TempResource>,
}

impl AsyncRead for UnitReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before {
            self.resource.take();
        }
        Poll::Ready(Ok(()))
    }
}

enum UnitSource {
    Buffer(Bytes),
    Resource {
        header: Bytes,
        resource: TempResource,
    },
}

struct OutputUnit {
    name: String,
    source: UnitSource,
}

impl OutputUnit {
    async fn open(self) -> Result<(String, ByteSource)> {
        let content: ByteSource = match self.source {
            UnitSource::Buffer(content) => Box::new(io::Cursor::new(content)),
            UnitSource::Resource { header, resource } => {
                let file = resource.open().await?;
                Box::new(UnitReader {
                    inner: Box::new(io::Cursor::new(header).chain(file)),
                    resource: Some(resource),
                })
            },
        };
        Ok((self.name, content))
    }
}

/// How the assembled units are delivered.
#[derive(Clone)]
pub enum PackagingMode {
    /// Units become entries of one archive streamed as bytes
    Archived(Arc<dyn ArchiverFactory>),
    /// Units are delivered one by one as [`OutputFile`]s
    Raw,
}

impl fmt::Debug for PackagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archived(_) => f.write_str("Archived"),
            Self::Raw => f.write_str("Raw"),
        }
    }
}

/// Turns finalized contexts into the ordered output of a session.
#[derive(Debug)]
pub struct OutputAssembler {
    layer: String,
    primary_extension: String,
    projection: Bytes,
    mode: PackagingMode,
}

impl OutputAssembler {
    #[must_use]
    pub fn new(
        layer: impl Into<String>,
        primary_extension: impl Into<String>,
        projection: Bytes,
        mode: PackagingMode,
    ) -> Self {
        Self {
            layer: layer.into(),
            primary_extension: primary_extension.into(),
            projection,
            mode,
        }
    }

    fn plan(&self, contexts: Vec<FinalizedContext>) -> Vec<OutputUnit> {
        let include_type = contexts.len() > 1;
        let mut units = Vec::new();

        for context in contexts {
            let geometry_type = context.geometry_type;
            if context
                .resources
                .iter()
                .any(|r| r.extension() == self.primary_extension)
            {
                units.push(OutputUnit {
                    name: file_name(&self.layer, geometry_type, PROJECTION_EXTENSION, include_type),
                    source: UnitSource::Buffer(self.projection.clone()),
                });
            }

            let headers = context.headers;
            for resource in context.resources {
                let header = headers
                    .iter()
                    .find(|(ext, _)| ext == resource.extension())
                    .map(|(_, header)| header.clone())
                    .unwrap_or_default();
                units.push(OutputUnit {
                    name: file_name(&self.layer, geometry_type, resource.extension(), include_type),
                    source: UnitSource::Resource { header, resource },
                });
            }
        }
        units
    }

    /// Deliver `contexts` to `output`.
    ///
    /// Temporary files not yet handed to the reader are released when this
    /// returns, whatever the outcome. A reader that went away ends delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Archive`] when the archiver fails, or a
    /// resource error when a temporary file cannot be reopened.
    pub async fn assemble(
        &self,
        contexts: Vec<FinalizedContext>,
        output: &mpsc::Sender<Result<ConvertOutput>>,
    ) -> Result<()> {
        let units = self.plan(contexts);
        let count = units.len();

        match &self.mode {
            PackagingMode::Archived(factory) => {
                let mut archiver = factory.create(Box::new(QueueWriter::new(output.clone())));
                for unit in units {
                    add_unit(archiver.as_mut(), unit).await?;
                }
                archiver
                    .end()
                    .await
                    .map_err(|e| ConvertError::Archive { source: e.into() })?;
            },
            PackagingMode::Raw => {
                for unit in units {
                    let (name, content) = unit.open().await?;
                    if output
                        .send(Ok(ConvertOutput::File(OutputFile::new(name, content))))
                        .await
                        .is_err()
                    {
                        debug!(layer = %self.layer, "Output reader dropped, stopping delivery");
                        return Ok(());
                    }
                }
            },
        }

        info!(layer = %self.layer, mode = ?self.mode, files = count, "Output assembled");
        Ok(())
    }
}

async fn add_unit(archiver: &mut dyn Archiver, unit: OutputUnit) -> Result<()> {
    let added = match unit.source {
        UnitSource::Buffer(content) => archiver.add_buffer(&unit.name, content).await,
        UnitSource::Resource { .. } => {
            let (name, content) = unit.open().await?;
            archiver.add_stream(&name, content).await
        },
    };
    added.map_err(|e| ConvertError::Archive { source: e.into() })
}

/// `AsyncWrite` pushing every written chunk onto the output queue.
///
/// Writes wait for queue capacity, so a slow reader suspends the archiver.
pub(crate) struct QueueWriter {
    sender: PollSender<Result<ConvertOutput>>,
}

impl QueueWriter {
    pub(crate) fn new(sender: mpsc::Sender<Result<ConvertOutput>>) -> Self {
        Self {
            sender: PollSender::new(sender),
        }
    }
}

fn reader_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "output reader dropped")
}

impl AsyncWrite for QueueWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(self.sender.poll_reserve(cx)).map_err(|_| reader_gone())?;
        self.sender
            .send_item(Ok(ConvertOutput::Bytes(Bytes::copy_from_slice(buf))))
            .map_err(|_| reader_gone())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}
