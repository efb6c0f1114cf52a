//! The caller-facing duplex channel of a conversion session.
//!
//! Features go in through [`FeatureWriter::write`], which resolves once the
//! per-type encoder accepted the feature. After [`FeatureWriter::close`] the
//! packaged output comes out of [`OutputReader::read`], either as archive
//! chunks or as named files. [`ConvertStream`] bundles both halves.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use shpstream_common::Feature;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::assembler::{ConvertOutput, OutputFile};
use crate::error::{ConvertError, Result};
use crate::events::{EventReporter, SessionEvent};
use crate::options::ConvertOptions;
use crate::session::{Collaborators, Command, Session};

/// Commands in flight between the writer and the session task. Every write
/// waits for its acknowledgement, so one slot is enough.
const COMMAND_QUEUE_CAPACITY: usize = 1;

/// Start a conversion session.
///
/// Options are validated here, before any feature is accepted. The session
/// itself runs on a task spawned onto the current tokio runtime.
///
/// # Errors
///
/// Returns [`ConvertError::Config`] when an option is invalid, a spatial
/// reference is unknown, or a required collaborator is missing.
///
/// # Panics
///
/// Panics when called outside of a tokio runtime.
pub fn create_convert_stream(
    options: &ConvertOptions,
    collaborators: &Collaborators,
) -> Result<ConvertStream> {
    let (reporter, events) = EventReporter::channel();
    let (output_sender, output) = mpsc::channel(options.output_queue_capacity.max(1));
    let session = Session::new(options, collaborators, reporter, output_sender)?;
    let session_id = session.session_id().to_string();

    let (commands, command_receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(session.run(command_receiver));

    Ok(ConvertStream {
        writer: FeatureWriter {
            commands,
            state: WriterState::Open,
        },
        reader: OutputReader {
            output,
            file_streams: options.return_as_file_streams,
        },
        events: Some(events),
        session_id,
    })
}

/// Convert a whole feature stream and collect its output in memory.
///
/// # Errors
///
/// Returns the first error raised while writing, closing or reading.
pub async fn convert<S>(
    features: S,
    options: &ConvertOptions,
    collaborators: &Collaborators,
) -> Result<CollectedOutput>
where
    S: Stream<Item = Feature>,
{
    let (mut writer, reader) = create_convert_stream(options, collaborators)?.split();

    let mut features = std::pin::pin!(features);
    while let Some(feature) = features.next().await {
        writer.write(feature).await?;
    }
    writer.close().await?;

    reader.collect().await
}

/// Both halves of a conversion session.
#[derive(Debug)]
pub struct ConvertStream {
    writer: FeatureWriter,
    reader: OutputReader,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    session_id: String,
}

impl ConvertStream {
    /// Identifier of the session, also used in temporary file names.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// See [`FeatureWriter::write`].
    ///
    /// # Errors
    ///
    /// Any error is fatal to the session.
    pub async fn write(&mut self, feature: Feature) -> Result<()> {
        self.writer.write(feature).await
    }

    /// See [`FeatureWriter::close`].
    ///
    /// # Errors
    ///
    /// Returns the finalization error of an encoder.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// See [`OutputReader::read`].
    pub async fn read(&mut self) -> Option<Result<ConvertOutput>> {
        self.reader.read().await
    }

    /// Receiver of the non-fatal events of this session. Only the first
    /// call returns it.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// Separate the halves so they can be driven from different tasks.
    #[must_use]
    pub fn split(self) -> (FeatureWriter, OutputReader) {
        (self.writer, self.reader)
    }
}

impl Stream for ConvertStream {
    type Item = Result<ConvertOutput>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reader).poll_next(cx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    Failed(String),
}

/// Write half of a conversion session.
#[derive(Debug)]
pub struct FeatureWriter {
    commands: mpsc::Sender<Command>,
    state: WriterState,
}

impl FeatureWriter {
    /// Hand one feature to the session. Resolves once its encoder accepted
    /// the record.
    ///
    /// # Errors
    ///
    /// Any error is fatal: temporary files are deleted, the read side ends
    /// with [`ConvertError::SessionFailed`], and later writes fail too.
    /// Writing after [`close`](Self::close) returns [`ConvertError::SessionClosed`].
    pub async fn write(&mut self, feature: Feature) -> Result<()> {
        match &self.state {
            WriterState::Open => {},
            WriterState::Closed => return Err(ConvertError::SessionClosed),
            WriterState::Failed(reason) => {
                return Err(ConvertError::SessionFailed {
                    reason: reason.clone(),
                });
            },
        }

        let outcome = self
            .request(|result| Command::Write { feature, result })
            .await;
        if let Err(e) = &outcome {
            self.state = WriterState::Failed(e.to_string());
        }
        outcome
    }

    /// End the write side and finalize every encoder.
    ///
    /// Calling it again returns the outcome of the first call.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session, if any.
    pub async fn close(&mut self) -> Result<()> {
        match &self.state {
            WriterState::Open => {},
            WriterState::Closed => return Ok(()),
            WriterState::Failed(reason) => {
                return Err(ConvertError::SessionFailed {
                    reason: reason.clone(),
                });
            },
        }

        let outcome = self.request(|result| Command::Close { result }).await;
        self.state = match &outcome {
            Ok(()) => WriterState::Closed,
            Err(e) => WriterState::Failed(e.to_string()),
        };
        debug!(closed = outcome.is_ok(), "Write side closed");
        outcome
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (result, reply) = oneshot::channel();
        self.commands
            .send(command(result))
            .await
            .map_err(|_| ConvertError::SessionClosed)?;
        reply.await.map_err(|_| ConvertError::SessionClosed)?
    }
}

/// Read half of a conversion session.
#[derive(Debug)]
pub struct OutputReader {
    output: mpsc::Receiver<Result<ConvertOutput>>,
    file_streams: bool,
}

impl OutputReader {
    /// Next output item; `None` once the output ended.
    ///
    /// Archive chunks only arrive after the write side closed. A fatal error
    /// is delivered as the last item.
    pub async fn read(&mut self) -> Option<Result<ConvertOutput>> {
        self.output.recv().await
    }

    /// Read everything, loading file contents into memory.
    ///
    /// # Errors
    ///
    /// Returns the error delivered by the session, or
    /// [`ConvertError::Read`] when a file cannot be read.
    pub async fn collect(mut self) -> Result<CollectedOutput> {
        let mut archive = BytesMut::new();
        let mut files = Vec::new();

        while let Some(item) = self.read().await {
            match item? {
                ConvertOutput::Bytes(chunk) => archive.extend_from_slice(&chunk),
                ConvertOutput::File(file) => files.push(read_file(file).await?),
            }
        }

        Ok(if self.file_streams {
            CollectedOutput::Files(files)
        } else {
            CollectedOutput::Archive(archive.freeze())
        })
    }
}

async fn read_file(file: OutputFile) -> Result<(String, Bytes)> {
    let name = file.name().to_string();
    match file.into_bytes().await {
        Ok(content) => Ok((name, content)),
        Err(source) => Err(ConvertError::Read { name, source }),
    }
}

impl Stream for OutputReader {
    type Item = Result<ConvertOutput>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.output.poll_recv(cx)
    }
}

/// Output of a session, held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectedOutput {
    /// The complete archive
    Archive(Bytes),
    /// Named files, in emission order
    Files(Vec<(String, Bytes)>),
}

impl CollectedOutput {
    #[must_use]
    pub fn archive(&self) -> Option<&Bytes> {
        match self {
            Self::Archive(archive) => Some(archive),
            Self::Files(_) => None,
        }
    }

    #[must_use]
    pub fn files(&self) -> Option<&[(String, Bytes)]> {
        match self {
            Self::Files(files) => Some(files),
            Self::Archive(_) => None,
        }
    }
}
