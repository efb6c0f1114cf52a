//! The task that owns a conversion session.
//!
//! A [`Session`] runs on its own tokio task and is driven through [`Command`]s
//! sent by the bridge, each answered on a oneshot channel. Output produced
//! after the write side closed goes to the bounded output queue.

use std::fmt;
use std::sync::Arc;

use shpstream_common::{ArchiverFactory, EncoderFactory, Feature, Reprojector};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::assembler::{ConvertOutput, OutputAssembler, PackagingMode};
use crate::crs::CrsRegistry;
use crate::error::{ConfigError, ConvertError, Result};
use crate::events::EventReporter;
use crate::multiplexer::{Multiplexer, Reprojection};
use crate::options::ConvertOptions;
use crate::temp::TempResourceTracker;

/// External implementations a session delegates to.
#[derive(Clone)]
pub struct Collaborators {
    /// Encoder for the per-type record streams
    pub encoder: Arc<dyn EncoderFactory>,
    /// Archive packager, required unless file streams are requested
    pub archiver: Option<Arc<dyn ArchiverFactory>>,
    /// Coordinate transformation, required when source and target CRS differ
    pub reprojector: Option<Arc<dyn Reprojector>>,
    /// Known spatial references
    pub crs_registry: CrsRegistry,
}

impl Collaborators {
    /// Collaborators with only an encoder and the default CRS registry.
    #[must_use]
    pub fn new(encoder: Arc<dyn EncoderFactory>) -> Self {
        Self {
            encoder,
            archiver: None,
            reprojector: None,
            crs_registry: CrsRegistry::default(),
        }
    }

    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn ArchiverFactory>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    #[must_use]
    pub fn with_reprojector(mut self, reprojector: Arc<dyn Reprojector>) -> Self {
        self.reprojector = Some(reprojector);
        self
    }

    #[must_use]
    pub fn with_crs_registry(mut self, crs_registry: CrsRegistry) -> Self {
        self.crs_registry = crs_registry;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("encoder", &self.encoder.primary_extension())
            .field("archiver", &self.archiver.is_some())
            .field("reprojector", &self.reprojector.is_some())
            .field("crs_registry", &self.crs_registry)
            .finish()
    }
}

pub(crate) enum Command {
    Write {
        feature: Feature,
        result: oneshot::Sender<Result<()>>,
    },
    Close {
        result: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct Session {
    multiplexer: Multiplexer,
    assembler: OutputAssembler,
    /// Dropped once the read side has been told everything it will get
    output: Option<mpsc::Sender<Result<ConvertOutput>>>,
}

impl Session {
    /// Validate `options` against `collaborators` and build the session.
    ///
    /// Nothing touches the filesystem before the first feature arrives.
    pub(crate) fn new(
        options: &ConvertOptions,
        collaborators: &Collaborators,
        reporter: EventReporter,
        output: mpsc::Sender<Result<ConvertOutput>>,
    ) -> Result<Self> {
        let resolved = options.resolve(&collaborators.crs_registry)?;

        let mode = if resolved.return_as_file_streams {
            PackagingMode::Raw
        } else {
            let archiver = collaborators
                .archiver
                .clone()
                .ok_or_else(|| ConfigError::MissingRequired {
                    option: "archiver".to_string(),
                })?;
            PackagingMode::Archived(archiver)
        };

        let reprojection = match resolved.reprojection {
            Some((source, target)) => {
                let reprojector = collaborators.reprojector.clone().ok_or_else(|| {
                    ConfigError::MissingRequired {
                        option: "reprojector".to_string(),
                    }
                })?;
                Some(Reprojection::new(reprojector, source, target))
            },
            None => None,
        };

        let tracker = TempResourceTracker::new(resolved.temp_dir, reporter);
        let assembler = OutputAssembler::new(
            resolved.layer,
            collaborators.encoder.primary_extension(),
            resolved.projection,
            mode,
        );
        let multiplexer = Multiplexer::new(
            collaborators.encoder.clone(),
            resolved.encoder_options,
            resolved.schema,
            resolved.field_lengths,
            reprojection,
            tracker,
        );

        Ok(Self {
            multiplexer,
            assembler,
            output: Some(output),
        })
    }

    pub(crate) fn session_id(&self) -> &str {
        self.multiplexer.tracker().session_id()
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(session = %self.session_id(), assembler = ?self.assembler, "Conversion session started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::Write { feature, result } => {
                    let outcome = self.multiplexer.write(feature).await;
                    if let Err(e) = &outcome {
                        self.fail_output(e);
                    }
                    let _ = result.send(outcome);
                },
                Command::Close { result } => {
                    self.close(result).await;
                    return;
                },
            }
        }

        let session_id = self.session_id().to_string();
        let Self {
            multiplexer,
            output,
            ..
        } = self;
        // Temporary files go before the reader sees the end of the output.
        drop(multiplexer);
        if let Some(output) = output {
            debug!(session = %session_id, "Writer dropped before close, discarding session");
            let _ = output.try_send(Err(ConvertError::SessionClosed.to_session_failure()));
        }
    }

    async fn close(&mut self, result: oneshot::Sender<Result<()>>) {
        let contexts = match self.multiplexer.finish().await {
            Ok(contexts) => contexts,
            Err(e) => {
                self.fail_output(&e);
                let _ = result.send(Err(e));
                return;
            },
        };

        // Reply before assembling: sequential callers start reading only once close resolved.
        let _ = result.send(Ok(()));

        let Some(output) = self.output.take() else {
            return;
        };
        if let Err(e) = self.assembler.assemble(contexts, &output).await {
            error!(session = %self.session_id(), error = %e, "Output assembly failed");
            let _ = output.send(Err(e)).await;
        }
    }

    /// Tell the read side the session is over. The queue is still empty
    /// while the write side is open, so this never waits.
    fn fail_output(&mut self, error: &ConvertError) {
        if let Some(output) = self.output.take() {
            let _ = output.try_send(Err(error.to_session_failure()));
        }
    }
}
