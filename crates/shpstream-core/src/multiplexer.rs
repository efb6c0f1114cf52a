//! Fans a single feature stream out to one encoder per geometry type.
//!
//! Each geometry type gets a [`GeometryTypeContext`] the first time a feature
//! of that type arrives. Contexts move through
//! `Unstarted → Active → Finalizing → Done`, or to `Failed` on any encoder
//! error; a failure anywhere poisons the whole multiplexer and deletes every
//! temporary file allocated so far.

use std::collections::HashMap;
use std::sync::Arc;

use shpstream_common::{
    CrsDefinition, EncoderFactory, EncoderOptions, Feature, GeometryType, Headers, RecordEncoder,
    Reprojector, Schema, geometry_name,
};
use tracing::{debug, error, info};

use crate::error::{ConvertError, EncodeError, Result};
use crate::schema::detect_schema;
use crate::temp::{TempResource, TempResourceTracker};

/// Lifecycle of a [`GeometryTypeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No encoder yet
    Unstarted,
    /// Encoder accepting records
    Active,
    /// Encoder flushing
    Finalizing,
    /// Headers available
    Done,
    /// The encoder failed; the session is over
    Failed,
}

/// Encoder and bookkeeping for one geometry type.
pub struct GeometryTypeContext {
    geometry_type: GeometryType,
    state: ContextState,
    encoder: Option<Box<dyn RecordEncoder>>,
    feature_count: u64,
}

impl GeometryTypeContext {
    fn new(geometry_type: GeometryType) -> Self {
        Self {
            geometry_type,
            state: ContextState::Unstarted,
            encoder: None,
            feature_count: 0,
        }
    }

    #[must_use]
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[must_use]
    pub fn feature_count(&self) -> u64 {
        self.feature_count
    }

    async fn encode(&mut self, feature: &Feature) -> Result<()> {
        let encoder = match (self.state, self.encoder.as_mut()) {
            (ContextState::Active, Some(encoder)) => encoder,
            _ => {
                return Err(ConvertError::SessionFailed {
                    reason: format!("{} encoder is not active", self.geometry_type),
                });
            },
        };

        encoder
            .encode(feature)
            .await
            .map_err(|e| EncodeError::Record {
                geometry_type: self.geometry_type,
                source: e.into(),
            })?;
        self.feature_count += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<Headers> {
        let Some(encoder) = self.encoder.take() else {
            return Err(ConvertError::SessionFailed {
                reason: format!("{} encoder is not active", self.geometry_type),
            });
        };

        self.state = ContextState::Finalizing;
        match encoder.finish().await {
            Ok(headers) => {
                self.state = ContextState::Done;
                Ok(headers)
            },
            Err(e) => {
                self.state = ContextState::Failed;
                Err(EncodeError::Finish {
                    geometry_type: self.geometry_type,
                    source: e.into(),
                }
                .into())
            },
        }
    }
}

/// A geometry type whose encoder finished, with everything the output
/// assembler needs.
#[derive(Debug)]
pub struct FinalizedContext {
    pub geometry_type: GeometryType,
    /// Header bytes per extension
    pub headers: Headers,
    /// Backing files, in allocation order
    pub resources: Vec<TempResource>,
    pub feature_count: u64,
}

impl FinalizedContext {
    /// Header bytes for `extension`; empty when the encoder reported none.
    #[must_use]
    pub fn header(&self, extension: &str) -> bytes::Bytes {
        self.headers
            .iter()
            .find(|(ext, _)| ext == extension)
            .map(|(_, header)| header.clone())
            .unwrap_or_default()
    }
}

/// Coordinate transformation applied before encoding.
#[derive(Clone)]
pub struct Reprojection {
    reprojector: Arc<dyn Reprojector>,
    source: CrsDefinition,
    target: CrsDefinition,
}

impl Reprojection {
    #[must_use]
    pub fn new(
        reprojector: Arc<dyn Reprojector>,
        source: CrsDefinition,
        target: CrsDefinition,
    ) -> Self {
        Self {
            reprojector,
            source,
            target,
        }
    }

    fn apply(&self, feature: Feature) -> Result<Feature> {
        self.reprojector
            .reproject(feature, &self.source, &self.target)
            .map_err(|e| ConvertError::Reproject {
                from: self.source.code,
                to: self.target.code,
                source: e.into(),
            })
    }
}

/// Routes features to lazily created per-type encoders.
pub struct Multiplexer {
    encoder_factory: Arc<dyn EncoderFactory>,
    encoder_options: EncoderOptions,
    schema: Option<Schema>,
    field_lengths: HashMap<String, usize>,
    reprojection: Option<Reprojection>,
    /// Contexts in first-encountered order
    contexts: Vec<GeometryTypeContext>,
    tracker: TempResourceTracker,
    failure: Option<String>,
    finished: bool,
}

impl Multiplexer {
    /// Create a multiplexer. `schema` skips inference when given.
    #[must_use]
    pub fn new(
        encoder_factory: Arc<dyn EncoderFactory>,
        encoder_options: EncoderOptions,
        schema: Option<Schema>,
        field_lengths: HashMap<String, usize>,
        reprojection: Option<Reprojection>,
        tracker: TempResourceTracker,
    ) -> Self {
        Self {
            encoder_factory,
            encoder_options,
            schema,
            field_lengths,
            reprojection,
            contexts: Vec::new(),
            tracker,
            failure: None,
            finished: false,
        }
    }

    /// The session schema, once supplied or inferred.
    #[must_use]
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn contexts(&self) -> &[GeometryTypeContext] {
        &self.contexts
    }

    #[must_use]
    pub fn tracker(&self) -> &TempResourceTracker {
        &self.tracker
    }

    /// Encode one feature. Resolves once its encoder accepted the record.
    ///
    /// # Errors
    ///
    /// Any error is fatal: every temporary file is deleted and all later
    /// calls return [`ConvertError::SessionFailed`].
    pub async fn write(&mut self, feature: Feature) -> Result<()> {
        self.ensure_usable()?;
        match self.route(feature).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn route(&mut self, feature: Feature) -> Result<()> {
        let field_lengths = &self.field_lengths;
        let schema = self
            .schema
            .get_or_insert_with(|| detect_schema(&feature.properties, field_lengths));

        let feature = match &self.reprojection {
            Some(reprojection) => reprojection.apply(feature)?,
            None => feature,
        };

        let geometry_type =
            GeometryType::of(&feature.geometry).ok_or_else(|| EncodeError::UnsupportedGeometry {
                geometry: geometry_name(&feature.geometry).to_string(),
            })?;

        // No slice iterator may live across the await below: encoders are not `Sync`.
        let existing = self
            .contexts
            .iter()
            .position(|c| c.geometry_type == geometry_type);
        let index = match existing {
            Some(index) => index,
            None => {
                let mut sinks = self.tracker.sinks_for(geometry_type);
                let encoder = self
                    .encoder_factory
                    .create(geometry_type, schema, &self.encoder_options, &mut sinks)
                    .await
                    .map_err(|e| EncodeError::Create {
                        geometry_type,
                        source: e.into(),
                    })?;

                let mut context = GeometryTypeContext::new(geometry_type);
                context.encoder = Some(encoder);
                context.state = ContextState::Active;
                self.contexts.push(context);
                debug!(%geometry_type, "Started encoder");
                self.contexts.len() - 1
            },
        };

        self.contexts[index].encode(&feature).await
    }

    /// Finalize every encoder in first-encountered order.
    ///
    /// # Errors
    ///
    /// Returns the first encoder failure, after deleting every temporary file.
    pub async fn finish(&mut self) -> Result<Vec<FinalizedContext>> {
        self.ensure_usable()?;
        self.finished = true;

        let mut all_headers = Vec::with_capacity(self.contexts.len());
        for index in 0..self.contexts.len() {
            match self.contexts[index].finish().await {
                Ok(headers) => all_headers.push(headers),
                Err(e) => return Err(self.fail(e)),
            }
        }

        let finalized: Vec<FinalizedContext> = self
            .contexts
            .iter()
            .zip(all_headers)
            .map(|(context, headers)| FinalizedContext {
                geometry_type: context.geometry_type,
                headers,
                resources: self.tracker.take(context.geometry_type),
                feature_count: context.feature_count,
            })
            .collect();

        info!(
            session = %self.tracker.session_id(),
            geometry_types = finalized.len(),
            features = finalized.iter().map(|c| c.feature_count).sum::<u64>(),
            "Encoders finalized"
        );
        Ok(finalized)
    }

    fn ensure_usable(&self) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(ConvertError::SessionFailed {
                reason: reason.clone(),
            });
        }
        if self.finished {
            return Err(ConvertError::SessionClosed);
        }
        Ok(())
    }

    fn fail(&mut self, error: ConvertError) -> ConvertError {
        error!(session = %self.tracker.session_id(), error = %error, "Conversion failed");
        for context in &mut self.contexts {
            context.encoder = None;
            context.state = ContextState::Failed;
        }
        self.tracker.release_all();
        self.failure = Some(error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReporter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use geo_types::{Geometry, GeometryCollection, line_string, point};
    use serde_json::json;
    use shpstream_common::{ByteSink, Field, SinkProvider};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    /// Writes one line per record to a single `rec` sink.
    struct LineEncoderFactory {
        schemas: Mutex<Vec<Schema>>,
    }

    struct LineEncoder {
        sink: ByteSink,
        count: usize,
    }

    #[async_trait]
    impl EncoderFactory for LineEncoderFactory {
        fn primary_extension(&self) -> &str {
            "rec"
        }

        async fn create(
            &self,
            _geometry_type: GeometryType,
            schema: &Schema,
            _options: &EncoderOptions,
            sinks: &mut dyn SinkProvider,
        ) -> anyhow::Result<Box<dyn RecordEncoder>> {
            self.schemas.lock().unwrap().push(schema.clone());
            Ok(Box::new(LineEncoder {
                sink: sinks.open("rec").await?,
                count: 0,
            }))
        }
    }

    #[async_trait]
    impl RecordEncoder for LineEncoder {
        async fn encode(&mut self, feature: &Feature) -> anyhow::Result<()> {
            if feature.properties.get("reject") == Some(&json!(true)) {
                anyhow::bail!("record rejected");
            }
            self.sink.write_all(b"record\n").await?;
            self.count += 1;
            Ok(())
        }

        async fn finish(mut self: Box<Self>) -> anyhow::Result<Headers> {
            self.sink.shutdown().await?;
            Ok(vec![(
                "rec".to_string(),
                Bytes::from(format!("{}\n", self.count)),
            )])
        }
    }

    fn multiplexer(temp_dir: &TempDir, schema: Option<Schema>) -> (Multiplexer, Arc<LineEncoderFactory>) {
        let factory = Arc::new(LineEncoderFactory {
            schemas: Mutex::new(Vec::new()),
        });
        let multiplexer = Multiplexer::new(
            factory.clone(),
            EncoderOptions::default(),
            schema,
            HashMap::new(),
            None,
            TempResourceTracker::new(temp_dir.path(), EventReporter::default()),
        );
        (multiplexer, factory)
    }

    fn feature(geometry: impl Into<Geometry<f64>>, properties: serde_json::Value) -> Feature {
        Feature::new(geometry, properties.as_object().cloned().unwrap())
    }

    fn file_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_write_and_finish_futures_are_send() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);

        let write = multiplexer.write(feature(point!(x: 0.0, y: 0.0), json!({})));
        assert_send(&write);
        write.await.unwrap();

        let finish = multiplexer.finish();
        assert_send(&finish);
        assert_eq!(finish.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_contexts_created_lazily_in_encounter_order() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);
        assert!(multiplexer.contexts().is_empty());

        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)];
        multiplexer.write(feature(line.clone(), json!({}))).await.unwrap();
        multiplexer.write(feature(point!(x: 1.0, y: 1.0), json!({}))).await.unwrap();
        multiplexer.write(feature(line, json!({}))).await.unwrap();

        let types: Vec<GeometryType> = multiplexer
            .contexts()
            .iter()
            .map(GeometryTypeContext::geometry_type)
            .collect();
        assert_eq!(types, [GeometryType::Line, GeometryType::Point]);
        assert!(multiplexer.contexts().iter().all(|c| c.state() == ContextState::Active));
        assert_eq!(multiplexer.contexts()[0].feature_count(), 2);
        assert_eq!(file_count(&temp_dir), 2);
    }

    #[tokio::test]
    async fn test_schema_inferred_once_from_first_feature() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, factory) = multiplexer(&temp_dir, None);

        multiplexer
            .write(feature(point!(x: 0.0, y: 0.0), json!({"name": "A"})))
            .await
            .unwrap();
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)];
        multiplexer
            .write(feature(line, json!({"other": 1, "more": true})))
            .await
            .unwrap();

        let expected = vec![Field::character("name", 80)];
        assert_eq!(multiplexer.schema(), Some(&expected));
        assert_eq!(*factory.schemas.lock().unwrap(), vec![expected.clone(), expected]);
    }

    #[tokio::test]
    async fn test_supplied_schema_skips_inference() {
        let temp_dir = TempDir::new().unwrap();
        let supplied = vec![Field::number("id")];
        let (mut multiplexer, _) = multiplexer(&temp_dir, Some(supplied.clone()));

        multiplexer
            .write(feature(point!(x: 0.0, y: 0.0), json!({"name": "A"})))
            .await
            .unwrap();

        assert_eq!(multiplexer.schema(), Some(&supplied));
    }

    #[tokio::test]
    async fn test_finish_returns_headers_and_resources() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);

        multiplexer.write(feature(point!(x: 0.0, y: 0.0), json!({}))).await.unwrap();
        multiplexer.write(feature(point!(x: 1.0, y: 0.0), json!({}))).await.unwrap();

        let finalized = multiplexer.finish().await.unwrap();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].header("rec"), Bytes::from("2\n"));
        assert_eq!(finalized[0].header("missing"), Bytes::new());
        assert_eq!(finalized[0].resources.len(), 1);
        assert_eq!(finalized[0].feature_count, 2);
        assert_eq!(multiplexer.contexts()[0].state(), ContextState::Done);

        drop(finalized);
        assert_eq!(file_count(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_finish_without_features() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);

        let finalized = multiplexer.finish().await.unwrap();
        assert!(finalized.is_empty());
        assert!(matches!(
            multiplexer.write(feature(point!(x: 0.0, y: 0.0), json!({}))).await,
            Err(ConvertError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_rejected_record_poisons_session() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);

        multiplexer.write(feature(point!(x: 0.0, y: 0.0), json!({}))).await.unwrap();
        let result = multiplexer
            .write(feature(point!(x: 0.0, y: 0.0), json!({"reject": true})))
            .await;

        assert!(matches!(
            result,
            Err(ConvertError::Encode(EncodeError::Record { .. }))
        ));
        assert_eq!(multiplexer.contexts()[0].state(), ContextState::Failed);
        assert_eq!(file_count(&temp_dir), 0);
        assert!(matches!(
            multiplexer.finish().await,
            Err(ConvertError::SessionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsupported_geometry_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (mut multiplexer, _) = multiplexer(&temp_dir, None);

        multiplexer.write(feature(point!(x: 0.0, y: 0.0), json!({}))).await.unwrap();
        let collection = Geometry::GeometryCollection(GeometryCollection::<f64>(vec![]));
        let result = multiplexer.write(feature(collection, json!({}))).await;

        assert!(matches!(
            result,
            Err(ConvertError::Encode(EncodeError::UnsupportedGeometry { .. }))
        ));
        assert_eq!(file_count(&temp_dir), 0);
    }
}
