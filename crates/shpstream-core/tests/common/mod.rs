//! Stub collaborators for the integration tests.
//!
//! The encoder writes one text line per record to `shp`, `shx` and `dbf`
//! sinks and reports `<ext>:<type>:<count>\n` headers. The archiver frames
//! every entry as `--- <name>\n<content>` and ends with `=== end\n`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use geo_types::{Geometry, line_string, point};
use serde_json::{Value, json};
use shpstream_common::{
    Archiver, ArchiverFactory, ByteSink, ByteSource, CrsDefinition, EncoderFactory, EncoderOptions,
    Feature, GeometryType, Headers, RecordEncoder, Reprojector, Schema, SinkProvider,
};
use shpstream_core::Collaborators;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Extensions produced by [`StubEncoderFactory`], in sink allocation order.
pub const EXTENSIONS: [&str; 3] = ["shp", "shx", "dbf"];

#[derive(Default)]
pub struct StubEncoderFactory {
    /// Schema received by each created encoder
    pub schemas: Mutex<Vec<Schema>>,
    /// Makes `finish` fail
    pub fail_on_finish: bool,
}

impl StubEncoderFactory {
    pub fn failing_on_finish() -> Self {
        Self {
            fail_on_finish: true,
            ..Self::default()
        }
    }
}

struct StubEncoder {
    geometry_type: GeometryType,
    sinks: Vec<ByteSink>,
    count: usize,
    fail_on_finish: bool,
}

#[async_trait]
impl EncoderFactory for StubEncoderFactory {
    fn primary_extension(&self) -> &str {
        "shp"
    }

    async fn create(
        &self,
        geometry_type: GeometryType,
        schema: &Schema,
        _options: &EncoderOptions,
        sinks: &mut dyn SinkProvider,
    ) -> anyhow::Result<Box<dyn RecordEncoder>> {
        self.schemas
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(schema.clone());

        let mut opened = Vec::with_capacity(EXTENSIONS.len());
        for extension in EXTENSIONS {
            opened.push(sinks.open(extension).await?);
        }
        Ok(Box::new(StubEncoder {
            geometry_type,
            sinks: opened,
            count: 0,
            fail_on_finish: self.fail_on_finish,
        }))
    }
}

#[async_trait]
impl RecordEncoder for StubEncoder {
    async fn encode(&mut self, feature: &Feature) -> anyhow::Result<()> {
        if feature.properties.get("fail") == Some(&json!(true)) {
            anyhow::bail!("record refused");
        }

        let n = self.count;
        let properties = serde_json::to_string(&feature.properties)?;
        self.sinks[0].write_all(format!("rec{n}\n").as_bytes()).await?;
        self.sinks[1].write_all(format!("idx{n}\n").as_bytes()).await?;
        self.sinks[2].write_all(format!("{properties}\n").as_bytes()).await?;
        self.count += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> anyhow::Result<Headers> {
        for sink in &mut self.sinks {
            sink.shutdown().await?;
        }
        if self.fail_on_finish {
            anyhow::bail!("cannot finalize");
        }

        Ok(EXTENSIONS
            .iter()
            .map(|extension| {
                let header = format!("{extension}:{}:{}\n", self.geometry_type, self.count);
                (extension.to_string(), Bytes::from(header))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingArchiverFactory {
    /// Names of the entries added, in order
    pub entries: Arc<Mutex<Vec<String>>>,
    /// Entry name that makes the archiver fail
    pub fail_on: Option<String>,
}

struct RecordingArchiver {
    output: ByteSink,
    entries: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl ArchiverFactory for RecordingArchiverFactory {
    fn create(&self, output: ByteSink) -> Box<dyn Archiver> {
        Box::new(RecordingArchiver {
            output,
            entries: self.entries.clone(),
            fail_on: self.fail_on.clone(),
        })
    }
}

#[async_trait]
impl Archiver for RecordingArchiver {
    async fn add_buffer(&mut self, name: &str, content: Bytes) -> anyhow::Result<()> {
        if self.fail_on.as_deref() == Some(name) {
            anyhow::bail!("cannot add {name}");
        }
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(name.to_string());
        self.output
            .write_all(format!("--- {name}\n").as_bytes())
            .await?;
        self.output.write_all(&content).await?;
        Ok(())
    }

    async fn add_stream(&mut self, name: &str, mut content: ByteSource) -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer).await?;
        self.add_buffer(name, Bytes::from(buffer)).await
    }

    async fn end(mut self: Box<Self>) -> anyhow::Result<()> {
        self.output.write_all(b"=== end\n").await?;
        self.output.shutdown().await?;
        Ok(())
    }
}

/// Tags each feature with the target EPSG code instead of moving coordinates.
#[derive(Default)]
pub struct CountingReprojector {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingReprojector {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reprojector for CountingReprojector {
    fn reproject(
        &self,
        mut feature: Feature,
        _source: &CrsDefinition,
        target: &CrsDefinition,
    ) -> anyhow::Result<Feature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("coordinates out of range");
        }
        feature
            .properties
            .insert("epsg".to_string(), json!(target.code));
        Ok(feature)
    }
}

pub fn collaborators(encoder: Arc<StubEncoderFactory>) -> Collaborators {
    Collaborators::new(encoder).with_archiver(Arc::new(RecordingArchiverFactory::default()))
}

pub fn feature(geometry: impl Into<Geometry<f64>>, properties: Value) -> Feature {
    Feature::new(
        geometry,
        properties.as_object().cloned().unwrap_or_default(),
    )
}

pub fn point_feature(name: &str) -> Feature {
    feature(point!(x: 2.35, y: 48.85), json!({ "name": name }))
}

pub fn line_feature(name: &str) -> Feature {
    feature(
        line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)],
        json!({ "name": name }),
    )
}

/// Number of entries in `dir`.
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0)
}
