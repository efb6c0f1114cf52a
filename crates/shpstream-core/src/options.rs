//! Options for a conversion session.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use shpstream_common::{CrsDefinition, EncoderOptions, Schema};

use crate::crs::{Crs, CrsRegistry, DEFAULT_CRS};
use crate::error::ConfigError;

/// Layer name used in output file names when none is given.
pub const DEFAULT_LAYER: &str = "features";

/// Environment variable consulted when no temp directory is configured.
pub const TMP_DIR_ENV: &str = "TMP_DIR";

/// Number of output items buffered between the assembler and the reader.
pub const OUTPUT_QUEUE_CAPACITY: usize = 16;

/// Options for a conversion session
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Layer name, used as output file name stem (default: "features")
    pub layer: String,
    /// Pre-supplied schema; skips inference when set
    pub schema: Option<Schema>,
    /// Character field widths used during inference, by field name
    pub field_lengths: HashMap<String, usize>,
    /// Pad short values up to the declared field width (default: true)
    pub pad_values: bool,
    /// Spatial reference of incoming features (default: EPSG:4326)
    pub source_crs: Option<Crs>,
    /// Spatial reference of the output (default: same as source)
    pub target_crs: Option<Crs>,
    /// Emit named file streams instead of a single archive (default: false)
    pub return_as_file_streams: bool,
    /// Directory for temporary files (default: `$TMP_DIR`, then the system temp dir)
    pub temp_dir: Option<PathBuf>,
    /// Capacity of the output queue (default: 16)
    pub output_queue_capacity: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            layer: DEFAULT_LAYER.to_string(),
            schema: None,
            field_lengths: HashMap::new(),
            pad_values: true,
            source_crs: None,
            target_crs: None,
            return_as_file_streams: false,
            temp_dir: None,
            output_queue_capacity: OUTPUT_QUEUE_CAPACITY,
        }
    }
}

impl ConvertOptions {
    /// Create new options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the layer name
    #[must_use]
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    /// Supply the schema up front
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Set the inferred width of a character field
    #[must_use]
    pub fn with_field_length(mut self, field: impl Into<String>, length: usize) -> Self {
        self.field_lengths.insert(field.into(), length);
        self
    }

    /// Set whether short values are padded
    #[must_use]
    pub fn with_pad_values(mut self, pad_values: bool) -> Self {
        self.pad_values = pad_values;
        self
    }

    /// Set the source spatial reference
    #[must_use]
    pub fn with_source_crs(mut self, crs: Crs) -> Self {
        self.source_crs = Some(crs);
        self
    }

    /// Set the target spatial reference
    #[must_use]
    pub fn with_target_crs(mut self, crs: Crs) -> Self {
        self.target_crs = Some(crs);
        self
    }

    /// Emit named file streams instead of an archive
    #[must_use]
    pub fn with_file_streams(mut self, return_as_file_streams: bool) -> Self {
        self.return_as_file_streams = return_as_file_streams;
        self
    }

    /// Set the temporary directory
    #[must_use]
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Set the output queue capacity
    #[must_use]
    pub fn with_output_queue_capacity(mut self, capacity: usize) -> Self {
        self.output_queue_capacity = capacity;
        self
    }

    /// Directory holding temporary files: the configured one, else `$TMP_DIR`,
    /// else [`std::env::temp_dir`].
    #[must_use]
    pub fn resolve_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .or_else(|| std::env::var_os(TMP_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Validate the options against `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the layer name is empty, the queue
    /// capacity is zero, or a spatial reference is unknown to the registry.
    pub fn resolve(&self, registry: &CrsRegistry) -> Result<ResolvedOptions, ConfigError> {
        if self.layer.is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "layer".to_string(),
                message: "layer name must not be empty".to_string(),
            });
        }
        if self.output_queue_capacity == 0 {
            return Err(ConfigError::InvalidOption {
                option: "output_queue_capacity".to_string(),
                message: "capacity must be at least 1".to_string(),
            });
        }

        let source_crs = self.source_crs.unwrap_or(DEFAULT_CRS);
        let target_crs = self.target_crs.unwrap_or(source_crs);
        let source = registry.resolve(source_crs)?;
        let target = registry.resolve(target_crs)?;

        Ok(ResolvedOptions {
            layer: self.layer.clone(),
            schema: self.schema.clone(),
            field_lengths: self.field_lengths.clone(),
            encoder_options: EncoderOptions {
                pad_values: self.pad_values,
            },
            projection: Bytes::from(target.wkt.clone()),
            reprojection: (source_crs != target_crs).then_some((source, target)),
            return_as_file_streams: self.return_as_file_streams,
            temp_dir: self.resolve_temp_dir(),
            output_queue_capacity: self.output_queue_capacity,
        })
    }
}

/// Options after validation, as consumed by a session.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub layer: String,
    pub schema: Option<Schema>,
    pub field_lengths: HashMap<String, usize>,
    pub encoder_options: EncoderOptions,
    /// Content of every `.prj` companion file
    pub projection: Bytes,
    /// Source and target definitions, only when they differ
    pub reprojection: Option<(CrsDefinition, CrsDefinition)>,
    pub return_as_file_streams: bool,
    pub temp_dir: PathBuf,
    pub output_queue_capacity: usize,
}
