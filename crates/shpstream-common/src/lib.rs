//! Common types and traits shared across `shpstream` crates.
//!
//! This crate provides the vocabulary shared between `shpstream-core` and the
//! encoder, archiver and reprojector implementations plugged into it, so those
//! implementations never need to depend on the conversion engine itself.

pub mod crs;
pub mod feature;
pub mod io;
pub mod schema;

// Re-export commonly used types
pub use crs::CrsDefinition;
pub use feature::{Feature, FeatureError, GeometryType, geometry_name};
pub use io::{
    Archiver, ArchiverFactory, ByteSink, ByteSource, EncoderFactory, EncoderOptions, Headers,
    RecordEncoder, Reprojector, SinkProvider,
};
pub use schema::{Field, FieldType, Schema};
