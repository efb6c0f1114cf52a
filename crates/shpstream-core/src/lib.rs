//! `shpstream-core` turns a sequential feed of geospatial features into a
//! packaged multi-file output, one set of files per geometry type.
//!
//! This crate includes:
//! - **Schema inference**: attribute schema detection from the first feature.
//! - **Multiplexing**: one lazily created encoder per geometry type, backed by
//!   session-scoped temporary files.
//! - **Assembly**: header prefixes, `.prj` companion files and naming, packaged
//!   into an archive or delivered as named file streams.
//! - **Bridge**: a duplex channel with write acknowledgements and a bounded
//!   output queue.
//!
//! The record encoding, the archive container and the coordinate math are
//! supplied by the caller through the traits of `shpstream-common`.

pub mod assembler;
pub mod bridge;
pub mod crs;
pub mod error;
pub mod events;
pub mod multiplexer;
pub mod options;
pub mod schema;
pub mod session;
pub mod temp;

pub use assembler::{ConvertOutput, OutputFile};
pub use bridge::{
    CollectedOutput, ConvertStream, FeatureWriter, OutputReader, convert, create_convert_stream,
};
pub use crs::{Crs, CrsRegistry};
pub use error::{ConfigError, ConvertError, EncodeError, ResourceError, Result};
pub use events::SessionEvent;
pub use options::ConvertOptions;
pub use session::Collaborators;
