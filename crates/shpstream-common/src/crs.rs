//! Spatial reference definitions handed to reprojectors and companion files.

/// A resolved coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsDefinition {
    /// EPSG code
    pub code: u32,
    /// OGC WKT, written verbatim into `.prj` companion files
    pub wkt: String,
    /// PROJ.4 definition string, consumed by reprojectors
    pub proj4: String,
}

impl CrsDefinition {
    /// Create a new definition.
    #[must_use]
    pub fn new(code: u32, wkt: impl Into<String>, proj4: impl Into<String>) -> Self {
        Self {
            code,
            wkt: wkt.into(),
            proj4: proj4.into(),
        }
    }
}
