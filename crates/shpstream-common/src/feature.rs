//! Input features and their geometry classification.

use std::fmt;

use geo_types::Geometry;
use geojson::JsonObject;
use thiserror::Error;

/// Geometry family that selects the encoder sub-stream handling a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryType {
    /// Single points
    Point,
    /// Point collections
    MultiPoint,
    /// Lines and multi-lines
    Line,
    /// Polygons and multi-polygons
    Polygon,
}

impl GeometryType {
    /// Lowercase name used in output file names (e.g. `features.point.shp`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "point",
            GeometryType::MultiPoint => "multipoint",
            GeometryType::Line => "line",
            GeometryType::Polygon => "polygon",
        }
    }

    /// Classify a geometry, or `None` when no encoder family accepts it.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo_types::{Geometry, point};
    /// use shpstream_common::GeometryType;
    ///
    /// let geometry = Geometry::Point(point!(x: 2.3, y: 48.8));
    /// assert_eq!(GeometryType::of(&geometry), Some(GeometryType::Point));
    /// ```
    #[must_use]
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) => Some(GeometryType::Point),
            Geometry::MultiPoint(_) => Some(GeometryType::MultiPoint),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(GeometryType::Line)
            },
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(GeometryType::Polygon),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a geometry variant, for error messages.
#[must_use]
pub fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// One geometry + attribute record to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    /// Attribute values in insertion order
    pub properties: JsonObject,
}

impl Feature {
    #[must_use]
    pub fn new(geometry: impl Into<Geometry<f64>>, properties: JsonObject) -> Self {
        Self {
            geometry: geometry.into(),
            properties,
        }
    }

    /// Geometry family of this feature.
    #[must_use]
    pub fn geometry_type(&self) -> Option<GeometryType> {
        GeometryType::of(&self.geometry)
    }
}

/// Errors raised while converting `GeoJSON` features.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The feature carries no geometry
    #[error("Feature has no geometry")]
    MissingGeometry,

    /// The geometry could not be converted
    #[error("Failed to convert GeoJSON geometry: {message}")]
    Geometry {
        /// Description of the conversion problem
        message: String,
    },
}

impl TryFrom<geojson::Feature> for Feature {
    type Error = FeatureError;

    fn try_from(feature: geojson::Feature) -> Result<Self, Self::Error> {
        let geometry = feature.geometry.ok_or(FeatureError::MissingGeometry)?;
        let geometry: Geometry<f64> =
            geometry
                .try_into()
                .map_err(|err: geojson::Error| FeatureError::Geometry {
                    message: err.to_string(),
                })?;

        Ok(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        })
    }
}
