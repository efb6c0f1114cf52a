//! Spatial reference identifiers and the registry resolving them.
//!
//! # Examples
//!
//! ```
//! use shpstream_core::crs::{Crs, CrsRegistry};
//!
//! let crs: Crs = "EPSG:2154".parse().expect("valid identifier");
//! let registry = CrsRegistry::default();
//! let definition = registry.resolve(crs).expect("built-in definition");
//! assert!(definition.wkt.contains("Lambert-93"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use shpstream_common::CrsDefinition;

use crate::error::ConfigError;

/// EPSG code of the spatial reference assumed for input features.
pub const DEFAULT_CRS: Crs = Crs(4326);

const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;
const WGS84_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

const PSEUDO_MERCATOR_WKT: &str = r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["X",EAST],AXIS["Y",NORTH],EXTENSION["PROJ4","+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs"],AUTHORITY["EPSG","3857"]]"#;
const PSEUDO_MERCATOR_PROJ4: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs";

const LAMBERT_93_WKT: &str = r#"PROJCS["RGF93 / Lambert-93",GEOGCS["RGF93",DATUM["Reseau_Geodesique_Francais_1993",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],TOWGS84[0,0,0,0,0,0,0],AUTHORITY["EPSG","6171"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4171"]],PROJECTION["Lambert_Conformal_Conic_2SP"],PARAMETER["standard_parallel_1",49],PARAMETER["standard_parallel_2",44],PARAMETER["latitude_of_origin",46.5],PARAMETER["central_meridian",3],PARAMETER["false_easting",700000],PARAMETER["false_northing",6600000],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["X",EAST],AXIS["Y",NORTH],AUTHORITY["EPSG","2154"]]"#;
const LAMBERT_93_PROJ4: &str = "+proj=lcc +lat_1=49 +lat_2=44 +lat_0=46.5 +lon_0=3 +x_0=700000 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

/// An EPSG spatial reference identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(pub u32);

impl Crs {
    #[must_use]
    pub fn code(&self) -> u32 {
        self.0
    }
}

impl Default for Crs {
    fn default() -> Self {
        DEFAULT_CRS
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl From<u32> for Crs {
    fn from(code: u32) -> Self {
        Crs(code)
    }
}

impl FromStr for Crs {
    type Err = ConfigError;

    /// Parses `"2154"` or `"EPSG:2154"` (prefix is case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some(_) => {
                return Err(ConfigError::InvalidOption {
                    option: "crs".to_string(),
                    message: format!("'{s}' is not an EPSG identifier"),
                });
            },
            None => trimmed,
        };

        code.parse::<u32>()
            .map(Crs)
            .map_err(|_| ConfigError::InvalidOption {
                option: "crs".to_string(),
                message: format!("projection number must be an integer, got '{s}'"),
            })
    }
}

/// Registry of known spatial reference definitions.
///
/// The default registry resolves any code of the EPSG dataset, with WKT and
/// PROJ strings for EPSG:4326, EPSG:3857 and EPSG:2154 pinned to the ones
/// written to `.prj` files. Definitions registered with
/// [`CrsRegistry::with_definition`] take precedence over the dataset.
#[derive(Debug, Clone)]
pub struct CrsRegistry {
    definitions: HashMap<u32, CrsDefinition>,
    epsg_dataset: bool,
}

impl Default for CrsRegistry {
    fn default() -> Self {
        Self {
            epsg_dataset: true,
            ..Self::empty()
        }
        .with_definition(CrsDefinition::new(4326, WGS84_WKT, WGS84_PROJ4))
        .with_definition(CrsDefinition::new(
            3857,
            PSEUDO_MERCATOR_WKT,
            PSEUDO_MERCATOR_PROJ4,
        ))
        .with_definition(CrsDefinition::new(2154, LAMBERT_93_WKT, LAMBERT_93_PROJ4))
    }
}

impl CrsRegistry {
    /// A registry without any definition, not even the EPSG dataset.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            definitions: HashMap::new(),
            epsg_dataset: false,
        }
    }

    /// Register (or replace) a definition
    #[must_use]
    pub fn with_definition(mut self, definition: CrsDefinition) -> Self {
        self.definitions.insert(definition.code, definition);
        self
    }

    /// Look up the definition of `crs`, registered definitions first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCrs`] if neither the registered
    /// definitions nor the EPSG dataset know the code.
    pub fn resolve(&self, crs: Crs) -> Result<CrsDefinition, ConfigError> {
        self.definitions
            .get(&crs.0)
            .cloned()
            .or_else(|| self.dataset_definition(crs))
            .ok_or(ConfigError::UnknownCrs { code: crs.0 })
    }

    #[must_use]
    pub fn contains(&self, crs: Crs) -> bool {
        self.definitions.contains_key(&crs.0) || self.dataset_definition(crs).is_some()
    }

    fn dataset_definition(&self, crs: Crs) -> Option<CrsDefinition> {
        if !self.epsg_dataset {
            return None;
        }
        // The dataset is keyed by 16-bit codes.
        let code = u16::try_from(crs.0).ok()?;
        crs_definitions::from_code(code)
            .map(|def| CrsDefinition::new(u32::from(def.code), def.wkt, def.proj4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_code() {
        assert_eq!("2154".parse::<Crs>().unwrap(), Crs(2154));
        assert_eq!(" 4326 ".parse::<Crs>().unwrap(), Crs(4326));
    }

    #[test]
    fn test_parse_prefixed_code() {
        assert_eq!("EPSG:3857".parse::<Crs>().unwrap(), Crs(3857));
        assert_eq!("epsg:2154".parse::<Crs>().unwrap(), Crs(2154));
    }

    #[test]
    fn test_parse_non_integer_is_rejected() {
        for input in ["abc", "21.54", "EPSG:", "IGNF:LAMB93", "-4326"] {
            let result = input.parse::<Crs>();
            assert!(
                matches!(result, Err(ConfigError::InvalidOption { .. })),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Crs(2154).to_string(), "EPSG:2154");
        assert_eq!(Crs::default(), DEFAULT_CRS);
    }

    #[test]
    fn test_builtin_definitions() {
        let registry = CrsRegistry::default();
        for code in [4326, 3857, 2154] {
            let definition = registry.resolve(Crs(code)).unwrap();
            assert_eq!(definition.code, code);
            assert!(definition.wkt.ends_with(&format!(r#"AUTHORITY["EPSG","{code}"]]"#)));
            assert!(definition.proj4.starts_with("+proj="));
        }
    }

    #[test]
    fn test_dataset_definitions() {
        let registry = CrsRegistry::default();
        for (code, name) in [
            (32631, "UTM zone 31N"),
            (25832, "UTM zone 32N"),
            (27572, "Lambert zone II"),
        ] {
            let definition = registry.resolve(Crs(code)).unwrap();
            assert_eq!(definition.code, code);
            assert!(definition.wkt.contains(name), "{code}: {}", definition.wkt);
            assert!(definition.proj4.starts_with("+proj="));
            assert!(registry.contains(Crs(code)));
        }
    }

    #[test]
    fn test_unknown_code() {
        let registry = CrsRegistry::default();
        for code in [1, 900_913] {
            assert!(matches!(
                registry.resolve(Crs(code)),
                Err(ConfigError::UnknownCrs { code: c }) if c == code
            ));
            assert!(!registry.contains(Crs(code)));
        }
    }

    #[test]
    fn test_register_definition() {
        let registry = CrsRegistry::empty().with_definition(CrsDefinition::new(
            27572,
            "PROJCS[\"NTF (Paris) / Lambert zone II\"]",
            "+proj=lcc",
        ));

        assert!(registry.contains(Crs(27572)));
        assert!(!registry.contains(Crs(4326)));
        assert!(!registry.contains(Crs(32631)));
    }

    #[test]
    fn test_registered_definition_overrides_dataset() {
        let registry = CrsRegistry::default().with_definition(CrsDefinition::new(
            27572,
            "PROJCS[\"custom\"]",
            "+proj=lcc",
        ));

        assert_eq!(registry.resolve(Crs(27572)).unwrap().wkt, "PROJCS[\"custom\"]");
        assert!(registry.resolve(Crs(900_913)).is_err());
    }
}
