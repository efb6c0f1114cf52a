//! Attribute schema inference from a sample record.

use std::collections::HashMap;

use geojson::{JsonObject, JsonValue};
use shpstream_common::{Field, Schema};

/// Narrowest declared width of a character field.
pub const MIN_CHARACTER_LENGTH: usize = 80;

/// Widest character field a dBase table can declare.
pub const MAX_CHARACTER_LENGTH: usize = 254;

/// Derive a [`Schema`] from the properties of one feature.
///
/// Fields keep the iteration order of `properties`. Strings starting with a
/// `YYYY-MM-DD` date become date fields; other strings become character
/// fields whose width is the hint from `field_lengths` (or the value length
/// in characters) clamped to `80..=254`. Numbers and booleans map to their
/// own types; any other value is left out of the schema.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use serde_json::json;
/// use shpstream_common::{Field, FieldType};
/// use shpstream_core::schema::detect_schema;
///
/// let properties = json!({"name": "A", "count": 3, "created": "2015-06-11"});
/// let schema = detect_schema(properties.as_object().unwrap(), &HashMap::new());
///
/// assert_eq!(schema[0], Field::character("name", 80));
/// assert_eq!(schema[1].field_type, FieldType::Number);
/// assert_eq!(schema[2].field_type, FieldType::Date);
/// ```
#[must_use]
pub fn detect_schema(properties: &JsonObject, field_lengths: &HashMap<String, usize>) -> Schema {
    properties
        .iter()
        .filter_map(|(name, value)| match value {
            JsonValue::String(text) if has_date_prefix(text) => Some(Field::date(name.as_str())),
            JsonValue::String(text) => {
                let length = field_lengths
                    .get(name)
                    .copied()
                    .filter(|hint| *hint > 0)
                    .unwrap_or_else(|| text.chars().count());
                Some(Field::character(
                    name.as_str(),
                    length.clamp(MIN_CHARACTER_LENGTH, MAX_CHARACTER_LENGTH),
                ))
            },
            JsonValue::Number(_) => Some(Field::number(name.as_str())),
            JsonValue::Bool(_) => Some(Field::boolean(name.as_str())),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        })
        .collect()
}

/// `true` when `text` starts with four digits, a dash, two digits, a dash and
/// two digits.
fn has_date_prefix(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() < 10 {
        return false;
    }

    bytes[..10].iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    })
}
