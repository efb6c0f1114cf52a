//! Attribute schema types.
//!
//! A [`Schema`] is the ordered list of attribute fields an encoder writes for
//! every record of a conversion session.

use std::fmt;

/// Semantic type of an attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Fixed-width text
    Character,
    /// Numeric value (integer or floating point)
    Number,
    /// Logical value
    Boolean,
    /// Calendar date (`YYYY-MM-DD`)
    Date,
}

impl FieldType {
    /// Lowercase name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Character => "character",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attribute field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Semantic type
    pub field_type: FieldType,
    /// Declared width, only present for [`FieldType::Character`]
    pub length: Option<usize>,
}

impl Field {
    /// A character field of the given declared width.
    #[must_use]
    pub fn character(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Character,
            length: Some(length),
        }
    }

    /// A numeric field.
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::untyped_length(name, FieldType::Number)
    }

    /// A boolean field.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::untyped_length(name, FieldType::Boolean)
    }

    /// A date field.
    #[must_use]
    pub fn date(name: impl Into<String>) -> Self {
        Self::untyped_length(name, FieldType::Date)
    }

    fn untyped_length(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: None,
        }
    }
}

/// Ordered field list shared by every geometry type of a session.
pub type Schema = Vec<Field>;
