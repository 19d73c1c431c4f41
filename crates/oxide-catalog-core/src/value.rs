//! Property values.
//!
//! Every property stored in a [`PropertyBag`](crate::property::PropertyBag)
//! is a [`PropertyValue`]. Values arriving from the server are loosely typed
//! (integers for booleans and enumerations, text for GUIDs and timestamps)
//! and are coerced into the declared [`PropertyType`] when absorbed.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Storage type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean flag.
    Bool,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Float,
    /// Text.
    Text,
    /// Date and time without offset.
    DateTime,
    /// Date and time with a UTC offset.
    DateTimeOffset,
    /// Duration.
    TimeSpan,
    /// Globally unique identifier.
    Guid,
    /// Enumeration stored as a small integer code.
    Enum,
}

impl PropertyType {
    /// Returns the value stored when the server reports NULL for a
    /// temporal property.
    #[must_use]
    pub fn min_sentinel(self) -> Option<PropertyValue> {
        match self {
            Self::DateTime => Some(PropertyValue::DateTime(NaiveDateTime::MIN)),
            Self::DateTimeOffset => Some(PropertyValue::DateTimeOffset(
                DateTime::<Utc>::MIN_UTC.fixed_offset(),
            )),
            Self::TimeSpan => Some(PropertyValue::TimeSpan(TimeDelta::MIN)),
            _ => None,
        }
    }

    /// Returns the value reported for an unset property of an object that
    /// does not exist on the server yet.
    ///
    /// GUIDs and enumerations have no sensible default.
    #[must_use]
    pub fn default_value(self) -> Option<PropertyValue> {
        match self {
            Self::Bool => Some(PropertyValue::Bool(false)),
            Self::Int => Some(PropertyValue::Int(0)),
            Self::BigInt => Some(PropertyValue::BigInt(0)),
            Self::Float => Some(PropertyValue::Float(0.0)),
            Self::Text => Some(PropertyValue::Text(String::new())),
            Self::DateTime | Self::DateTimeOffset | Self::TimeSpan => self.min_sentinel(),
            Self::Guid | Self::Enum => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Text => "text",
            Self::DateTime => "datetime",
            Self::DateTimeOffset => "datetimeoffset",
            Self::TimeSpan => "timespan",
            Self::Guid => "guid",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Float.
    Float(f64),
    /// Text.
    Text(String),
    /// Date and time.
    DateTime(NaiveDateTime),
    /// Date and time with offset.
    DateTimeOffset(DateTime<FixedOffset>),
    /// Duration, serialized as milliseconds.
    #[serde(serialize_with = "serialize_time_delta")]
    TimeSpan(TimeDelta),
    /// GUID.
    Guid(Uuid),
    /// Enumeration code.
    Enum(i32),
}

fn serialize_time_delta<S: Serializer>(
    value: &TimeDelta,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(value.num_milliseconds())
}

impl PropertyValue {
    /// Returns true for [`PropertyValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the type of this value, `None` for NULL.
    #[must_use]
    pub fn property_type(&self) -> Option<PropertyType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(PropertyType::Bool),
            Self::Int(_) => Some(PropertyType::Int),
            Self::BigInt(_) => Some(PropertyType::BigInt),
            Self::Float(_) => Some(PropertyType::Float),
            Self::Text(_) => Some(PropertyType::Text),
            Self::DateTime(_) => Some(PropertyType::DateTime),
            Self::DateTimeOffset(_) => Some(PropertyType::DateTimeOffset),
            Self::TimeSpan(_) => Some(PropertyType::TimeSpan),
            Self::Guid(_) => Some(PropertyType::Guid),
            Self::Enum(_) => Some(PropertyType::Enum),
        }
    }

    /// Returns a short description of the value's type, used in error messages.
    #[must_use]
    pub fn type_label(&self) -> String {
        self.property_type()
            .map_or_else(|| "null".to_string(), |ty| ty.to_string())
    }

    /// Returns the boolean value, accepting integer encodings.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) | Self::Enum(i) => Some(*i != 0),
            Self::BigInt(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Returns the value as a 64-bit integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) | Self::Enum(i) => Some(i64::from(*i)),
            Self::BigInt(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the value as a 32-bit integer if it fits.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Returns the value as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::BigInt(i) => Some(*i as f64),
            Self::Int(i) | Self::Enum(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    /// Returns the text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the GUID value.
    #[must_use]
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Returns true if this value can be stored in a property of type `ty`
    /// without conversion. NULL fits every type.
    #[must_use]
    pub fn fits(&self, ty: PropertyType) -> bool {
        self.property_type().is_none_or(|own| own == ty)
    }

    /// Converts a raw storage value into the property's declared type.
    ///
    /// NULL is returned unchanged; the caller decides whether a sentinel
    /// replaces it.
    pub fn coerce(self, ty: PropertyType) -> Result<Self, Self> {
        if self.fits(ty) {
            return Ok(self);
        }
        let converted = match (ty, &self) {
            (PropertyType::Bool, _) => self.as_bool().map(Self::Bool),
            (PropertyType::Int, _) => self.as_i32().map(Self::Int),
            (PropertyType::Enum, _) => self.as_i32().map(Self::Enum),
            (PropertyType::BigInt, _) => self.as_i64().map(Self::BigInt),
            (PropertyType::Float, _) => self.as_f64().map(Self::Float),
            (PropertyType::Text, Self::Guid(g)) => Some(Self::Text(g.to_string())),
            (PropertyType::Text, _) => None,
            (PropertyType::Guid, Self::Text(s)) => Uuid::parse_str(s.trim()).ok().map(Self::Guid),
            (PropertyType::DateTime, Self::Text(s)) => parse_datetime(s).map(Self::DateTime),
            (PropertyType::DateTime, Self::DateTimeOffset(dt)) => {
                Some(Self::DateTime(dt.naive_local()))
            }
            (PropertyType::DateTimeOffset, Self::Text(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.and_utc().fixed_offset()))
                .map(Self::DateTimeOffset),
            (PropertyType::DateTimeOffset, Self::DateTime(dt)) => {
                Some(Self::DateTimeOffset(dt.and_utc().fixed_offset()))
            }
            (PropertyType::TimeSpan, _) => {
                self.as_i64()
                    .map(|ms| Self::TimeSpan(TimeDelta::milliseconds(ms)))
            }
            _ => None,
        };
        converted.ok_or(self)
    }
}

/// Layouts accepted for date-times without an offset.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) | Self::Enum(i) => write!(f, "{i}"),
            Self::BigInt(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            Self::DateTimeOffset(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::TimeSpan(d) => write!(f, "{}ms", d.num_milliseconds()),
            Self::Guid(g) => write!(f, "{g}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<NaiveDateTime> for PropertyValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
