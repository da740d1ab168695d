use std::fmt::{self, Display};

use ordered_float::OrderedFloat;

/// SQL types supported by the execution core.
///
/// `Text` carries the id of the dictionary that encodes it, or `None` for a
/// "real" (uncompressed) string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Time,
    Timestamp,
    Date,
    Text { dict_id: Option<i32> },
}

impl SqlType {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::SmallInt | Self::Int | Self::BigInt)
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Self::Time | Self::Timestamp | Self::Date)
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    pub fn is_dict_encoded(&self) -> bool {
        matches!(self, Self::Text { dict_id: Some(_) })
    }

    pub fn dict_id(&self) -> Option<i32> {
        match self {
            Self::Text { dict_id } => *dict_id,
            _ => None,
        }
    }

    /// Width in bytes of one stored element of this type.
    ///
    /// Dictionary-encoded strings store a 32-bit id; real strings have no
    /// fixed width and must not reach this.
    pub fn byte_width(&self) -> usize {
        match self {
            Self::Boolean => 1,
            Self::SmallInt => 2,
            Self::Int => 4,
            Self::BigInt | Self::Time | Self::Timestamp | Self::Date => 8,
            Self::Float => 4,
            Self::Double => 8,
            Self::Text { dict_id: Some(_) } => 4,
            Self::Text { dict_id: None } => {
                panic!("real string columns have no fixed element width")
            }
        }
    }

    /// The in-band null sentinel for integer-like representations of this
    /// type: the minimum value of the stored width.
    pub fn null_sentinel(&self) -> i64 {
        match self {
            Self::Boolean => i8::MIN as i64,
            Self::SmallInt => i16::MIN as i64,
            Self::Int => i32::MIN as i64,
            Self::BigInt | Self::Time | Self::Timestamp | Self::Date => i64::MIN,
            // dictionary ids are 32 bits
            Self::Text { dict_id: Some(_) } => i32::MIN as i64,
            Self::Float | Self::Double | Self::Text { dict_id: None } => {
                panic!("no integer null sentinel for {self}")
            }
        }
    }

    /// The null sentinel used for floating point slots.
    pub fn null_sentinel_f64(&self) -> f64 {
        match self {
            Self::Float => f32::MIN as f64,
            Self::Double => f64::MIN,
            _ => panic!("no floating point null sentinel for {self}"),
        }
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Boolean => "BOOLEAN",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Text { .. } => "TEXT",
        };
        f.write_str(s)
    }
}

/// A single literal value as it appears in a planned tree or a chunk
/// statistic.
///
/// The derived ordering is only meaningful between values of the same
/// variant; statistics never compare across variants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Double(OrderedFloat<f64>),
    Str(String),
}

impl Datum {
    pub fn from_f64(v: f64) -> Self {
        Self::Double(OrderedFloat(v))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(v.0),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinels_are_type_minimums() {
        assert_eq!(SqlType::SmallInt.null_sentinel(), i16::MIN as i64);
        assert_eq!(SqlType::Int.null_sentinel(), i32::MIN as i64);
        assert_eq!(SqlType::BigInt.null_sentinel(), i64::MIN);
        assert_eq!(SqlType::Timestamp.null_sentinel(), i64::MIN);
        assert_eq!(
            SqlType::Text { dict_id: Some(1) }.null_sentinel(),
            i32::MIN as i64
        );
    }

    #[test]
    fn widths() {
        assert_eq!(SqlType::SmallInt.byte_width(), 2);
        assert_eq!(SqlType::Int.byte_width(), 4);
        assert_eq!(SqlType::BigInt.byte_width(), 8);
        assert_eq!(SqlType::Text { dict_id: Some(7) }.byte_width(), 4);
    }

    #[test]
    fn datum_coercions() {
        assert_eq!(Datum::Int(3).as_f64(), Some(3.0));
        assert_eq!(Datum::from_f64(1.5).as_f64(), Some(1.5));
        assert_eq!(Datum::Str("x".into()).as_i64(), None);
        assert!(Datum::Null.is_null());
    }
}
