//! Zarr v2 `dtype` strings and the scalar values decoded with them.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use gridref_error::{GridRefError, GridRefResult, gridref_bail, gridref_err};
use serde::{Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
    NotApplicable,
}

/// The unit of a numpy-style `datetime64`/`timedelta64` dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Number of seconds in one unit.
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Weeks => 604_800.0,
            TimeUnit::Days => 86_400.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Nanoseconds => 1e-9,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            TimeUnit::Weeks => "W",
            TimeUnit::Days => "D",
            TimeUnit::Hours => "h",
            TimeUnit::Minutes => "m",
            TimeUnit::Seconds => "s",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Microseconds => "us",
            TimeUnit::Nanoseconds => "ns",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = GridRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "W" => TimeUnit::Weeks,
            "D" => TimeUnit::Days,
            "h" => TimeUnit::Hours,
            "m" => TimeUnit::Minutes,
            "s" => TimeUnit::Seconds,
            "ms" => TimeUnit::Milliseconds,
            "us" => TimeUnit::Microseconds,
            "ns" => TimeUnit::Nanoseconds,
            _ => gridref_bail!(Manifest: "unsupported time unit {s}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    UInt,
    Float,
    DateTime(TimeUnit),
    TimeDelta(TimeUnit),
}

/// A parsed zarr v2 dtype such as `<f8`, `|b1` or `<M8[s]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZarrDType {
    byte_order: ByteOrder,
    kind: ScalarKind,
    itemsize: usize,
}

impl ZarrDType {
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Decode one element from exactly [`Self::itemsize`] bytes.
    pub fn decode(&self, bytes: &[u8]) -> GridRefResult<CoordValue> {
        if bytes.len() != self.itemsize {
            gridref_bail!(
                Manifest: "expected {} bytes for dtype {}, found {}",
                self.itemsize,
                self,
                bytes.len()
            );
        }
        let mut buf = [0u8; 8];
        match self.byte_order {
            ByteOrder::Big => {
                buf[..self.itemsize].copy_from_slice(bytes);
                buf[..self.itemsize].reverse();
            }
            ByteOrder::Little | ByteOrder::NotApplicable => {
                buf[..self.itemsize].copy_from_slice(bytes)
            }
        }
        // buf now holds a little-endian value, zero extended
        let unsigned = u64::from_le_bytes(buf);
        let bits = u32::try_from(self.itemsize * 8)
            .map_err(|_| gridref_err!(Manifest: "itemsize {} too large", self.itemsize))?;
        let signed = if bits == 64 {
            unsigned as i64
        } else {
            let shift = 64 - bits;
            ((unsigned << shift) as i64) >> shift
        };

        Ok(match self.kind {
            ScalarKind::Bool => CoordValue::Bool(unsigned != 0),
            ScalarKind::Int => CoordValue::Int(signed),
            ScalarKind::UInt => CoordValue::UInt(unsigned),
            ScalarKind::Float => match self.itemsize {
                4 => {
                    let narrow = u32::try_from(unsigned)
                        .map_err(|_| gridref_err!(Manifest: "invalid f4 payload"))?;
                    CoordValue::Float(f64::from(f32::from_bits(narrow)))
                }
                _ => CoordValue::Float(f64::from_bits(unsigned)),
            },
            ScalarKind::DateTime(unit) => CoordValue::DateTime(signed, unit),
            ScalarKind::TimeDelta(unit) => CoordValue::TimeDelta(signed, unit),
        })
    }

    /// Decode a JSON `fill_value` for this dtype. `null` means no fill value.
    pub fn fill_value(&self, value: &Value) -> GridRefResult<Option<CoordValue>> {
        let decoded = match (value, self.kind) {
            (Value::Null, _) => return Ok(None),
            (Value::Bool(b), ScalarKind::Bool) => CoordValue::Bool(*b),
            (Value::String(s), ScalarKind::Float) => match s.as_str() {
                "NaN" => CoordValue::Float(f64::NAN),
                "Infinity" => CoordValue::Float(f64::INFINITY),
                "-Infinity" => CoordValue::Float(f64::NEG_INFINITY),
                _ => gridref_bail!(Manifest: "invalid float fill value {s}"),
            },
            (Value::Number(n), ScalarKind::Float) => CoordValue::Float(
                n.as_f64()
                    .ok_or_else(|| gridref_err!(Manifest: "invalid float fill value {n}"))?,
            ),
            (Value::Number(n), ScalarKind::Int) => CoordValue::Int(
                n.as_i64()
                    .ok_or_else(|| gridref_err!(Manifest: "invalid int fill value {n}"))?,
            ),
            (Value::Number(n), ScalarKind::UInt) => CoordValue::UInt(
                n.as_u64()
                    .ok_or_else(|| gridref_err!(Manifest: "invalid uint fill value {n}"))?,
            ),
            (Value::Number(n), ScalarKind::DateTime(unit)) => CoordValue::DateTime(
                n.as_i64()
                    .ok_or_else(|| gridref_err!(Manifest: "invalid datetime fill value {n}"))?,
                unit,
            ),
            (Value::Number(n), ScalarKind::TimeDelta(unit)) => CoordValue::TimeDelta(
                n.as_i64()
                    .ok_or_else(|| gridref_err!(Manifest: "invalid timedelta fill value {n}"))?,
                unit,
            ),
            (other, _) => {
                gridref_bail!(Manifest: "fill value {} does not match dtype {}", other, self)
            }
        };
        Ok(Some(decoded))
    }
}

impl FromStr for ZarrDType {
    type Err = GridRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let byte_order = match chars.next() {
            Some('<') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            Some('|') => ByteOrder::NotApplicable,
            _ => gridref_bail!(Manifest: "dtype {s} has no byte order marker"),
        };
        let code = chars
            .next()
            .ok_or_else(|| gridref_err!(Manifest: "dtype {s} has no type code"))?;
        let rest = chars.as_str();
        let (width, unit) = match rest.split_once('[') {
            Some((width, unit)) => (width, Some(unit.trim_end_matches(']'))),
            None => (rest, None),
        };
        let itemsize: usize = width
            .parse()
            .map_err(|_| gridref_err!(Manifest: "dtype {s} has an invalid item size"))?;

        let kind = match (code, unit) {
            ('b', None) => ScalarKind::Bool,
            ('i', None) => ScalarKind::Int,
            ('u', None) => ScalarKind::UInt,
            ('f', None) => ScalarKind::Float,
            ('M', Some(unit)) => ScalarKind::DateTime(unit.parse()?),
            ('m', Some(unit)) => ScalarKind::TimeDelta(unit.parse()?),
            _ => gridref_bail!(Manifest: "unsupported dtype {s}"),
        };

        let valid_size = match kind {
            ScalarKind::Bool => itemsize == 1,
            ScalarKind::Int | ScalarKind::UInt => matches!(itemsize, 1 | 2 | 4 | 8),
            ScalarKind::Float => matches!(itemsize, 4 | 8),
            ScalarKind::DateTime(_) | ScalarKind::TimeDelta(_) => itemsize == 8,
        };
        if !valid_size {
            gridref_bail!(Manifest: "unsupported item size in dtype {s}");
        }

        Ok(Self {
            byte_order,
            kind,
            itemsize,
        })
    }
}

impl Display for ZarrDType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let order = match self.byte_order {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        };
        match self.kind {
            ScalarKind::Bool => write!(f, "{order}b{}", self.itemsize),
            ScalarKind::Int => write!(f, "{order}i{}", self.itemsize),
            ScalarKind::UInt => write!(f, "{order}u{}", self.itemsize),
            ScalarKind::Float => write!(f, "{order}f{}", self.itemsize),
            ScalarKind::DateTime(unit) => write!(f, "{order}M{}[{}]", self.itemsize, unit.code()),
            ScalarKind::TimeDelta(unit) => write!(f, "{order}m{}[{}]", self.itemsize, unit.code()),
        }
    }
}

/// A single decoded coordinate value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    DateTime(i64, TimeUnit),
    TimeDelta(i64, TimeUnit),
}

impl CoordValue {
    /// The value as a float, with datetimes and timedeltas expressed in seconds.
    pub fn as_f64(&self) -> f64 {
        match self {
            CoordValue::Bool(b) => f64::from(u8::from(*b)),
            CoordValue::Int(v) => *v as f64,
            CoordValue::UInt(v) => *v as f64,
            CoordValue::Float(v) => *v,
            CoordValue::DateTime(v, unit) | CoordValue::TimeDelta(v, unit) => {
                *v as f64 * unit.seconds()
            }
        }
    }
}

impl Display for CoordValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordValue::Bool(v) => write!(f, "{v}"),
            CoordValue::Int(v) => write!(f, "{v}"),
            CoordValue::UInt(v) => write!(f, "{v}"),
            CoordValue::Float(v) => write!(f, "{v}"),
            CoordValue::DateTime(v, unit) => write!(f, "{v}{}", unit.code()),
            CoordValue::TimeDelta(v, unit) => write!(f, "+{v}{}", unit.code()),
        }
    }
}

impl Serialize for CoordValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CoordValue::Bool(v) => serializer.serialize_bool(*v),
            CoordValue::Int(v) => serializer.serialize_i64(*v),
            CoordValue::UInt(v) => serializer.serialize_u64(*v),
            CoordValue::Float(v) => serializer.serialize_f64(*v),
            CoordValue::DateTime(v, _) | CoordValue::TimeDelta(v, _) => serializer.serialize_i64(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("<f8", 8)]
    #[case(">i4", 4)]
    #[case("|b1", 1)]
    #[case("<M8[s]", 8)]
    #[case("<m8[ns]", 8)]
    fn parse_and_display(#[case] dtype: &str, #[case] itemsize: usize) {
        let parsed: ZarrDType = dtype.parse().unwrap();
        assert_eq!(parsed.itemsize(), itemsize);
        assert_eq!(parsed.to_string(), dtype);
    }

    #[rstest]
    #[case("f8")]
    #[case("<c16")]
    #[case("<f2")]
    #[case("<M8")]
    #[case("|S10")]
    fn reject_unsupported(#[case] dtype: &str) {
        assert!(dtype.parse::<ZarrDType>().is_err());
    }

    #[test]
    fn decode_little_and_big_endian() {
        let le: ZarrDType = "<f8".parse().unwrap();
        assert_eq!(le.decode(&2.5f64.to_le_bytes()).unwrap(), CoordValue::Float(2.5));

        let be: ZarrDType = ">i2".parse().unwrap();
        assert_eq!(be.decode(&(-3i16).to_be_bytes()).unwrap(), CoordValue::Int(-3));

        let f4: ZarrDType = "<f4".parse().unwrap();
        assert_eq!(f4.decode(&0.5f32.to_le_bytes()).unwrap(), CoordValue::Float(0.5));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let dtype: ZarrDType = "<i8".parse().unwrap();
        assert!(dtype.decode(&[0, 1, 2]).is_err());
    }

    #[test]
    fn datetime_seconds() {
        let dtype: ZarrDType = "<M8[h]".parse().unwrap();
        let value = dtype.decode(&3i64.to_le_bytes()).unwrap();
        assert_eq!(value, CoordValue::DateTime(3, TimeUnit::Hours));
        assert_eq!(value.as_f64(), 10_800.0);
    }

    #[test]
    fn fill_values() {
        let dtype: ZarrDType = "<f8".parse().unwrap();
        assert!(dtype.fill_value(&Value::Null).unwrap().is_none());
        let Some(CoordValue::Float(nan)) = dtype.fill_value(&Value::from("NaN")).unwrap() else {
            panic!("expected a float fill value");
        };
        assert!(nan.is_nan());
        assert!(dtype.fill_value(&Value::from(true)).is_err());
    }
}
