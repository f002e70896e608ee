//! Duck-typed scalar conversions for `SerializationInfo::get_value`/`set_value`.

use super::Scalar;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("value out of range for target type")]
    OutOfRange,
    #[error("source value is not numeric")]
    NotNumeric,
    #[error("empty value has no conversion")]
    Empty,
}

pub trait FromSi: Sized {
    fn from_si(v: &Scalar) -> Result<Self, ConversionError>;
}

pub trait ToSi {
    fn to_si(self) -> Scalar;
}

macro_rules! signed_from_si {
    ($t:ty) => {
        impl FromSi for $t {
            fn from_si(v: &Scalar) -> Result<Self, ConversionError> {
                match v {
                    Scalar::Signed(i) => <$t>::try_from(*i).map_err(|_| ConversionError::OutOfRange),
                    Scalar::Unsigned(u) => <$t>::try_from(*u).map_err(|_| ConversionError::OutOfRange),
                    Scalar::Bool(b) => Ok(*b as $t),
                    Scalar::Float(f) if f.fract() == 0.0 => {
                        if *f < <$t>::MIN as f64 || *f > <$t>::MAX as f64 {
                            Err(ConversionError::OutOfRange)
                        } else {
                            Ok(*f as $t)
                        }
                    }
                    Scalar::NarrowString(s) => s.parse::<$t>().map_err(|_| ConversionError::NotNumeric),
                    Scalar::Empty => Err(ConversionError::Empty),
                    _ => Err(ConversionError::NotNumeric),
                }
            }
        }

        impl ToSi for $t {
            fn to_si(self) -> Scalar {
                Scalar::Signed(self as i64)
            }
        }
    };
}

macro_rules! unsigned_from_si {
    ($t:ty) => {
        impl FromSi for $t {
            fn from_si(v: &Scalar) -> Result<Self, ConversionError> {
                match v {
                    Scalar::Unsigned(u) => <$t>::try_from(*u).map_err(|_| ConversionError::OutOfRange),
                    Scalar::Signed(i) => {
                        if *i < 0 {
                            Err(ConversionError::OutOfRange)
                        } else {
                            <$t>::try_from(*i as u64).map_err(|_| ConversionError::OutOfRange)
                        }
                    }
                    Scalar::Bool(b) => Ok(*b as $t),
                    Scalar::NarrowString(s) => s.parse::<$t>().map_err(|_| ConversionError::NotNumeric),
                    Scalar::Empty => Err(ConversionError::Empty),
                    _ => Err(ConversionError::NotNumeric),
                }
            }
        }

        impl ToSi for $t {
            fn to_si(self) -> Scalar {
                Scalar::Unsigned(self as u64)
            }
        }
    };
}

signed_from_si!(i8);
signed_from_si!(i16);
signed_from_si!(i32);
signed_from_si!(i64);
unsigned_from_si!(u8);
unsigned_from_si!(u16);
unsigned_from_si!(u32);
unsigned_from_si!(u64);

impl FromSi for f64 {
    fn from_si(v: &Scalar) -> Result<Self, ConversionError> {
        match v {
            Scalar::Float(f) => Ok(*f),
            Scalar::Signed(i) => Ok(*i as f64),
            Scalar::Unsigned(u) => Ok(*u as f64),
            Scalar::NarrowString(s) => s.parse::<f64>().map_err(|_| ConversionError::NotNumeric),
            Scalar::Empty => Err(ConversionError::Empty),
            _ => Err(ConversionError::NotNumeric),
        }
    }
}

impl ToSi for f64 {
    fn to_si(self) -> Scalar {
        Scalar::Float(self)
    }
}

impl FromSi for bool {
    fn from_si(v: &Scalar) -> Result<Self, ConversionError> {
        match v {
            Scalar::Bool(b) => Ok(*b),
            Scalar::Signed(i) => Ok(*i != 0),
            Scalar::Unsigned(u) => Ok(*u != 0),
            Scalar::NarrowString(s) => match s.as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ConversionError::NotNumeric),
            },
            Scalar::Empty => Err(ConversionError::Empty),
            _ => Err(ConversionError::NotNumeric),
        }
    }
}

impl ToSi for bool {
    fn to_si(self) -> Scalar {
        Scalar::Bool(self)
    }
}

impl FromSi for String {
    fn from_si(v: &Scalar) -> Result<Self, ConversionError> {
        match v {
            Scalar::NarrowString(s) => Ok(s.clone()),
            Scalar::WideString(w) => Ok(w.iter().collect()),
            Scalar::Signed(i) => Ok(i.to_string()),
            Scalar::Unsigned(u) => Ok(u.to_string()),
            Scalar::Float(f) => Ok(f.to_string()),
            Scalar::Bool(b) => Ok(b.to_string()),
            Scalar::Empty => Err(ConversionError::Empty),
        }
    }
}

impl ToSi for String {
    fn to_si(self) -> Scalar {
        Scalar::NarrowString(self)
    }
}

impl ToSi for &str {
    fn to_si(self) -> Scalar {
        Scalar::NarrowString(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_to_unsigned_range_check() {
        let v = Scalar::Signed(-1);
        assert_eq!(u32::from_si(&v), Err(ConversionError::OutOfRange));
    }

    #[test]
    fn string_to_int_roundtrip() {
        let v = Scalar::NarrowString("42".to_string());
        assert_eq!(i64::from_si(&v).unwrap(), 42);
    }

    #[test]
    fn empty_has_no_conversion() {
        assert_eq!(i64::from_si(&Scalar::Empty), Err(ConversionError::Empty));
    }
}
