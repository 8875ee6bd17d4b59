//!
//! Typed values carried by message properties, map bodies and stream bodies.
//!
//! Values convert between types following the messaging conversion table: integers widen,
//! `f32` widens to `f64`, strings parse into primitives and every value except a byte array
//! renders as a string. Any other conversion fails with `MessageFormat`.
//!
use crate::error::JmsError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    /// Only allowed in map and stream bodies.
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Only allowed in map and stream bodies.
    Bytes(Vec<u8>),
}

fn parse<T: FromStr>(s: &str, target: &str) -> Result<T, JmsError> {
    s.trim()
        .parse::<T>()
        .map_err(|_e| JmsError::message_format(format!("`{}` is not a valid {}", s, target)))
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Byte(_) => "byte",
            PropertyValue::Short(_) => "short",
            PropertyValue::Char(_) => "char",
            PropertyValue::Int(_) => "int",
            PropertyValue::Long(_) => "long",
            PropertyValue::Float(_) => "float",
            PropertyValue::Double(_) => "double",
            PropertyValue::String(_) => "string",
            PropertyValue::Bytes(_) => "byte array",
        }
    }

    fn mismatch(&self, target: &str) -> JmsError {
        JmsError::message_format(format!(
            "Cannot read a {} value as {}",
            self.type_name(),
            target
        ))
    }

    /// Strings convert case-insensitively: `"true"` is true, anything else false.
    pub fn to_bool(&self) -> Result<bool, JmsError> {
        match self {
            PropertyValue::Bool(v) => Ok(*v),
            PropertyValue::String(s) => Ok(s.trim().eq_ignore_ascii_case("true")),
            other => Err(other.mismatch("boolean")),
        }
    }

    pub fn to_byte(&self) -> Result<i8, JmsError> {
        match self {
            PropertyValue::Byte(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "byte"),
            other => Err(other.mismatch("byte")),
        }
    }

    pub fn to_short(&self) -> Result<i16, JmsError> {
        match self {
            PropertyValue::Byte(v) => Ok(i16::from(*v)),
            PropertyValue::Short(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "short"),
            other => Err(other.mismatch("short")),
        }
    }

    pub fn to_char(&self) -> Result<char, JmsError> {
        match self {
            PropertyValue::Char(v) => Ok(*v),
            other => Err(other.mismatch("char")),
        }
    }

    pub fn to_int(&self) -> Result<i32, JmsError> {
        match self {
            PropertyValue::Byte(v) => Ok(i32::from(*v)),
            PropertyValue::Short(v) => Ok(i32::from(*v)),
            PropertyValue::Int(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "int"),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn to_long(&self) -> Result<i64, JmsError> {
        match self {
            PropertyValue::Byte(v) => Ok(i64::from(*v)),
            PropertyValue::Short(v) => Ok(i64::from(*v)),
            PropertyValue::Int(v) => Ok(i64::from(*v)),
            PropertyValue::Long(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "long"),
            other => Err(other.mismatch("long")),
        }
    }

    pub fn to_float(&self) -> Result<f32, JmsError> {
        match self {
            PropertyValue::Float(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "float"),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn to_double(&self) -> Result<f64, JmsError> {
        match self {
            PropertyValue::Float(v) => Ok(f64::from(*v)),
            PropertyValue::Double(v) => Ok(*v),
            PropertyValue::String(s) => parse(s, "double"),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn to_text(&self) -> Result<String, JmsError> {
        match self {
            PropertyValue::Bytes(_) => Err(self.mismatch("string")),
            other => Ok(other.to_string()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, JmsError> {
        match self {
            PropertyValue::Bytes(v) => Ok(v.clone()),
            other => Err(other.mismatch("byte array")),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Byte(v) => write!(f, "{}", v),
            PropertyValue::Short(v) => write!(f, "{}", v),
            PropertyValue::Char(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Long(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{:?}", v),
            PropertyValue::Double(v) => write!(f, "{:?}", v),
            PropertyValue::String(v) => f.write_str(v),
            PropertyValue::Bytes(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! from_impl {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(v: $ty) -> Self {
                    PropertyValue::$variant(v)
                }
            }
        )+
    };
}

from_impl!(
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    char => Char,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
);

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_owned())
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(v: &[u8]) -> Self {
        PropertyValue::Bytes(v.to_vec())
    }
}

const RESERVED: [&str; 11] = [
    "NULL", "TRUE", "FALSE", "NOT", "AND", "OR", "BETWEEN", "LIKE", "IN", "IS", "ESCAPE",
];

/// Property names follow the identifier rules of message selectors.
pub fn check_property_name(name: &str) -> Result<(), JmsError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_' || first == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
        None => false,
    };
    if !valid {
        return Err(JmsError::generic(format!(
            "`{}` is not a valid property name",
            name
        )));
    }
    if RESERVED.iter().any(|word| word.eq_ignore_ascii_case(name)) {
        return Err(JmsError::generic(format!(
            "`{}` is a reserved word and cannot name a property",
            name
        )));
    }
    Ok(())
}

/// Message properties: application defined, provider specific and `JMSX` prefixed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: HashMap<String, PropertyValue>,
    read_only: bool,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), JmsError> {
        if self.read_only {
            return Err(JmsError::message_not_writeable(format!(
                "Properties are read-only, cannot set `{}`",
                name
            )));
        }
        check_property_name(name)?;
        let value = value.into();
        if matches!(value, PropertyValue::Char(_) | PropertyValue::Bytes(_)) {
            return Err(JmsError::message_format(format!(
                "A {} value cannot be used as a property",
                value.type_name()
            )));
        }
        self.values.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove all properties and make them writeable again.
    pub fn clear(&mut self) {
        self.values.clear();
        self.read_only = false;
    }

    fn typed<T>(
        &self,
        name: &str,
        convert: impl FnOnce(&PropertyValue) -> Result<T, JmsError>,
    ) -> Result<Option<T>, JmsError> {
        self.values.get(name).map(convert).transpose()
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, JmsError> {
        self.typed(name, PropertyValue::to_bool)
    }

    pub fn get_byte(&self, name: &str) -> Result<Option<i8>, JmsError> {
        self.typed(name, PropertyValue::to_byte)
    }

    pub fn get_short(&self, name: &str) -> Result<Option<i16>, JmsError> {
        self.typed(name, PropertyValue::to_short)
    }

    pub fn get_int(&self, name: &str) -> Result<Option<i32>, JmsError> {
        self.typed(name, PropertyValue::to_int)
    }

    pub fn get_long(&self, name: &str) -> Result<Option<i64>, JmsError> {
        self.typed(name, PropertyValue::to_long)
    }

    pub fn get_float(&self, name: &str) -> Result<Option<f32>, JmsError> {
        self.typed(name, PropertyValue::to_float)
    }

    pub fn get_double(&self, name: &str) -> Result<Option<f64>, JmsError> {
        self.typed(name, PropertyValue::to_double)
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>, JmsError> {
        self.typed(name, PropertyValue::to_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case(PropertyValue::Byte(7), 7)]
    #[case(PropertyValue::Short(300), 300)]
    #[case(PropertyValue::Int(-12), -12)]
    #[case(PropertyValue::Long(1 << 40), 1 << 40)]
    #[case(PropertyValue::String(" 42 ".to_owned()), 42)]
    fn test_widening_to_long(#[case] value: PropertyValue, #[case] expected: i64) {
        assert_eq!(value.to_long().ok(), Some(expected));
    }

    #[rstest]
    #[case(PropertyValue::Long(1))]
    #[case(PropertyValue::Float(1.0))]
    #[case(PropertyValue::Bool(true))]
    #[case(PropertyValue::Char('a'))]
    #[case(PropertyValue::Bytes(vec![1]))]
    fn test_narrowing_to_int_rejected(#[case] value: PropertyValue) {
        assert_matches!(value.to_int(), Err(e) if e.kind() == ErrorKind::MessageFormat);
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(PropertyValue::from("TRUE").to_bool().ok(), Some(true));
        assert_eq!(PropertyValue::from("yes").to_bool().ok(), Some(false));
        assert_eq!(PropertyValue::from("2.5").to_double().ok(), Some(2.5));
        assert_matches!(PropertyValue::from("abc").to_int(), Err(e) if e.kind() == ErrorKind::MessageFormat);
        assert_matches!(PropertyValue::from("300").to_byte(), Err(e) if e.kind() == ErrorKind::MessageFormat);
        assert_eq!(PropertyValue::Float(1.5).to_double().ok(), Some(1.5));
        assert_eq!(PropertyValue::Int(5).to_text().ok().as_deref(), Some("5"));
        assert_eq!(PropertyValue::Char('x').to_text().ok().as_deref(), Some("x"));
        assert!(PropertyValue::Bytes(vec![1, 2]).to_text().is_err());
    }

    #[rstest]
    #[case("price", true)]
    #[case("_private", true)]
    #[case("$cost2", true)]
    #[case("JMSXGroupID", true)]
    #[case("", false)]
    #[case("2fast", false)]
    #[case("has space", false)]
    #[case("a-b", false)]
    #[case("null", false)]
    #[case("BETWEEN", false)]
    #[case("Escape", false)]
    fn test_property_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(check_property_name(name).is_ok(), valid);
    }

    #[test]
    fn test_properties_typed_access() -> Result<(), Box<dyn std::error::Error>> {
        let mut props = Properties::new();
        props.set("count", 3i32)?;
        props.set("region", "emea")?;
        props.set("urgent", true)?;

        assert_eq!(props.get_long("count")?, Some(3));
        assert_eq!(props.get_string("count")?.as_deref(), Some("3"));
        assert_eq!(props.get_bool("urgent")?, Some(true));
        assert_eq!(props.get_int("missing")?, None);
        assert!(props.get_int("region").is_err());
        assert!(props.exists("region"));
        assert_eq!(props.len(), 3);
        Ok(())
    }

    #[test]
    fn test_properties_reject_body_only_types() {
        let mut props = Properties::new();
        assert_matches!(props.set("c", 'c'), Err(e) if e.kind() == ErrorKind::MessageFormat);
        assert_matches!(props.set("b", vec![1u8]), Err(e) if e.kind() == ErrorKind::MessageFormat);
    }

    #[test]
    fn test_read_only_properties() -> Result<(), Box<dyn std::error::Error>> {
        let mut props = Properties::new();
        props.set("a", 1i32)?;
        props.set_read_only(true);
        assert_matches!(props.set("b", 2i32), Err(e) if e.kind() == ErrorKind::MessageNotWriteable);
        assert_eq!(props.get_int("a")?, Some(1));

        props.clear();
        assert!(props.is_empty());
        props.set("b", 2i32)?;
        Ok(())
    }
}
