//! Named, typed custom parameters and their wire encoding.
//!
//! A parameter is encoded as `key` (length-prefixed string), a one byte
//! [`TypeTag`] and a payload. Scalars carry a single value; arrays carry a
//! length-delimited element count followed by that many values.

use bytes::Bytes;
use once_cell::sync::OnceCell;

use crate::buffer::ByteBuffer;
use crate::layout::{EncodeType, TypeTag, ValueType, MAX_ARRAY_SIZE, MAX_BLOCK_SIZE};
use crate::reader::RawReader;
use crate::types::{DecodeError, EncodeError};

/// How a parameter payload is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCodedType {
    UnsignedVarint,
    UnsignedVarintArray,
    SignedVarint,
    SignedVarintArray,
    Floating,
    FloatingArray,
    String,
    StringArray,
}

impl DataCodedType {
    /// Maps a decoded type tag onto its payload layout.
    pub fn from_tag(tag: TypeTag) -> Result<Self, DecodeError> {
        use DataCodedType::*;
        let coded = match (tag.value_type, tag.is_array) {
            (ValueType::Unknown, _) => {
                return Err(DecodeError::UnknownValueType(ValueType::Unknown as u8))
            }
            (ValueType::Bool, false)
            | (ValueType::Int8, false)
            | (ValueType::Int16, false)
            | (ValueType::Int32, false)
            | (ValueType::Int64, false) => SignedVarint,
            (ValueType::Bool, true)
            | (ValueType::Int8, true)
            | (ValueType::Int16, true)
            | (ValueType::Int32, true)
            | (ValueType::Int64, true) => SignedVarintArray,
            (ValueType::UInt8, false)
            | (ValueType::UInt16, false)
            | (ValueType::UInt32, false)
            | (ValueType::UInt64, false) => UnsignedVarint,
            (ValueType::UInt8, true)
            | (ValueType::UInt16, true)
            | (ValueType::UInt32, true)
            | (ValueType::UInt64, true) => UnsignedVarintArray,
            (ValueType::Float, false) | (ValueType::Double, false) => Floating,
            (ValueType::Float, true) | (ValueType::Double, true) => FloatingArray,
            (ValueType::String, false) => String,
            (ValueType::String, true) => StringArray,
        };
        Ok(coded)
    }
}

/// The value of a custom parameter.
///
/// Single precision values keep their width when encoded; decoding always
/// yields [`ParamValue::Double`] or [`ParamValue::DoubleArray`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    Double(f64),
    String(String),
    UnsignedArray(Vec<u64>),
    SignedArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl ParamValue {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ParamValue::UnsignedArray(_)
                | ParamValue::SignedArray(_)
                | ParamValue::FloatArray(_)
                | ParamValue::DoubleArray(_)
                | ParamValue::StringArray(_)
        )
    }

    pub fn coded_type(&self) -> DataCodedType {
        match self {
            ParamValue::Unsigned(_) => DataCodedType::UnsignedVarint,
            ParamValue::Signed(_) => DataCodedType::SignedVarint,
            ParamValue::Float(_) | ParamValue::Double(_) => DataCodedType::Floating,
            ParamValue::String(_) => DataCodedType::String,
            ParamValue::UnsignedArray(_) => DataCodedType::UnsignedVarintArray,
            ParamValue::SignedArray(_) => DataCodedType::SignedVarintArray,
            ParamValue::FloatArray(_) | ParamValue::DoubleArray(_) => DataCodedType::FloatingArray,
            ParamValue::StringArray(_) => DataCodedType::StringArray,
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        let value_type = match self {
            ParamValue::Unsigned(_) | ParamValue::UnsignedArray(_) => ValueType::UInt64,
            ParamValue::Signed(_) | ParamValue::SignedArray(_) => ValueType::Int64,
            ParamValue::Float(_) | ParamValue::FloatArray(_) => ValueType::Float,
            ParamValue::Double(_) | ParamValue::DoubleArray(_) => ValueType::Double,
            ParamValue::String(_) | ParamValue::StringArray(_) => ValueType::String,
        };
        TypeTag::new(self.is_array(), value_type)
    }

    /// Number of elements for arrays, 1 for scalars.
    pub fn len(&self) -> usize {
        match self {
            ParamValue::UnsignedArray(v) => v.len(),
            ParamValue::SignedArray(v) => v.len(),
            ParamValue::FloatArray(v) => v.len(),
            ParamValue::DoubleArray(v) => v.len(),
            ParamValue::StringArray(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn truncate(&mut self, max: usize) {
        match self {
            ParamValue::UnsignedArray(v) => v.truncate(max),
            ParamValue::SignedArray(v) => v.truncate(max),
            ParamValue::FloatArray(v) => v.truncate(max),
            ParamValue::DoubleArray(v) => v.truncate(max),
            ParamValue::StringArray(v) => v.truncate(max),
            _ => {}
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Signed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v as f64),
            ParamValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64_vec(&self) -> Option<Vec<u64>> {
        match self {
            ParamValue::UnsignedArray(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            ParamValue::SignedArray(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::FloatArray(v) => Some(v.iter().map(|f| *f as f64).collect()),
            ParamValue::DoubleArray(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_string_vec(&self) -> Option<Vec<String>> {
        match self {
            ParamValue::StringArray(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn encode_payload(&self, buf: &mut ByteBuffer) {
        match self {
            ParamValue::Unsigned(v) => buf.uvarint(EncodeType::Varint, *v),
            ParamValue::Signed(v) => buf.ivarint(EncodeType::Varint, *v),
            ParamValue::Float(v) => buf.f32(*v),
            ParamValue::Double(v) => buf.f64(*v),
            ParamValue::String(v) => buf.str(v),
            ParamValue::UnsignedArray(vals) => {
                buf.count(vals.len());
                for v in vals {
                    buf.uvarint(EncodeType::Varint, *v);
                }
            }
            ParamValue::SignedArray(vals) => {
                buf.count(vals.len());
                for v in vals {
                    buf.ivarint(EncodeType::Varint, *v);
                }
            }
            ParamValue::FloatArray(vals) => {
                buf.count(vals.len());
                for v in vals {
                    buf.f32(*v);
                }
            }
            ParamValue::DoubleArray(vals) => {
                buf.count(vals.len());
                for v in vals {
                    buf.f64(*v);
                }
            }
            ParamValue::StringArray(vals) => {
                buf.count(vals.len());
                for v in vals {
                    buf.str(v);
                }
            }
        }
    }

    fn decode_payload(coded: DataCodedType, r: &mut RawReader<'_>) -> Result<Self, DecodeError> {
        let value = match coded {
            DataCodedType::UnsignedVarint => ParamValue::Unsigned(r.uvarint()?),
            DataCodedType::SignedVarint => ParamValue::Signed(r.varint()?),
            DataCodedType::Floating => ParamValue::Double(r.floating()?),
            DataCodedType::String => ParamValue::String(r.string()?),
            DataCodedType::UnsignedVarintArray => {
                ParamValue::UnsignedArray(decode_array(r, RawReader::uvarint)?)
            }
            DataCodedType::SignedVarintArray => {
                ParamValue::SignedArray(decode_array(r, RawReader::varint)?)
            }
            DataCodedType::FloatingArray => {
                ParamValue::DoubleArray(decode_array(r, RawReader::floating)?)
            }
            DataCodedType::StringArray => {
                ParamValue::StringArray(decode_array(r, RawReader::string)?)
            }
        };
        Ok(value)
    }
}

fn decode_array<'a, T>(
    r: &mut RawReader<'a>,
    mut read: impl FnMut(&mut RawReader<'a>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = r.uvarint()?;
    // Each element takes at least one byte.
    if count > r.remaining() as u64 {
        return Err(DecodeError::UnexpectedEof(r.position()));
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read(r)?);
    }
    Ok(out)
}

macro_rules! from_array {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(
            impl From<Vec<$t>> for ParamValue {
                fn from(v: Vec<$t>) -> Self {
                    ParamValue::$variant(v.into_iter().map(|x| x as $target).collect())
                }
            }
        )*
    };
}

macro_rules! from_value {
    ($scalar:ident, $array:ident, $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for ParamValue {
                fn from(v: $t) -> Self {
                    ParamValue::$scalar(v as $target)
                }
            }
        )*
        from_array!($array, $target: $($t),*);
    };
}

from_value!(Unsigned, UnsignedArray, u64: u8, u16, u32, u64);
from_value!(Signed, SignedArray, i64: i8, i16, i32, i64);

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Signed(v as i64)
    }
}

impl From<Vec<bool>> for ParamValue {
    fn from(v: Vec<bool>) -> Self {
        ParamValue::SignedArray(v.into_iter().map(|b| b as i64).collect())
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        ParamValue::FloatArray(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::DoubleArray(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::StringArray(v)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::StringArray(v.into_iter().map(str::to_owned).collect())
    }
}

/// A custom parameter: key, value and its cached wire encoding.
#[derive(Debug, Clone)]
pub struct Param {
    key: String,
    value: ParamValue,
    value_type: ValueType,
    encoded: OnceCell<Bytes>,
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl Param {
    /// Creates a parameter. Arrays longer than [`MAX_ARRAY_SIZE`] are cut.
    pub fn new(key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let mut value = value.into();
        value.truncate(MAX_ARRAY_SIZE);
        Self {
            key: key.into(),
            value_type: value.type_tag().value_type,
            value,
            encoded: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn into_value(self) -> ParamValue {
        self.value
    }

    pub fn coded_type(&self) -> DataCodedType {
        self.value.coded_type()
    }

    /// Value type as written on the wire. A decoded single precision value
    /// reports [`ValueType::Float`] even though it is held as a double.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value.as_u64()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_u64_vec(&self) -> Option<Vec<u64>> {
        self.value.as_u64_vec()
    }

    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        self.value.as_i64_vec()
    }

    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        self.value.as_f64_vec()
    }

    pub fn as_string_vec(&self) -> Option<Vec<String>> {
        self.value.as_string_vec()
    }

    /// Returns the wire encoding, computing it on first use.
    pub fn encode(&self) -> Result<&[u8], EncodeError> {
        let bytes = self.encoded.get_or_try_init(|| {
            let mut buf = ByteBuffer::with_capacity(self.key.len() + 16);
            buf.str(&self.key);
            buf.type_tag(self.value.type_tag());
            self.value.encode_payload(&mut buf);
            if buf.len() > MAX_BLOCK_SIZE {
                return Err(EncodeError::ParamTooLarge {
                    key: self.key.clone(),
                    size: buf.len(),
                });
            }
            Ok(buf.freeze())
        })?;
        Ok(bytes)
    }

    /// Decodes one parameter at the reader's position.
    pub(crate) fn decode(r: &mut RawReader<'_>) -> Result<Self, DecodeError> {
        let start = r.position();
        let key = r.string()?;
        let tag = r.type_tag()?;
        let value = ParamValue::decode_payload(DataCodedType::from_tag(tag)?, r)?;
        let encoded = OnceCell::new();
        let _ = encoded.set(Bytes::copy_from_slice(r.since(start)));
        Ok(Self {
            key,
            value,
            value_type: tag.value_type,
            encoded,
        })
    }
}

/// Conversion out of a [`ParamValue`], used by typed lookups.
pub trait FromParamValue: Sized {
    fn from_param_value(value: &ParamValue) -> Option<Self>;
}

impl FromParamValue for ParamValue {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromParamValue for u64 {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_u64()
    }
}

impl FromParamValue for i64 {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_i64()
    }
}

macro_rules! narrow_from_param {
    ($via:ident: $($t:ty),*) => {
        $(
            impl FromParamValue for $t {
                fn from_param_value(value: &ParamValue) -> Option<Self> {
                    value.$via().and_then(|v| <$t>::try_from(v).ok())
                }
            }
        )*
    };
}

narrow_from_param!(as_u64: u32, u16, u8);
narrow_from_param!(as_i64: i32, i16, i8);

impl FromParamValue for f64 {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromParamValue for String {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromParamValue for Vec<u64> {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_u64_vec()
    }
}

impl FromParamValue for Vec<i64> {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_i64_vec()
    }
}

impl FromParamValue for Vec<f64> {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_f64_vec()
    }
}

impl FromParamValue for Vec<String> {
    fn from_param_value(value: &ParamValue) -> Option<Self> {
        value.as_string_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TYPE_TAG_SIZE;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn roundtrip(p: &Param) -> Param {
        let bytes = p.encode().unwrap().to_vec();
        let mut r = RawReader::new(&bytes);
        let decoded = Param::decode(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        decoded
    }

    #[test]
    fn test_accessor_contract() {
        let cases: Vec<ParamValue> = vec![
            7u32.into(),
            (-7i32).into(),
            1.5f32.into(),
            2.5f64.into(),
            "x".into(),
            vec![1u64, 2].into(),
            vec![-1i64].into(),
            vec![0.5f64].into(),
            vec!["a", "b"].into(),
        ];
        for value in cases {
            let hits = [
                value.as_u64().is_some(),
                value.as_i64().is_some(),
                value.as_f64().is_some(),
                value.as_str().is_some(),
                value.as_u64_vec().is_some(),
                value.as_i64_vec().is_some(),
                value.as_f64_vec().is_some(),
                value.as_string_vec().is_some(),
            ];
            assert_eq!(hits.iter().filter(|h| **h).count(), 1, "{:?}", value);
        }
    }

    #[test]
    fn test_bool_is_signed() {
        assert_eq!(ParamValue::from(true), ParamValue::Signed(1));
        assert_eq!(
            ParamValue::from(vec![true, false]),
            ParamValue::SignedArray(vec![1, 0])
        );
    }

    #[test]
    fn test_array_truncated() {
        let vals: Vec<u64> = (0..150).collect();
        let p = Param::new("ARR", vals);
        assert_eq!(p.value().len(), MAX_ARRAY_SIZE);
        let back = roundtrip(&p);
        assert_eq!(back.as_u64_vec().unwrap(), (0..100).collect::<Vec<u64>>());
    }

    #[test]
    fn test_encoded_layout() {
        let p = Param::new("K", 5u64);
        assert_eq!(
            p.encode().unwrap(),
            &[0x41, b'K', (ValueType::UInt64 as u8) << 1, 0x05]
        );

        let p = Param::new("K", vec![-1i64]);
        assert_eq!(
            p.encode().unwrap(),
            &[0x41, b'K', (ValueType::Int64 as u8) << 1 | 1, 0x41, 0x01]
        );

        // Key, then exactly one tag byte, then the payload.
        let mut r = RawReader::new(p.encode().unwrap());
        r.string().unwrap();
        let tag_pos = r.position();
        assert_eq!(r.type_tag().unwrap(), p.value().type_tag());
        assert_eq!(r.position() - tag_pos, TYPE_TAG_SIZE);
    }

    #[test]
    fn test_encode_is_cached() {
        let p = Param::new("KEY", "value");
        let first = p.encode().unwrap().as_ptr();
        let second = p.encode().unwrap().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_float_promoted_on_decode() {
        let back = roundtrip(&Param::new("F", 1.25f32));
        assert_eq!(back.value_type(), ValueType::Float);
        assert_eq!(back.coded_type(), DataCodedType::Floating);
        assert_eq!(back.into_value(), ParamValue::Double(1.25));

        let back = roundtrip(&Param::new("FA", vec![0.5f32, -2.0]));
        assert_eq!(back.value_type(), ValueType::Float);
        assert_eq!(back.coded_type(), DataCodedType::FloatingArray);
        assert_eq!(back.into_value(), ParamValue::DoubleArray(vec![0.5, -2.0]));

        let back = roundtrip(&Param::new("D", 1.25f64));
        assert_eq!(back.value_type(), ValueType::Double);
    }

    #[test]
    fn test_boundaries() {
        let values: Vec<ParamValue> = vec![
            0u64.into(),
            u64::MAX.into(),
            i64::MIN.into(),
            i64::MAX.into(),
            0.0f64.into(),
            (-0.0f64).into(),
            "".into(),
            Vec::<u64>::new().into(),
            Vec::<String>::new().into(),
        ];
        for value in values {
            let p = Param::new("B", value.clone());
            assert_eq!(roundtrip(&p).value(), &value);
        }
    }

    #[test]
    fn test_decoded_keeps_bytes() {
        let p = Param::new("S", vec!["x", "yz"]);
        let bytes = p.encode().unwrap().to_vec();
        let back = roundtrip(&p);
        assert_eq!(back.encode().unwrap(), bytes.as_slice());
    }

    #[test]
    fn test_decode_errors() {
        // Unknown value type.
        let mut r = RawReader::new(&[0x41, b'K', 0]);
        assert_matches!(Param::decode(&mut r), Err(DecodeError::UnknownValueType(0)));

        // Array claims more elements than bytes remain.
        let tag = (ValueType::UInt64 as u8) << 1 | 1;
        let binding = [0x41, b'K', tag, 0x45, 0x01];
        let mut r = RawReader::new(&binding);
        assert_matches!(Param::decode(&mut r), Err(DecodeError::UnexpectedEof(4)));

        // Missing payload.
        let mut r = RawReader::new(&[0x41, b'K', (ValueType::String as u8) << 1]);
        assert_matches!(Param::decode(&mut r), Err(DecodeError::UnexpectedEof(3)));
    }

    #[test]
    fn test_param_too_large() {
        let big = "x".repeat(MAX_BLOCK_SIZE);
        let p = Param::new("BIG", big);
        assert_matches!(p.encode(), Err(EncodeError::ParamTooLarge { ref key, .. }) if key == "BIG");
    }

    #[test]
    fn test_narrowing_lookups() {
        let v = ParamValue::Unsigned(300);
        assert_eq!(u16::from_param_value(&v), Some(300));
        assert_eq!(u8::from_param_value(&v), None);
        assert_eq!(i64::from_param_value(&v), None);
        let v = ParamValue::Signed(-5);
        assert_eq!(i32::from_param_value(&v), Some(-5));
        assert_eq!(String::from_param_value(&v), None);
    }

    proptest! {
        #[test]
        fn signed_roundtrip(v: i64) {
            let back = roundtrip(&Param::new("I", v));
            prop_assert_eq!(back.as_i64(), Some(v));
        }

        #[test]
        fn double_array_roundtrip(vals in proptest::collection::vec(any::<f64>().prop_filter("nan", |f| !f.is_nan()), 0..20)) {
            let back = roundtrip(&Param::new("D", vals.clone()));
            prop_assert_eq!(back.as_f64_vec(), Some(vals));
        }

        #[test]
        fn string_roundtrip(key in "[A-Z_]{1,12}", s in ".*") {
            let back = roundtrip(&Param::new(key.clone(), s.clone()));
            prop_assert_eq!(back.key(), key.as_str());
            prop_assert_eq!(back.as_str(), Some(s.as_str()));
        }
    }
}
