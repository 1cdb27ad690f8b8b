//! The dynamically typed values carried by RPC calls and results.
//!
//! RPC arguments cross the wire as [`Value`]s. Plain data maps onto the
//! JSON-like variants; richer domain types travel as an
//! [`Value::Extension`] whose `tag` names a registered [`ValueCodec`].
//! Any serde type can be moved in and out of a [`Value`] with
//! [`Value::serialize_from`] and [`Value::deserialize_into`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_bytes::ByteBuf;

use crate::{Cid, CodecError, DialTarget, Multiaddr, PeerId};

/// A dynamically typed RPC value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// No value
    #[default]
    Null,
    /// A boolean
    Bool(bool),
    /// A signed integer
    Int(i64),
    /// A finite floating point number. Infinities and NaN fail
    /// [`ValueCodecs::validate`] and cannot be put on the wire.
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// An ordered list
    List(Vec<Value>),
    /// A map with text keys
    Map(BTreeMap<String, Value>),
    /// A domain type encoded by the [`ValueCodec`] registered under `tag`
    Extension {
        /// Name of the codec
        tag: String,
        /// Codec specific encoding
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Extension { .. } => "extension",
        }
    }

    /// Encode a domain value as an extension.
    pub fn extension<T: ValueCodec>(value: &T) -> Self {
        Self::Extension {
            tag: T::TAG.to_string(),
            data: value.encode(),
        }
    }

    /// Decode an extension carrying `T`.
    pub fn decode<T: ValueCodec>(&self) -> Result<T, CodecError> {
        match self {
            Self::Extension { tag, data } if tag == T::TAG => T::decode(data),
            other => Err(CodecError::UnexpectedKind {
                expected: T::TAG,
                actual: other.kind(),
            }),
        }
    }

    fn finite(value: f64) -> Result<Self, CodecError> {
        if value.is_finite() {
            Ok(Self::Float(value))
        } else {
            Err(CodecError::NonFinite(value.to_string()))
        }
    }

    /// Convert any serializable type into a [`Value`].
    ///
    /// Structs and maps become [`Value::Map`]; domain identifiers inside
    /// them keep their text form.
    pub fn serialize_from<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        let value =
            serde_value::to_value(value).map_err(|error| CodecError::Serialize(error.to_string()))?;
        Self::try_from(value)
    }

    /// Convert this value into any deserializable type.
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T, CodecError> {
        serde_value::Value::from(self)
            .deserialize_into()
            .map_err(|error| CodecError::Deserialize(error.to_string()))
    }
}

impl TryFrom<serde_value::Value> for Value {
    type Error = CodecError;

    fn try_from(value: serde_value::Value) -> Result<Self, Self::Error> {
        use serde_value::Value as Serde;

        Ok(match value {
            Serde::Bool(value) => Self::Bool(value),
            Serde::U8(value) => Self::Int(value.into()),
            Serde::U16(value) => Self::Int(value.into()),
            Serde::U32(value) => Self::Int(value.into()),
            Serde::U64(value) => Self::Int(
                i64::try_from(value).map_err(|_| CodecError::OutOfRange(value.to_string()))?,
            ),
            Serde::I8(value) => Self::Int(value.into()),
            Serde::I16(value) => Self::Int(value.into()),
            Serde::I32(value) => Self::Int(value.into()),
            Serde::I64(value) => Self::Int(value),
            Serde::F32(value) => Self::finite(value.into())?,
            Serde::F64(value) => Self::finite(value)?,
            Serde::Char(value) => Self::Text(value.to_string()),
            Serde::String(value) => Self::Text(value),
            Serde::Unit | Serde::Option(None) => Self::Null,
            Serde::Option(Some(value)) | Serde::Newtype(value) => Self::try_from(*value)?,
            Serde::Seq(values) => Self::List(
                values
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Serde::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match key {
                        Serde::String(key) => key,
                        Serde::Char(key) => key.to_string(),
                        other => {
                            return Err(CodecError::Serialize(format!(
                                "map keys must be text, got {other:?}"
                            )));
                        }
                    };
                    map.insert(key, Self::try_from(value)?);
                }
                Self::Map(map)
            }
            Serde::Bytes(bytes) => Self::Bytes(bytes),
        })
    }
}

impl From<Value> for serde_value::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Unit,
            Value::Bool(value) => Self::Bool(value),
            Value::Int(value) => Self::I64(value),
            Value::Float(value) => Self::F64(value),
            Value::Text(value) => Self::String(value),
            Value::Bytes(bytes) | Value::Extension { data: bytes, .. } => Self::Bytes(bytes),
            Value::List(values) => Self::Seq(values.into_iter().map(Self::from).collect()),
            Value::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (Self::String(key), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

/// A domain type that travels as a tagged binary [`Value::Extension`].
pub trait ValueCodec: Sized {
    /// Name of the extension on the wire
    const TAG: &'static str;

    /// Encode into extension bytes.
    fn encode(&self) -> Vec<u8>;

    /// Decode and validate extension bytes.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

type Validator = fn(&[u8]) -> Result<(), CodecError>;

fn validate_as<T: ValueCodec>(bytes: &[u8]) -> Result<(), CodecError> {
    T::decode(bytes).map(|_| ())
}

/// The set of extension tags a session accepts on inbound values.
#[derive(Clone, Debug)]
pub struct ValueCodecs {
    validators: BTreeMap<&'static str, Validator>,
}

impl ValueCodecs {
    /// A registry that accepts no extensions.
    pub fn empty() -> Self {
        Self {
            validators: BTreeMap::new(),
        }
    }

    /// Accept extensions tagged `T::TAG`, validated by `T::decode`.
    pub fn register<T: ValueCodec>(&mut self) -> &mut Self {
        self.validators.insert(T::TAG, validate_as::<T>);
        self
    }

    /// Whether `tag` is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.validators.contains_key(tag)
    }

    /// Check every extension and float nested anywhere inside `value`.
    pub fn validate(&self, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Float(value) => Value::finite(*value).map(|_| ()),
            Value::Extension { tag, data } => match self.validators.get(tag.as_str()) {
                Some(validate) => validate(data),
                None => Err(CodecError::UnknownExtension(tag.clone())),
            },
            Value::List(values) => values.iter().try_for_each(|value| self.validate(value)),
            Value::Map(entries) => entries.values().try_for_each(|value| self.validate(value)),
            _ => Ok(()),
        }
    }
}

impl Default for ValueCodecs {
    fn default() -> Self {
        let mut codecs = Self::empty();
        codecs
            .register::<PeerId>()
            .register::<Multiaddr>()
            .register::<Cid>();
        codecs
    }
}

/// Conversion into an RPC [`Value`].
pub trait IntoValue {
    /// Perform the conversion.
    fn into_value(self) -> Value;
}

/// Conversion out of an RPC [`Value`].
pub trait FromValue: Sized {
    /// Perform the conversion.
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

fn unexpected(expected: &'static str, value: &Value) -> CodecError {
    CodecError::UnexpectedKind {
        expected,
        actual: value.kind(),
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(value)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Null => Ok(()),
            other => Err(unexpected("null", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Bool(value) => Ok(value),
            other => Err(unexpected("bool", &other)),
        }
    }
}

macro_rules! integer {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Int(self.into())
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, CodecError> {
                    match value {
                        Value::Int(value) => <$ty>::try_from(value)
                            .map_err(|_| CodecError::OutOfRange(value.to_string())),
                        other => Err(unexpected("int", &other)),
                    }
                }
            }
        )*
    };
}

integer!(i64, i32, u32, u16, u8);

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Int(value) => {
                u64::try_from(value).map_err(|_| CodecError::OutOfRange(value.to_string()))
            }
            other => Err(unexpected("int", &other)),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Float(value) => Ok(value),
            Value::Int(value) => Ok(value as f64),
            other => Err(unexpected("float", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Text(value) => Ok(value),
            other => Err(unexpected("text", &other)),
        }
    }
}

impl IntoValue for ByteBuf {
    fn into_value(self) -> Value {
        Value::Bytes(self.into_vec())
    }
}

impl FromValue for ByteBuf {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Bytes(bytes) => Ok(ByteBuf::from(bytes)),
            other => Err(unexpected("bytes", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::List(values) => values.into_iter().map(T::from_value).collect(),
            other => Err(unexpected("list", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map(IntoValue::into_value).unwrap_or_default()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Null => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(key, value)| (key, value.into_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| Ok((key, T::from_value(value)?)))
                .collect(),
            other => Err(unexpected("map", &other)),
        }
    }
}

macro_rules! extension {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::extension(&self)
                }
            }

            impl IntoValue for &$ty {
                fn into_value(self) -> Value {
                    Value::extension(self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, CodecError> {
                    match value {
                        // Identifiers nested in structured payloads arrive as text.
                        Value::Text(text) => text.parse(),
                        value => value.decode(),
                    }
                }
            }
        )*
    };
}

extension!(PeerId, Multiaddr, Cid);

impl IntoValue for DialTarget {
    fn into_value(self) -> Value {
        match self {
            DialTarget::Peer(peer) => peer.into_value(),
            DialTarget::Address(address) => address.into_value(),
        }
    }
}

impl FromValue for DialTarget {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match &value {
            Value::Extension { tag, .. } if tag == Multiaddr::TAG => {
                value.decode().map(DialTarget::Address)
            }
            Value::Extension { .. } => value.decode().map(DialTarget::Peer),
            Value::Text(text) => text.parse(),
            other => Err(unexpected("extension", other)),
        }
    }
}
