//! Dynamic values carried by procedure arguments, returns and streams.

use krpc_fabric::schema;

use crate::error::EncodingError;
use crate::remote::{RemoteEnum, RemoteObject};

/// A value of any type a descriptor can describe.
///
/// Sets and dictionaries keep their elements in a `Vec` because floats and
/// messages have no total order or hash; comparison ignores element order.
#[derive(Debug, Clone)]
pub enum Value {
    Double(f64),
    Float(f32),
    SInt32(i32),
    SInt64(i64),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// `None` is the null object
    Object(Option<RemoteObject>),
    Enum(RemoteEnum),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(Value, Value)>),
    Event(schema::Event),
    ProcedureCall(schema::ProcedureCall),
    Stream(schema::Stream),
    Status(schema::Status),
    Services(schema::Services),
}

impl Value {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Float(_) => "float",
            Self::SInt32(_) => "sint32",
            Self::SInt64(_) => "sint64",
            Self::UInt32(_) => "uint32",
            Self::UInt64(_) => "uint64",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::Enum(_) => "enumeration",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Dictionary(_) => "dictionary",
            Self::Event(_) => "event",
            Self::ProcedureCall(_) => "procedure call",
            Self::Stream(_) => "stream",
            Self::Status(_) => "status",
            Self::Services(_) => "services",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SInt32(v) => Some(i64::from(*v)),
            Self::SInt64(v) => Some(*v),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&RemoteObject> {
        match self {
            Self::Object(obj) => obj.as_ref(),
            _ => None,
        }
    }
}

fn same_elements<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut matched = vec![false; b.len()];
    a.iter().all(|x| {
        let found = b
            .iter()
            .enumerate()
            .position(|(i, y)| !matched[i] && eq(x, y));
        match found {
            Some(i) => {
                matched[i] = true;
                true
            }
            None => false,
        }
    })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::SInt32(a), Self::SInt32(b)) => a == b,
            (Self::SInt64(a), Self::SInt64(b)) => a == b,
            (Self::UInt32(a), Self::UInt32(b)) => a == b,
            (Self::UInt64(a), Self::UInt64(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) | (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => same_elements(a, b, |x, y| x == y),
            (Self::Dictionary(a), Self::Dictionary(b)) => {
                same_elements(a, b, |x, y| x.0 == y.0 && x.1 == y.1)
            }
            (Self::Event(a), Self::Event(b)) => a == b,
            (Self::ProcedureCall(a), Self::ProcedureCall(b)) => a == b,
            (Self::Stream(a), Self::Stream(b)) => a == b,
            (Self::Status(a), Self::Status(b)) => a == b,
            (Self::Services(a), Self::Services(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    f64 => Double,
    f32 => Float,
    i32 => SInt32,
    i64 => SInt64,
    u32 => UInt32,
    u64 => UInt64,
    bool => Bool,
    String => String,
    Vec<u8> => Bytes,
    RemoteEnum => Enum,
    schema::ProcedureCall => ProcedureCall,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<RemoteObject> for Value {
    fn from(v: RemoteObject) -> Self {
        Self::Object(Some(v))
    }
}

impl From<Option<RemoteObject>> for Value {
    fn from(v: Option<RemoteObject>) -> Self {
        Self::Object(v)
    }
}

/// Conversion from a decoded value into the type a stub or stream expects
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, EncodingError>;
}

fn mismatch(expected: &str, value: &Value) -> EncodingError {
    EncodingError::TypeMismatch {
        expected: expected.to_string(),
        actual: value.kind(),
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, EncodingError> {
        Ok(value)
    }
}

macro_rules! from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, EncodingError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(stringify!($ty), &other)),
                    }
                }
            }
        )*
    };
}

from_value! {
    f64 => Double,
    f32 => Float,
    i32 => SInt32,
    i64 => SInt64,
    u32 => UInt32,
    u64 => UInt64,
    bool => Bool,
    String => String,
    Vec<u8> => Bytes,
    Option<RemoteObject> => Object,
    RemoteEnum => Enum,
    schema::Event => Event,
    schema::ProcedureCall => ProcedureCall,
    schema::Stream => Stream,
    schema::Status => Status,
    schema::Services => Services,
}
