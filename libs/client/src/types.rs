//! Type descriptors directing how values are laid out on the wire.

use std::fmt;

use krpc_fabric::schema::{self, TypeCode};

use crate::error::EncodingError;

/// Recursive descriptor for an encoded value.
///
/// Generated stubs attach one of these to every argument and return value;
/// the encoder never infers layout from the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Double,
    Float,
    SInt32,
    SInt64,
    UInt32,
    UInt64,
    Bool,
    String,
    Bytes,
    /// Remote object of a service-defined class, passed by id
    Class { service: String, name: String },
    /// Service-defined enumeration, passed by integer code
    Enumeration { service: String, name: String },
    Event,
    ProcedureCall,
    Stream,
    Status,
    Services,
    Tuple(Vec<Type>),
    List(Box<Type>),
    Set(Box<Type>),
    Dictionary(Box<Type>, Box<Type>),
}

impl Type {
    pub fn class(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Class {
            service: service.into(),
            name: name.into(),
        }
    }

    pub fn enumeration(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Enumeration {
            service: service.into(),
            name: name.into(),
        }
    }

    pub fn tuple(items: impl IntoIterator<Item = Type>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    pub fn list(item: Type) -> Self {
        Self::List(Box::new(item))
    }

    pub fn set(item: Type) -> Self {
        Self::Set(Box::new(item))
    }

    pub fn dictionary(key: Type, value: Type) -> Self {
        Self::Dictionary(Box::new(key), Box::new(value))
    }

    /// Whether values of this type are protocol messages passed through unchanged
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            Self::Event | Self::ProcedureCall | Self::Stream | Self::Status | Self::Services
        )
    }

    /// Convert a descriptor from a service definition.
    ///
    /// Returns `Ok(None)` for the `NONE` code used by procedures without a
    /// return value.
    pub fn from_schema(ty: &schema::Type) -> Result<Option<Self>, EncodingError> {
        let code = TypeCode::try_from(ty.code)
            .map_err(|_| EncodingError::InvalidType(format!("unknown type code {}", ty.code)))?;
        let children = |expected: usize| -> Result<Vec<Type>, EncodingError> {
            if ty.types.len() != expected {
                return Err(EncodingError::InvalidType(format!(
                    "{:?} expects {} child types, got {}",
                    code,
                    expected,
                    ty.types.len()
                )));
            }
            ty.types.iter().map(Self::required).collect()
        };

        let converted = match code {
            TypeCode::None => return Ok(None),
            TypeCode::Double => Self::Double,
            TypeCode::Float => Self::Float,
            TypeCode::Sint32 => Self::SInt32,
            TypeCode::Sint64 => Self::SInt64,
            TypeCode::Uint32 => Self::UInt32,
            TypeCode::Uint64 => Self::UInt64,
            TypeCode::Bool => Self::Bool,
            TypeCode::String => Self::String,
            TypeCode::Bytes => Self::Bytes,
            TypeCode::Class => Self::class(ty.service.as_str(), ty.name.as_str()),
            TypeCode::Enumeration => Self::enumeration(ty.service.as_str(), ty.name.as_str()),
            TypeCode::Event => Self::Event,
            TypeCode::ProcedureCall => Self::ProcedureCall,
            TypeCode::Stream => Self::Stream,
            TypeCode::Status => Self::Status,
            TypeCode::Services => Self::Services,
            TypeCode::Tuple => {
                if ty.types.is_empty() {
                    return Err(EncodingError::InvalidType(
                        "Tuple expects at least one child type".to_string(),
                    ));
                }
                Self::Tuple(ty.types.iter().map(Self::required).collect::<Result<_, _>>()?)
            }
            TypeCode::List => {
                let mut items = children(1)?;
                Self::list(items.remove(0))
            }
            TypeCode::Set => {
                let mut items = children(1)?;
                Self::set(items.remove(0))
            }
            TypeCode::Dictionary => {
                let mut items = children(2)?;
                let value = items.remove(1);
                Self::dictionary(items.remove(0), value)
            }
        };
        Ok(Some(converted))
    }

    fn required(ty: &schema::Type) -> Result<Self, EncodingError> {
        Self::from_schema(ty)?
            .ok_or_else(|| EncodingError::InvalidType("NONE is not a value type".to_string()))
    }

    /// Convert to the descriptor message used in service definitions
    pub fn to_schema(&self) -> schema::Type {
        let mut ty = schema::Type {
            code: self.code() as i32,
            ..Default::default()
        };
        match self {
            Self::Class { service, name } | Self::Enumeration { service, name } => {
                ty.service = service.clone();
                ty.name = name.clone();
            }
            Self::Tuple(items) => ty.types = items.iter().map(Self::to_schema).collect(),
            Self::List(item) | Self::Set(item) => ty.types = vec![item.to_schema()],
            Self::Dictionary(key, value) => ty.types = vec![key.to_schema(), value.to_schema()],
            _ => {}
        }
        ty
    }

    fn code(&self) -> TypeCode {
        match self {
            Self::Double => TypeCode::Double,
            Self::Float => TypeCode::Float,
            Self::SInt32 => TypeCode::Sint32,
            Self::SInt64 => TypeCode::Sint64,
            Self::UInt32 => TypeCode::Uint32,
            Self::UInt64 => TypeCode::Uint64,
            Self::Bool => TypeCode::Bool,
            Self::String => TypeCode::String,
            Self::Bytes => TypeCode::Bytes,
            Self::Class { .. } => TypeCode::Class,
            Self::Enumeration { .. } => TypeCode::Enumeration,
            Self::Event => TypeCode::Event,
            Self::ProcedureCall => TypeCode::ProcedureCall,
            Self::Stream => TypeCode::Stream,
            Self::Status => TypeCode::Status,
            Self::Services => TypeCode::Services,
            Self::Tuple(_) => TypeCode::Tuple,
            Self::List(_) => TypeCode::List,
            Self::Set(_) => TypeCode::Set,
            Self::Dictionary(_, _) => TypeCode::Dictionary,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class { service, name } | Self::Enumeration { service, name } => {
                write!(f, "{}.{}", service, name)
            }
            Self::Tuple(items) => {
                f.write_str("tuple(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Self::List(item) => write!(f, "list({})", item),
            Self::Set(item) => write!(f, "set({})", item),
            Self::Dictionary(key, value) => write!(f, "dictionary({}, {})", key, value),
            other => write!(f, "{:?}", other.code()),
        }
    }
}
