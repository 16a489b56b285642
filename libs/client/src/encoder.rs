//! Conversion between [`Value`]s and their wire bytes.
//!
//! Scalars are written bare, without field tags: varints for integers
//! (zigzag for signed), little-endian fixed width for floats and a varint
//! length prefix for strings and byte arrays. Collections and protocol
//! messages are protobuf messages in their own right. Decoding is strict:
//! the whole buffer must be consumed.

use bytes::Buf;
use krpc_fabric::schema;
use prost::encoding::{decode_varint, encode_varint};
use prost::Message;

use crate::connection::ConnectionRef;
use crate::error::EncodingError;
use crate::remote::{RemoteEnum, RemoteObject};
use crate::types::Type;
use crate::value::{FromValue, Value};

const MAX_VARINT_LEN: usize = 10;

fn mismatch(ty: &Type, value: &Value) -> EncodingError {
    EncodingError::TypeMismatch {
        expected: ty.to_string(),
        actual: value.kind(),
    }
}

fn zigzag32(n: i32) -> u64 {
    u64::from(((n << 1) ^ (n >> 31)) as u32)
}

fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

fn write_length_delimited(buf: &mut Vec<u8>, data: &[u8]) {
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

/// Encode `value` as described by `ty`.
pub fn encode(value: &Value, ty: &Type) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    match (ty, value) {
        (Type::Double, Value::Double(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Type::Float, Value::Float(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Type::SInt32, Value::SInt32(v)) => encode_varint(zigzag32(*v), &mut buf),
        (Type::SInt64, Value::SInt64(v)) => encode_varint(zigzag64(*v), &mut buf),
        (Type::UInt32, Value::UInt32(v)) => encode_varint(u64::from(*v), &mut buf),
        (Type::UInt64, Value::UInt64(v)) => encode_varint(*v, &mut buf),
        (Type::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), &mut buf),
        (Type::String, Value::String(v)) => write_length_delimited(&mut buf, v.as_bytes()),
        (Type::Bytes, Value::Bytes(v)) => write_length_delimited(&mut buf, v),
        (Type::Class { .. }, Value::Object(obj)) => {
            encode_varint(obj.as_ref().map_or(0, RemoteObject::id), &mut buf)
        }
        (Type::Enumeration { .. }, Value::Enum(e)) => encode_varint(zigzag32(e.value), &mut buf),
        (Type::Enumeration { .. }, Value::SInt32(v)) => encode_varint(zigzag32(*v), &mut buf),
        (Type::Event, Value::Event(m)) => m.encode(&mut buf).map_err(encode_failed)?,
        (Type::ProcedureCall, Value::ProcedureCall(m)) => {
            m.encode(&mut buf).map_err(encode_failed)?
        }
        (Type::Stream, Value::Stream(m)) => m.encode(&mut buf).map_err(encode_failed)?,
        (Type::Status, Value::Status(m)) => m.encode(&mut buf).map_err(encode_failed)?,
        (Type::Services, Value::Services(m)) => m.encode(&mut buf).map_err(encode_failed)?,
        (Type::Tuple(types), Value::Tuple(items)) => {
            if types.len() != items.len() {
                return Err(EncodingError::ArityMismatch {
                    expected: types.len(),
                    actual: items.len(),
                });
            }
            let items = items
                .iter()
                .zip(types)
                .map(|(item, ty)| encode(item, ty))
                .collect::<Result<_, _>>()?;
            return Ok(schema::Tuple { items }.encode_to_vec());
        }
        (Type::List(item_ty), Value::List(items)) => {
            let items = encode_all(items, item_ty)?;
            return Ok(schema::List { items }.encode_to_vec());
        }
        (Type::Set(item_ty), Value::Set(items)) => {
            let items = encode_all(items, item_ty)?;
            return Ok(schema::Set { items }.encode_to_vec());
        }
        (Type::Dictionary(key_ty, value_ty), Value::Dictionary(entries)) => {
            let entries = entries
                .iter()
                .map(|(k, v)| {
                    Ok(schema::DictionaryEntry {
                        key: encode(k, key_ty)?,
                        value: encode(v, value_ty)?,
                    })
                })
                .collect::<Result<_, EncodingError>>()?;
            return Ok(schema::Dictionary { entries }.encode_to_vec());
        }
        _ => return Err(mismatch(ty, value)),
    }
    Ok(buf)
}

fn encode_all(items: &[Value], ty: &Type) -> Result<Vec<Vec<u8>>, EncodingError> {
    items.iter().map(|item| encode(item, ty)).collect()
}

fn encode_failed(err: prost::EncodeError) -> EncodingError {
    EncodingError::InvalidType(err.to_string())
}

/// Decode `data` as described by `ty`.
///
/// Remote objects in the result are bound to `connection`.
pub fn decode(data: &[u8], ty: &Type, connection: &ConnectionRef) -> Result<Value, EncodingError> {
    let value = match ty {
        Type::Tuple(types) => {
            let tuple = schema::Tuple::decode(data)?;
            if tuple.items.len() != types.len() {
                return Err(EncodingError::ArityMismatch {
                    expected: types.len(),
                    actual: tuple.items.len(),
                });
            }
            Value::Tuple(
                tuple
                    .items
                    .iter()
                    .zip(types)
                    .map(|(item, ty)| decode(item, ty, connection))
                    .collect::<Result<_, _>>()?,
            )
        }
        Type::List(item_ty) => {
            let list = schema::List::decode(data)?;
            Value::List(decode_all(&list.items, item_ty, connection)?)
        }
        Type::Set(item_ty) => {
            let set = schema::Set::decode(data)?;
            Value::Set(decode_all(&set.items, item_ty, connection)?)
        }
        Type::Dictionary(key_ty, value_ty) => {
            let dict = schema::Dictionary::decode(data)?;
            Value::Dictionary(
                dict.entries
                    .iter()
                    .map(|entry| {
                        Ok((
                            decode(&entry.key, key_ty, connection)?,
                            decode(&entry.value, value_ty, connection)?,
                        ))
                    })
                    .collect::<Result<_, EncodingError>>()?,
            )
        }
        Type::Event => Value::Event(schema::Event::decode(data)?),
        Type::ProcedureCall => Value::ProcedureCall(schema::ProcedureCall::decode(data)?),
        Type::Stream => Value::Stream(schema::Stream::decode(data)?),
        Type::Status => Value::Status(schema::Status::decode(data)?),
        Type::Services => Value::Services(schema::Services::decode(data)?),
        _ => {
            let mut reader = Reader { buf: data };
            let value = reader.scalar(ty, connection)?;
            if reader.buf.has_remaining() {
                return Err(EncodingError::TrailingBytes(reader.buf.remaining()));
            }
            value
        }
    };
    Ok(value)
}

fn decode_all(
    items: &[Vec<u8>],
    ty: &Type,
    connection: &ConnectionRef,
) -> Result<Vec<Value>, EncodingError> {
    items.iter().map(|item| decode(item, ty, connection)).collect()
}

/// Decode `data` and convert it to `T`.
pub fn decode_as<T: FromValue>(
    data: &[u8],
    ty: &Type,
    connection: &ConnectionRef,
) -> Result<T, EncodingError> {
    T::from_value(decode(data, ty, connection)?)
}

/// Cursor over the bytes of one bare scalar
struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn scalar(&mut self, ty: &Type, connection: &ConnectionRef) -> Result<Value, EncodingError> {
        let value = match ty {
            Type::Double => {
                self.require(8, "double")?;
                Value::Double(self.buf.get_f64_le())
            }
            Type::Float => {
                self.require(4, "float")?;
                Value::Float(self.buf.get_f32_le())
            }
            Type::SInt32 => Value::SInt32(unzigzag32(self.varint32("sint32")?)),
            Type::SInt64 => Value::SInt64(unzigzag64(self.varint("sint64")?)),
            Type::UInt32 => Value::UInt32(self.varint32("uint32")?),
            Type::UInt64 => Value::UInt64(self.varint("uint64")?),
            Type::Bool => Value::Bool(self.varint("bool")? != 0),
            Type::String => Value::String(String::from_utf8(self.length_delimited("string")?)?),
            Type::Bytes => Value::Bytes(self.length_delimited("bytes")?),
            Type::Class { service, name } => {
                let id = self.varint("class")?;
                Value::Object(RemoteObject::new(connection.clone(), service, name, id))
            }
            Type::Enumeration { service, name } => {
                let code = unzigzag32(self.varint32("enumeration")?);
                Value::Enum(RemoteEnum::new(service.as_str(), name.as_str(), code))
            }
            other => {
                return Err(EncodingError::InvalidType(format!(
                    "{} is not a scalar type",
                    other
                )))
            }
        };
        Ok(value)
    }

    fn require(&self, len: usize, what: &'static str) -> Result<(), EncodingError> {
        if self.buf.remaining() < len {
            return Err(EncodingError::Truncated(what));
        }
        Ok(())
    }

    fn varint(&mut self, what: &'static str) -> Result<u64, EncodingError> {
        // prost reports both cases as one error; an unterminated short tail is truncation
        let terminated = self.buf.iter().take(MAX_VARINT_LEN).any(|b| b & 0x80 == 0);
        if !terminated && self.buf.len() < MAX_VARINT_LEN {
            return Err(EncodingError::Truncated(what));
        }
        decode_varint(&mut self.buf).map_err(|_| EncodingError::Overflow(what))
    }

    fn varint32(&mut self, what: &'static str) -> Result<u32, EncodingError> {
        u32::try_from(self.varint(what)?).map_err(|_| EncodingError::Overflow(what))
    }

    fn length_delimited(&mut self, what: &'static str) -> Result<Vec<u8>, EncodingError> {
        let len = usize::try_from(self.varint(what)?).map_err(|_| EncodingError::Overflow(what))?;
        self.require(len, what)?;
        Ok(self.buf.copy_to_bytes(len).to_vec())
    }
}
