use krpc_client::encoder::{decode, encode};
use krpc_client::schema;
use krpc_client::{ConnectionRef, EncodingError, RemoteEnum, RemoteObject, Type, Value};
use prost::Message;
use proptest::prelude::*;

fn roundtrip(value: &Value, ty: &Type) -> Value {
    let bytes = encode(value, ty).unwrap();
    decode(&bytes, ty, &ConnectionRef::detached()).unwrap()
}

fn object(id: u64) -> RemoteObject {
    RemoteObject::new(ConnectionRef::detached(), "SpaceCenter", "Vessel", id).unwrap()
}

proptest! {
    #[test]
    fn sint32_roundtrip(n: i32) {
        prop_assert_eq!(roundtrip(&Value::SInt32(n), &Type::SInt32), Value::SInt32(n));
    }

    #[test]
    fn sint64_roundtrip(n: i64) {
        prop_assert_eq!(roundtrip(&Value::SInt64(n), &Type::SInt64), Value::SInt64(n));
    }

    #[test]
    fn uint64_roundtrip(n: u64) {
        prop_assert_eq!(roundtrip(&Value::UInt64(n), &Type::UInt64), Value::UInt64(n));
    }

    #[test]
    fn double_roundtrip(x in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        prop_assert_eq!(roundtrip(&Value::Double(x), &Type::Double), Value::Double(x));
    }

    #[test]
    fn string_roundtrip(s in "\\PC*") {
        prop_assert_eq!(roundtrip(&Value::String(s.clone()), &Type::String), Value::String(s));
    }

    #[test]
    fn bytes_roundtrip(b in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(roundtrip(&Value::Bytes(b.clone()), &Type::Bytes), Value::Bytes(b));
    }

    #[test]
    fn list_of_ints_roundtrip(items in proptest::collection::vec(any::<i32>(), 0..64)) {
        let value = Value::List(items.into_iter().map(Value::SInt32).collect());
        let ty = Type::list(Type::SInt32);
        prop_assert_eq!(roundtrip(&value, &ty), value);
    }
}

#[test]
fn scalar_extremes() {
    let cases = [
        (Value::SInt32(i32::MIN), Type::SInt32),
        (Value::SInt32(i32::MAX), Type::SInt32),
        (Value::SInt64(i64::MIN), Type::SInt64),
        (Value::UInt32(u32::MAX), Type::UInt32),
        (Value::UInt64(u64::MAX), Type::UInt64),
        (Value::Float(f32::MIN_POSITIVE), Type::Float),
        (Value::Double(f64::MAX), Type::Double),
        (Value::Double(-0.0), Type::Double),
        (Value::Bool(false), Type::Bool),
        (Value::String(String::new()), Type::String),
        (Value::String("Ẁ€ 🚀 ケルバル".to_string()), Type::String),
        (Value::Bytes(Vec::new()), Type::Bytes),
    ];
    for (value, ty) in cases {
        assert_eq!(roundtrip(&value, &ty), value, "{}", ty);
    }
}

#[test]
fn uint64_max_uses_ten_bytes() {
    let bytes = encode(&Value::UInt64(u64::MAX), &Type::UInt64).unwrap();
    assert_eq!(bytes.len(), 10);
    assert_eq!(bytes[9], 0x01);
}

#[test]
fn null_object_is_zero_for_any_class() {
    for class in ["Vessel", "Part", "Orbit"] {
        let ty = Type::class("SpaceCenter", class);
        assert_eq!(encode(&Value::Object(None), &ty).unwrap(), vec![0x00]);
        assert_eq!(
            decode(&[0x00], &ty, &ConnectionRef::detached()).unwrap(),
            Value::Object(None)
        );
    }
}

#[test]
fn objects_compare_by_id() {
    let ty = Type::class("SpaceCenter", "Vessel");
    let decoded = roundtrip(&Value::from(object(300)), &ty);
    assert_eq!(decoded.as_object().unwrap().id(), 300);
    assert_eq!(decoded, Value::from(object(300)));
    assert_ne!(decoded, Value::from(object(301)));
}

#[test]
fn enumeration_roundtrip() {
    let ty = Type::enumeration("SpaceCenter", "SASMode");
    let value = Value::Enum(RemoteEnum::new("SpaceCenter", "SASMode", 3));
    assert_eq!(roundtrip(&value, &ty), value);
}

#[test]
fn empty_collections() {
    let cases = [
        (Value::List(Vec::new()), Type::list(Type::String)),
        (Value::Set(Vec::new()), Type::set(Type::SInt32)),
        (
            Value::Dictionary(Vec::new()),
            Type::dictionary(Type::String, Type::Double),
        ),
    ];
    for (value, ty) in cases {
        assert_eq!(roundtrip(&value, &ty), value, "{}", ty);
    }
}

#[test]
fn nested_composites() {
    let ty = Type::dictionary(
        Type::String,
        Type::tuple([
            Type::list(Type::class("SpaceCenter", "Part")),
            Type::set(Type::Bool),
            Type::Double,
        ]),
    );
    let value = Value::Dictionary(vec![
        (
            Value::from("stage 1"),
            Value::Tuple(vec![
                Value::List(vec![Value::from(object(1)), Value::Object(None)]),
                Value::Set(vec![Value::Bool(true), Value::Bool(false)]),
                Value::Double(2.5),
            ]),
        ),
        (
            Value::from("stage 2"),
            Value::Tuple(vec![
                Value::List(Vec::new()),
                Value::Set(vec![Value::Bool(true)]),
                Value::Double(-1.0),
            ]),
        ),
    ]);
    assert_eq!(roundtrip(&value, &ty), value);
}

#[test]
fn messages_pass_through() {
    let call = schema::ProcedureCall {
        service: "SpaceCenter".to_string(),
        procedure: "get_UT".to_string(),
        ..Default::default()
    };
    let bytes = encode(&Value::ProcedureCall(call.clone()), &Type::ProcedureCall).unwrap();
    assert_eq!(bytes, call.encode_to_vec());
    assert_eq!(
        roundtrip(&Value::ProcedureCall(call.clone()), &Type::ProcedureCall),
        Value::ProcedureCall(call)
    );
}

#[test]
fn tuple_arity_is_checked_on_encode() {
    let ty = Type::tuple([Type::SInt32, Type::String]);
    let err = encode(&Value::Tuple(vec![Value::SInt32(1)]), &ty).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::ArityMismatch {
            expected: 2,
            actual: 1
        }
    ));
}

#[test]
fn tuple_arity_is_checked_on_decode() {
    let three = Type::tuple([Type::Bool, Type::Bool, Type::Bool]);
    let bytes = encode(
        &Value::Tuple(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]),
        &three,
    )
    .unwrap();

    let two = Type::tuple([Type::Bool, Type::Bool]);
    let err = decode(&bytes, &two, &ConnectionRef::detached()).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::ArityMismatch {
            expected: 2,
            actual: 3
        }
    ));
}

#[test]
fn malformed_tuple_is_rejected() {
    let ty = Type::tuple([Type::String, Type::String]);
    let mut bytes = encode(
        &Value::Tuple(vec![Value::from("left"), Value::from("right")]),
        &ty,
    )
    .unwrap();
    bytes.truncate(bytes.len() - 2);
    assert!(decode(&bytes, &ty, &ConnectionRef::detached()).is_err());
}

#[test]
fn truncated_string_is_rejected() {
    let mut bytes = encode(&Value::from("kerbal"), &Type::String).unwrap();
    bytes.pop();
    assert!(matches!(
        decode(&bytes, &Type::String, &ConnectionRef::detached()),
        Err(EncodingError::Truncated("string"))
    ));
}

#[test]
fn invalid_utf8_is_rejected() {
    assert!(matches!(
        decode(&[0x02, 0xc3, 0x28], &Type::String, &ConnectionRef::detached()),
        Err(EncodingError::Utf8(_))
    ));
}
