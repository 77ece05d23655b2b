// SPDX-License-Identifier: Apache-2.0
//! End-to-end coverage of `Codec::serialize`/`unserialize`.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use stasis_codec::{Codec, CodecError, NativeOpaque, Placeholder, Transformer, TransformerError, Value};

/// A live value the native codec can never render on its own — stands in
/// for a closure, coroutine handle, or similar opaque resource.
#[derive(Debug)]
struct Opaque {
    tag: &'static str,
}

impl NativeOpaque for Opaque {
    fn type_tag(&self) -> &str {
        self.tag
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn opaque(tag: &'static str) -> Value {
    Value::new_native(Box::new(Opaque { tag }))
}

fn as_str(value: &Value) -> &str {
    match value {
        Value::Str(s) => s,
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn plain_string_round_trips_with_no_secret() {
    let codec = Codec::new("", Vec::new());
    let value = Value::Str("VALUE".into());

    let bytes = codec.serialize(&value).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");

    assert_eq!(as_str(&decoded), "VALUE");
}

#[test]
fn hmac_tagged_round_trip_and_tamper_detection() {
    let codec = Codec::new("top-secret", Vec::new());
    let value = Value::Str("VALUE".into());

    let mut bytes = codec.serialize(&value).expect("serialize");
    let separator = bytes.iter().position(|&b| b == b'|').expect("hex prefix present");
    assert_eq!(separator, 64);

    let decoded = codec.unserialize(&bytes).expect("unserialize");
    assert_eq!(as_str(&decoded), "VALUE");

    bytes[0] = if bytes[0] == b'a' { b'b' } else { b'a' };
    assert!(matches!(codec.unserialize(&bytes), Err(CodecError::SignatureMismatch)));
}

#[test]
fn garbage_prefix_is_rejected_as_signature_mismatch() {
    let codec = Codec::new("top-secret", Vec::new());
    let framed = b"definitely not a signature|garbage".to_vec();
    assert!(matches!(
        codec.unserialize(&framed),
        Err(CodecError::SignatureMismatch)
    ));
}

/// A transformer matching every value, recording how many times it was asked
/// to transform and resolving back to a fixed marker.
struct CountingTransformer {
    calls: Cell<u32>,
}

impl CountingTransformer {
    fn new() -> Self {
        Self { calls: Cell::new(0) }
    }
}

impl Transformer for CountingTransformer {
    fn transforms(&self, _value: &Value) -> bool {
        true
    }

    fn transform(&self, _value: &Value) -> Result<Placeholder, TransformerError> {
        self.calls.set(self.calls.get() + 1);
        Ok(Placeholder::new(""))
    }

    fn resolves(&self, _placeholder: &Placeholder) -> bool {
        true
    }

    fn resolve(&self, _placeholder: &Placeholder) -> Result<Value, TransformerError> {
        Ok(Value::Str("marker".into()))
    }
}

#[test]
fn transformer_is_called_exactly_once_for_an_opaque_value() {
    let transformer = Rc::new(CountingTransformer::new());

    struct Shared(Rc<CountingTransformer>);
    impl Transformer for Shared {
        fn transforms(&self, value: &Value) -> bool {
            self.0.transforms(value)
        }
        fn transform(&self, value: &Value) -> Result<Placeholder, TransformerError> {
            self.0.transform(value)
        }
        fn resolves(&self, placeholder: &Placeholder) -> bool {
            self.0.resolves(placeholder)
        }
        fn resolve(&self, placeholder: &Placeholder) -> Result<Value, TransformerError> {
            self.0.resolve(placeholder)
        }
    }

    let codec = Codec::new("", vec![Box::new(Shared(Rc::clone(&transformer)))]);
    let bytes = codec.serialize(&opaque("closure")).expect("serialize");
    assert_eq!(transformer.calls.get(), 1);

    let decoded = codec.unserialize(&bytes).expect("unserialize");
    assert_eq!(as_str(&decoded), "marker");
}

#[test]
fn unserializable_value_with_no_transformer_still_encodes_via_default_placeholder() {
    let codec = Codec::new("", Vec::new());
    let bytes = codec.serialize(&opaque("coroutine")).expect("serialize");
    assert!(!bytes.is_empty());

    let err = codec.unserialize(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::UnresolvablePlaceholder(tag) if tag == "coroutine"));
}

/// Resolves every placeholder to a fresh self-referencing object, modeling
/// scenario 6: `decoded.b === decoded.b.d`.
struct SelfCyclingTransformer;

impl Transformer for SelfCyclingTransformer {
    fn transforms(&self, _value: &Value) -> bool {
        true
    }

    fn transform(&self, _value: &Value) -> Result<Placeholder, TransformerError> {
        Ok(Placeholder::new("closure"))
    }

    fn resolves(&self, placeholder: &Placeholder) -> bool {
        placeholder.class_tag == "closure"
    }

    fn resolve(&self, _placeholder: &Placeholder) -> Result<Value, TransformerError> {
        let obj = Value::new_object("Closure");
        Ok(obj)
    }
}

#[test]
fn shared_object_identity_survives_round_trip() {
    let codec = Codec::new("", Vec::new());

    let shared = Value::new_object("Shared");
    if let Value::Object(rc) = &shared {
        rc.borrow_mut().fields.push(("n".into(), Value::Int(1)));
    }

    let root = Value::new_array();
    if let Value::Array(rc) = &root {
        rc.borrow_mut().entries.push((
            stasis_codec::Key::Int(0),
            shared.clone(),
        ));
        rc.borrow_mut().entries.push((
            stasis_codec::Key::Int(1),
            shared.clone(),
        ));
    }

    let bytes = codec.serialize(&root).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");

    let Value::Array(decoded_rc) = decoded else {
        panic!("expected an array");
    };
    let entries = &decoded_rc.borrow().entries;
    let (_, first) = &entries[0];
    let (_, second) = &entries[1];
    assert_eq!(first.ref_id(), second.ref_id());
}

#[test]
fn self_cycling_object_preserves_pointer_equality_across_the_round_trip() {
    // `{a: 123, b: o, c: <closure>}` where `o.d = o` (o self-cycles).
    let o = Value::new_object("O");
    if let Value::Object(o_rc) = &o {
        o_rc.borrow_mut().fields.push(("d".into(), o.clone()));
    }

    let root = Value::new_object("Root");
    if let Value::Object(rc) = &root {
        rc.borrow_mut().fields.push(("a".into(), Value::Int(123)));
        rc.borrow_mut().fields.push(("b".into(), o.clone()));
        rc.borrow_mut().fields.push(("c".into(), opaque("closure")));
    }

    let codec = Codec::new("", vec![Box::new(SelfCyclingTransformer)]);
    let bytes = codec.serialize(&root).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");

    let Value::Object(rc) = decoded else {
        panic!("expected an object");
    };
    let body = rc.borrow();
    let (_, b) = body.fields.iter().find(|(name, _)| name == "b").expect("field b");
    let Value::Object(b_rc) = b else {
        panic!("expected field b to be an object");
    };
    let b_body = b_rc.borrow();
    let (_, d) = b_body.fields.iter().find(|(name, _)| name == "d").expect("field d");
    assert_eq!(b.ref_id(), d.ref_id());
}

#[test]
fn empty_array_and_object_round_trip() {
    let codec = Codec::new("", Vec::new());

    let array_bytes = codec.serialize(&Value::new_array()).expect("serialize array");
    let array = codec.unserialize(&array_bytes).expect("unserialize array");
    assert!(matches!(array, Value::Array(rc) if rc.borrow().entries.is_empty()));

    let object_bytes = codec
        .serialize(&Value::new_object("Empty"))
        .expect("serialize object");
    let object = codec.unserialize(&object_bytes).expect("unserialize object");
    match object {
        Value::Object(rc) => {
            let body = rc.borrow();
            assert_eq!(body.class, "Empty");
            assert!(body.fields.is_empty());
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn placeholder_payload_containing_another_opaque_value_round_trips() {
    // The transformer stashes the original opaque value itself as the
    // placeholder's payload; the encoder must recurse into that payload and
    // transform it too, turning a would-be-unresolvable nested native into
    // its own placeholder.
    struct WrapsItself;
    impl Transformer for WrapsItself {
        fn transforms(&self, value: &Value) -> bool {
            matches!(value, Value::Native(_))
        }
        fn transform(&self, value: &Value) -> Result<Placeholder, TransformerError> {
            Ok(Placeholder::new_from("wrapper", value.clone()))
        }
        fn resolves(&self, placeholder: &Placeholder) -> bool {
            placeholder.class_tag == "wrapper"
        }
        fn resolve(&self, placeholder: &Placeholder) -> Result<Value, TransformerError> {
            Ok(placeholder.payload.clone())
        }
    }

    let codec = Codec::new("", vec![Box::new(WrapsItself)]);
    let bytes = codec.serialize(&opaque("outer")).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");

    // Wrapping the placeholder's own payload in itself produces a
    // self-referencing placeholder: its resolved instance is itself.
    let Value::Placeholder(rc) = &decoded else {
        panic!("expected a placeholder, got {decoded:?}");
    };
    let instance = rc.borrow().get_instance().cloned().expect("resolved instance");
    assert_eq!(decoded.ref_id(), instance.ref_id());
}

#[test]
fn registry_uses_first_registered_match() {
    struct First;
    impl Transformer for First {
        fn transforms(&self, _value: &Value) -> bool {
            true
        }
        fn transform(&self, _value: &Value) -> Result<Placeholder, TransformerError> {
            Ok(Placeholder::new("first"))
        }
        fn resolves(&self, _placeholder: &Placeholder) -> bool {
            true
        }
        fn resolve(&self, _placeholder: &Placeholder) -> Result<Value, TransformerError> {
            Ok(Value::Str("first".into()))
        }
    }
    struct Second;
    impl Transformer for Second {
        fn transforms(&self, _value: &Value) -> bool {
            true
        }
        fn transform(&self, _value: &Value) -> Result<Placeholder, TransformerError> {
            Ok(Placeholder::new("second"))
        }
        fn resolves(&self, _placeholder: &Placeholder) -> bool {
            true
        }
        fn resolve(&self, _placeholder: &Placeholder) -> Result<Value, TransformerError> {
            Ok(Value::Str("second".into()))
        }
    }

    let codec = Codec::new("", vec![Box::new(First), Box::new(Second)]);
    let bytes = codec.serialize(&opaque("whatever")).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");
    assert_eq!(as_str(&decoded), "first");
}

#[test]
fn mid_payload_tamper_trips_signature_mismatch() {
    let codec = Codec::new("top-secret", Vec::new());
    let mut bytes = codec
        .serialize(&Value::Str("a longer value to tamper with".into()))
        .expect("serialize");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(matches!(codec.unserialize(&bytes), Err(CodecError::SignatureMismatch)));
}

#[test]
fn a_self_cycling_array_round_trips_without_a_transformer() {
    // Plain arrays and objects break cycles the same way (target registered
    // before the payload is recursed into), with no placeholder needed.
    let a = Value::new_array();
    if let Value::Array(a_rc) = &a {
        a_rc.borrow_mut().entries.push((stasis_codec::Key::Int(0), Value::Int(7)));
        a_rc.borrow_mut().entries.push((stasis_codec::Key::Int(1), a.clone()));
    }

    let codec = Codec::new("", Vec::new());
    let bytes = codec.serialize(&a).expect("serialize");
    let decoded = codec.unserialize(&bytes).expect("unserialize");

    let Value::Array(rc) = &decoded else {
        panic!("expected an array");
    };
    let entries = rc.borrow();
    let (_, looped_back) = &entries[1];
    assert_eq!(decoded.ref_id(), looped_back.ref_id());
}

