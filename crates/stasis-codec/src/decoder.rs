// SPDX-License-Identifier: Apache-2.0
//! The two-phase graph walker's decode half: re-expand a [`WireEnvelope`]
//! back into live objects, wiring shared references and cycles while
//! invoking transformers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, instrument};

use crate::envelope::{WireEnvelope, WireKey, WireSlot, WireValue};
use crate::error::CodecError;
use crate::placeholder::Placeholder;
use crate::transformer::Registry;
use crate::value::{ArrayBody, Key, ObjectBody, PlaceholderHandle, RefId, Value};

/// A deferred write triggered once the slot it depends on finishes
/// resolving. Captures just enough addressing to perform one write-back —
/// this crate's realization of spec.md's "completion callback".
enum Slot {
    ArrayEntry(Rc<RefCell<ArrayBody>>, usize),
    ObjectField(Rc<RefCell<ObjectBody>>, usize),
    PlaceholderPayload(PlaceholderHandle),
}

impl Slot {
    fn write(&self, value: Value) {
        match self {
            Slot::ArrayEntry(rc, idx) => {
                if let Some(entry) = rc.borrow_mut().entries.get_mut(*idx) {
                    entry.1 = value;
                }
            }
            Slot::ObjectField(rc, idx) => {
                if let Some(field) = rc.borrow_mut().fields.get_mut(*idx) {
                    field.1 = value;
                }
            }
            Slot::PlaceholderPayload(rc) => {
                rc.borrow_mut().payload = value;
            }
        }
    }
}

/// Bookkeeping for one `unserialize` call's shortcut-resolution pass.
struct DecodeTables<'r> {
    registry: &'r Registry,
    /// The wire shortcuts being resolved, indexed identically to `live`.
    wire_shortcuts: &'r [WireSlot],
    /// Live containers pre-built (empty) from `wire_shortcuts`, so any
    /// `WireValue::Ref` — including a forward reference from an earlier
    /// shortcut's own contents — resolves to a real, shareable `Rc` before
    /// its contents are filled in.
    live: Vec<Value>,
    /// Indices into `live`/`wire_shortcuts` that have finished resolving.
    resolved: Vec<bool>,
    /// The externally-visible value for each finished index: the container
    /// itself for `Array`/`Object`, but the transformer's *instance* — not
    /// the placeholder wrapper — for `Placeholder`.
    resolved_value: Vec<Option<Value>>,
    /// `RefId -> deferred writers` for slots currently being resolved
    /// further up the call stack. Presence of a key means "in progress".
    pending: HashMap<RefId, Vec<Slot>>,
}

impl<'r> DecodeTables<'r> {
    fn new(registry: &'r Registry, wire_shortcuts: &'r [WireSlot]) -> Self {
        let live = wire_shortcuts
            .iter()
            .map(|slot| match slot {
                WireSlot::Array(_) => Value::new_array(),
                WireSlot::Object { class, .. } => Value::new_object(class.clone()),
                WireSlot::Placeholder(wire_ph) => {
                    Value::Placeholder(Rc::new(RefCell::new(Placeholder::new(wire_ph.class_tag.clone()))))
                }
            })
            .collect();
        let len = wire_shortcuts.len();
        Self {
            registry,
            wire_shortcuts,
            live,
            resolved: vec![false; len],
            resolved_value: vec![None; len],
            pending: HashMap::new(),
        }
    }
}

/// Reconstructs live values from a decoded [`WireEnvelope`].
#[instrument(skip(envelope, registry))]
pub(crate) fn decode(envelope: WireEnvelope, registry: &Registry) -> Result<Value, CodecError> {
    let mut tables = DecodeTables::new(registry, &envelope.shortcuts);

    // Resolve every shortcut in order (spec step 4.5.3), then the root value.
    for index in 0..envelope.shortcuts.len() {
        resolve_slot(index, &mut tables)?;
    }
    let value = resolve_wire_value(&envelope.value, &mut tables, None)?;
    debug!(shortcuts = envelope.shortcuts.len(), "decoded envelope");
    Ok(value)
}

/// Fills in the contents of `live[index]` from `wire_shortcuts[index]`, if it
/// hasn't been resolved already as a side effect of an earlier, cyclically
/// reachable shortcut.
fn resolve_slot(index: usize, tables: &mut DecodeTables<'_>) -> Result<(), CodecError> {
    if tables.resolved[index] {
        return Ok(());
    }
    let live = tables.live[index].clone();
    let Some(ref_id) = live.ref_id() else {
        unreachable!("every pre-built shortcut slot carries a ref id")
    };
    if tables.pending.contains_key(&ref_id) {
        // Already being resolved further up the call stack (a cycle through
        // this slot) — the in-progress frame will finish the job.
        return Ok(());
    }
    tables.pending.insert(ref_id, Vec::new());

    let final_value = match (&tables.wire_shortcuts[index].clone(), &live) {
        (WireSlot::Array(entries), Value::Array(rc)) => {
            for (key, child) in entries {
                let entry_index = rc.borrow().entries.len();
                rc.borrow_mut().entries.push((resolve_key(key), Value::Null));
                let slot = Slot::ArrayEntry(Rc::clone(rc), entry_index);
                let resolved = resolve_wire_value(child, tables, Some(slot))?;
                if let Some(entry) = rc.borrow_mut().entries.get_mut(entry_index) {
                    entry.1 = resolved;
                }
            }
            live.clone()
        }
        (WireSlot::Object { fields, .. }, Value::Object(rc)) => {
            for (name, child) in fields {
                let field_index = rc.borrow().fields.len();
                rc.borrow_mut().fields.push((name.clone(), Value::Null));
                let slot = Slot::ObjectField(Rc::clone(rc), field_index);
                let resolved = resolve_wire_value(child, tables, Some(slot))?;
                if let Some(field) = rc.borrow_mut().fields.get_mut(field_index) {
                    field.1 = resolved;
                }
            }
            live.clone()
        }
        (WireSlot::Placeholder(wire_ph), Value::Placeholder(ph_rc)) => {
            let payload = resolve_wire_value(
                &wire_ph.payload,
                tables,
                Some(Slot::PlaceholderPayload(Rc::clone(ph_rc))),
            )?;
            ph_rc.borrow_mut().payload = payload;

            let instance = {
                let ph = ph_rc.borrow();
                let resolved = tables
                    .registry
                    .find_decoder(&ph)
                    .map(|transformer| transformer.resolve(&ph));
                match resolved {
                    Some(result) => result.map_err(CodecError::transformer_failure)?,
                    None => return Err(CodecError::UnresolvablePlaceholder(ph.class_tag.clone())),
                }
            };
            ph_rc.borrow_mut().set_instance(instance.clone());
            instance
        }
        _ => unreachable!("live[index] is always pre-built to match wire_shortcuts[index]'s kind"),
    };

    tables.resolved[index] = true;
    tables.resolved_value[index] = Some(final_value.clone());
    drain_pending(tables, ref_id, final_value);
    Ok(())
}

/// After a slot finishes resolving, runs every deferred write that was
/// waiting on it (spec step 4.5.5's "drain the callback list").
fn drain_pending(tables: &mut DecodeTables<'_>, ref_id: RefId, value: Value) {
    if let Some(waiters) = tables.pending.remove(&ref_id) {
        for waiter in waiters {
            waiter.write(value.clone());
        }
    }
}

/// Walks a [`WireValue`], producing a live [`Value`]. `deferred_slot`, if
/// given, is where the caller wants the eventual value written back if this
/// call must defer (because the value is a shortcut reference currently
/// being resolved further up the stack).
fn resolve_wire_value(
    wire: &WireValue,
    tables: &mut DecodeTables<'_>,
    deferred_slot: Option<Slot>,
) -> Result<Value, CodecError> {
    match wire {
        WireValue::Null => Ok(Value::Null),
        WireValue::Bool(b) => Ok(Value::Bool(*b)),
        WireValue::Int(i) => Ok(Value::Int(*i)),
        WireValue::Float(f) => Ok(Value::Float(*f)),
        WireValue::Str(s) => Ok(Value::Str(s.clone())),
        WireValue::Native(cbor) => Ok(Value::new_native(Box::new(crate::native::PassThrough::new(cbor.clone())))),
        WireValue::Array(entries) => {
            let result: Rc<RefCell<ArrayBody>> = Rc::new(RefCell::new(ArrayBody::default()));
            for (index, (key, child)) in entries.iter().enumerate() {
                result.borrow_mut().entries.push((resolve_key(key), Value::Null));
                let slot = Slot::ArrayEntry(Rc::clone(&result), index);
                let resolved = resolve_wire_value(child, tables, Some(slot))?;
                if let Some(entry) = result.borrow_mut().entries.get_mut(index) {
                    entry.1 = resolved;
                }
            }
            Ok(Value::Array(result))
        }
        WireValue::Object { class, fields } => {
            let result: Rc<RefCell<ObjectBody>> = Rc::new(RefCell::new(ObjectBody {
                class: class.clone(),
                fields: Vec::with_capacity(fields.len()),
            }));
            for (index, (name, child)) in fields.iter().enumerate() {
                result.borrow_mut().fields.push((name.clone(), Value::Null));
                let slot = Slot::ObjectField(Rc::clone(&result), index);
                let resolved = resolve_wire_value(child, tables, Some(slot))?;
                if let Some(field) = result.borrow_mut().fields.get_mut(index) {
                    field.1 = resolved;
                }
            }
            Ok(Value::Object(result))
        }
        WireValue::Ref(index) => {
            let live = tables.live[*index].clone();
            let Some(ref_id) = live.ref_id() else {
                unreachable!("every pre-built shortcut slot carries a ref id")
            };
            if tables.pending.contains_key(&ref_id) {
                // Cycle: defer the write and hand back the live container
                // itself for now — its contents are filled in once the
                // in-progress frame finishes resolving it.
                if let Some(slot) = deferred_slot {
                    tables.pending.entry(ref_id).or_default().push(slot);
                }
                return Ok(live);
            }
            if !tables.resolved[*index] {
                resolve_slot(*index, tables)?;
            }
            match tables.resolved_value[*index].clone() {
                Some(value) => Ok(value),
                None => unreachable!("resolve_slot always populates resolved_value on success"),
            }
        }
    }
}

fn resolve_key(key: &WireKey) -> Key {
    match key {
        WireKey::Int(i) => Key::Int(*i),
        WireKey::Str(s) => Key::Str(s.clone()),
    }
}

/// Inverse of `encoder::try_native_encode`: rebuilds a live [`Value`] from a
/// `ciborium` value that decode's fast path (spec step 4.5.2) found was not
/// shaped like a [`WireEnvelope`].
///
/// An array is told apart from an object by the same shape the encoder
/// produces them in: an object's map always opens with a `"class"` text
/// key (`try_native_encode`'s first emitted entry), an array's never does,
/// and an empty map can only have come from an empty array (an object's
/// `class` entry is never omitted).
pub(crate) fn native_to_value(cbor: &ciborium::value::Value) -> Result<Value, CodecError> {
    use ciborium::value::Value as Cbor;
    match cbor {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(*b)),
        Cbor::Integer(i) => {
            let n: i64 = (*i)
                .try_into()
                .map_err(|_| CodecError::NativeCodecFailure("integer out of range".to_string()))?;
            Ok(Value::Int(n))
        }
        Cbor::Float(f) => Ok(Value::Float(*f)),
        Cbor::Text(s) => Ok(Value::Str(s.clone())),
        Cbor::Map(entries) => native_map_to_value(entries),
        other => Ok(Value::new_native(Box::new(crate::native::PassThrough::new(other.clone())))),
    }
}

fn native_map_to_value(entries: &[(ciborium::value::Value, ciborium::value::Value)]) -> Result<Value, CodecError> {
    use ciborium::value::Value as Cbor;

    if let Some((Cbor::Text(key), Cbor::Text(class))) = entries.first() {
        if key == "class" {
            let result = Value::new_object(class.clone());
            let Value::Object(rc) = &result else {
                unreachable!("Value::new_object always returns Value::Object")
            };
            for (name, v) in &entries[1..] {
                let Cbor::Text(name) = name else {
                    return Err(CodecError::NativeCodecFailure("object field key was not a string".to_string()));
                };
                let value = native_to_value(v)?;
                rc.borrow_mut().fields.push((name.clone(), value));
            }
            return Ok(result);
        }
    }

    let result = Value::new_array();
    let Value::Array(rc) = &result else {
        unreachable!("Value::new_array always returns Value::Array")
    };
    for (key, v) in entries {
        let key = match key {
            Cbor::Integer(i) => Key::Int(
                (*i).try_into()
                    .map_err(|_| CodecError::NativeCodecFailure("array key out of range".to_string()))?,
            ),
            Cbor::Text(s) => Key::Str(s.clone()),
            _ => return Err(CodecError::NativeCodecFailure("array key was neither integer nor string".to_string())),
        };
        let value = native_to_value(v)?;
        rc.borrow_mut().entries.push((key, value));
    }
    Ok(result)
}
