// SPDX-License-Identifier: Apache-2.0
//! The two-phase graph walker's encode half: fold a value graph into a
//! natively-serializable [`WireEnvelope`], preserving shared-reference
//! identity and cycles.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::envelope::{WireEnvelope, WireKey, WirePlaceholder, WireSlot, WireValue};
use crate::error::CodecError;
use crate::placeholder::Placeholder;
use crate::transformer::Registry;
use crate::value::{ArrayHandle, Fingerprint, Key, NativeHandle, ObjectHandle, PlaceholderHandle, RefId, Value};

/// Attempts to render `value` as a plain, sharing-free [`ciborium::value::Value`]
/// without consulting any transformer.
///
/// This is the encoder's fast path (spec step 4.4.1): it fails — returning
/// `None` — the moment it meets a [`crate::value::Value::Native`] node with
/// no native representation, or a slot it has already visited earlier in
/// this same scan (a plain native codec can represent a tree, not a graph
/// with shared nodes or cycles).
pub(crate) fn try_native_encode(value: &Value) -> Option<ciborium::value::Value> {
    let mut seen = HashSet::new();
    try_native_encode_inner(value, &mut seen)
}

fn try_native_encode_inner(value: &Value, seen: &mut HashSet<RefId>) -> Option<ciborium::value::Value> {
    use ciborium::value::Value as Cbor;
    match value {
        Value::Null => Some(Cbor::Null),
        Value::Bool(b) => Some(Cbor::Bool(*b)),
        Value::Int(i) => Some(Cbor::Integer((*i).into())),
        Value::Float(f) => Some(Cbor::Float(*f)),
        Value::Str(s) => Some(Cbor::Text(s.clone())),
        Value::Native(rc) => rc.borrow().inner.native_repr(),
        Value::Placeholder(_) => None,
        Value::Array(rc) => {
            let ref_id = value.ref_id()?;
            if !seen.insert(ref_id) {
                return None;
            }
            let mut items = Vec::new();
            for (key, v) in &rc.borrow().entries {
                let key_cbor = match key {
                    Key::Int(i) => Cbor::Integer((*i).into()),
                    Key::Str(s) => Cbor::Text(s.clone()),
                };
                items.push((key_cbor, try_native_encode_inner(v, seen)?));
            }
            Some(Cbor::Map(items))
        }
        Value::Object(rc) => {
            let ref_id = value.ref_id()?;
            if !seen.insert(ref_id) {
                return None;
            }
            let body = rc.borrow();
            let mut items = vec![(Cbor::Text("class".into()), Cbor::Text(body.class.clone()))];
            for (name, v) in &body.fields {
                items.push((Cbor::Text(name.clone()), try_native_encode_inner(v, seen)?));
            }
            Some(Cbor::Map(items))
        }
    }
}

/// Bookkeeping for one `serialize` call's slow path. Cleared on every exit
/// path by going out of scope at the end of [`encode`].
struct EncodeTables {
    /// `sources[ref_id]` — fingerprint recorded at first visit.
    sources: HashMap<RefId, Fingerprint>,
    /// `targets[ref_id]` — the already-produced transformed value for that slot.
    ///
    /// In this crate's realization a slot's `RefId` *is* its object identity
    /// (see `SPEC_FULL.md` §3), so the spec's separate "object identity
    /// table" collapses into this same map rather than needing a second one.
    targets: HashMap<RefId, Value>,
}

impl EncodeTables {
    fn new() -> Self {
        Self {
            sources: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    /// Steps 2–4 of the walker: compute the ref id, check for a revisit,
    /// and record the fingerprint on first visit.
    fn check_revisit(&mut self, ref_id: RefId, slot: &Value) -> Result<Option<Value>, CodecError> {
        if let Some(fp) = self.sources.get(&ref_id) {
            if slot.fingerprint() != *fp {
                return Err(CodecError::SourceMutatedDuringEncode(ref_id));
            }
            return Ok(self.targets.get(&ref_id).cloned());
        }
        self.sources.insert(ref_id, slot.fingerprint());
        Ok(None)
    }
}

/// Recursive walker state for one `serialize` call.
pub(crate) struct Encoder<'r> {
    tables: EncodeTables,
    registry: &'r Registry,
}

impl<'r> Encoder<'r> {
    pub(crate) fn new(registry: &'r Registry) -> Self {
        Self {
            tables: EncodeTables::new(),
            registry,
        }
    }

    /// Entry point: transforms `root`, then flattens the result into a
    /// [`WireEnvelope`], lifting every shared, cyclic, or placeholder node
    /// into `shortcuts`.
    #[instrument(skip(self, root))]
    pub(crate) fn encode(mut self, root: &Value) -> Result<WireEnvelope, CodecError> {
        if root.is_leaf() {
            return Err(CodecError::IllegalLeafEncoded);
        }
        let transformed = self.transform(root)?;
        let envelope = flatten_root(&transformed);
        debug!(shortcuts = envelope.shortcuts.len(), "slow path produced envelope");
        Ok(envelope)
    }

    /// The `transform(slot)` walker (spec steps 1–9).
    fn transform(&mut self, slot: &Value) -> Result<Value, CodecError> {
        match slot {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
                Err(CodecError::IllegalLeafEncoded)
            }
            Value::Array(rc) => self.transform_array(rc),
            Value::Object(rc) => self.transform_object(rc),
            Value::Native(rc) => self.transform_native(rc),
            Value::Placeholder(rc) => self.transform_placeholder(rc),
        }
    }

    fn transform_child(&mut self, child: &Value) -> Result<Value, CodecError> {
        if child.is_leaf() {
            Ok(child.clone())
        } else {
            self.transform(child)
        }
    }

    /// Step 6: arrays recurse element-by-element and never need a
    /// transformer — they're always structurally representable.
    ///
    /// Registers the result slot in `targets` *before* recursing into the
    /// entries (mirroring [`Encoder::install_placeholder`]'s tail) so a
    /// cycle back through this same array resolves to the in-progress
    /// result instead of recursing forever.
    fn transform_array(&mut self, rc: &ArrayHandle) -> Result<Value, CodecError> {
        let ref_id = RefId::of(rc);
        let slot = Value::Array(Rc::clone(rc));
        if let Some(existing) = self.tables.check_revisit(ref_id, &slot)? {
            return Ok(existing);
        }
        let result: ArrayHandle = Rc::new(RefCell::new(crate::value::ArrayBody::default()));
        let produced = Value::Array(Rc::clone(&result));
        self.tables.targets.insert(ref_id, produced.clone());

        let entries = rc.borrow().entries.clone();
        for (key, v) in &entries {
            let child = self.transform_child(v)?;
            result.borrow_mut().entries.push((key.clone(), child));
        }
        Ok(produced)
    }

    /// Analogue of step 6 for named-field records: always structurally
    /// representable, so (per `SPEC_FULL.md` §4.4) it never needs a
    /// transformer — only `Value::Native` takes the steps 7/8/9 path.
    fn transform_object(&mut self, rc: &ObjectHandle) -> Result<Value, CodecError> {
        let ref_id = RefId::of(rc);
        let slot = Value::Object(Rc::clone(rc));
        if let Some(existing) = self.tables.check_revisit(ref_id, &slot)? {
            return Ok(existing);
        }
        let body = rc.borrow();
        let result: ObjectHandle = Rc::new(RefCell::new(crate::value::ObjectBody {
            class: body.class.clone(),
            fields: Vec::with_capacity(body.fields.len()),
        }));
        let fields = body.fields.clone();
        drop(body);
        let produced = Value::Object(Rc::clone(&result));
        self.tables.targets.insert(ref_id, produced.clone());

        for (name, v) in &fields {
            let child = self.transform_child(v)?;
            result.borrow_mut().fields.push((name.clone(), child));
        }
        Ok(produced)
    }

    /// Steps 7–9: pass-through, then first matching transformer, then a
    /// default placeholder.
    fn transform_native(&mut self, rc: &NativeHandle) -> Result<Value, CodecError> {
        let ref_id = RefId::of(rc);
        let slot = Value::Native(Rc::clone(rc));
        if let Some(existing) = self.tables.check_revisit(ref_id, &slot)? {
            return Ok(existing);
        }

        if rc.borrow().inner.native_repr().is_some() {
            trace!(tag = rc.borrow().inner.type_tag(), "native pass-through");
            self.tables.targets.insert(ref_id, slot.clone());
            return Ok(slot);
        }

        if let Some(transformer) = self.registry.find_encoder(&slot) {
            let placeholder = transformer
                .transform(&slot)
                .map_err(CodecError::transformer_failure)?;
            return self.install_placeholder(ref_id, placeholder);
        }

        let class_tag = rc.borrow().inner.type_tag().to_string();
        debug!(tag = %class_tag, "no transformer matched, using default placeholder");
        self.install_placeholder(ref_id, Placeholder::new(class_tag))
    }

    /// A `Value::Placeholder` reaching the walker directly (e.g. a caller
    /// embedding an already-built placeholder). Registers it like any other
    /// slot and recurses into its payload.
    fn transform_placeholder(&mut self, rc: &PlaceholderHandle) -> Result<Value, CodecError> {
        let ref_id = RefId::of(rc);
        let slot = Value::Placeholder(Rc::clone(rc));
        if let Some(existing) = self.tables.check_revisit(ref_id, &slot)? {
            return Ok(existing);
        }
        self.tables.targets.insert(ref_id, slot.clone());
        let payload = rc.borrow().payload.clone();
        let transformed_payload = self.transform_child(&payload)?;
        rc.borrow_mut().payload = transformed_payload;
        Ok(slot)
    }

    /// Steps 8/9's shared tail: register the target *before* recursing into
    /// the payload (mandatory — this is what lets a cycle through the
    /// placeholder terminate), then recurse.
    fn install_placeholder(&mut self, ref_id: RefId, placeholder: Placeholder) -> Result<Value, CodecError> {
        let ph_rc: PlaceholderHandle = Rc::new(RefCell::new(placeholder));
        let produced = Value::Placeholder(Rc::clone(&ph_rc));
        self.tables.targets.insert(ref_id, produced.clone());

        let payload = ph_rc.borrow().payload.clone();
        let transformed_payload = self.transform_child(&payload)?;
        ph_rc.borrow_mut().payload = transformed_payload;

        Ok(produced)
    }
}

/// Flattens a value known (via [`try_native_encode`]) to contain no
/// placeholders, shared references, or cycles — the fast path's output —
/// as well as the slow path's fully-transformed tree.
///
/// Two passes: first find every ref id that is visited more than once (a
/// shared node or the entry point of a cycle) or that backs a placeholder
/// (placeholders are always lifted, matching spec steps 8/9's unconditional
/// "append to shortcuts"); then flatten, replacing each such node's every
/// occurrence with a [`WireValue::Ref`] into `shortcuts`, registering the
/// slot's index *before* recursing into its children so a cycle through it
/// terminates.
pub(crate) fn flatten_root(value: &Value) -> WireEnvelope {
    let mut needs_slot = HashSet::new();
    let mut visiting = HashSet::new();
    let mut visited_once = HashSet::new();
    scan_refs(value, &mut needs_slot, &mut visiting, &mut visited_once);

    let mut ctx = FlattenCtx {
        needs_slot,
        assigned: HashMap::new(),
        shortcuts: Vec::new(),
    };
    let root = flatten(value, &mut ctx);
    WireEnvelope {
        value: root,
        shortcuts: ctx.shortcuts,
    }
}

fn scan_refs(
    value: &Value,
    needs_slot: &mut HashSet<RefId>,
    visiting: &mut HashSet<RefId>,
    visited_once: &mut HashSet<RefId>,
) {
    let Some(ref_id) = value.ref_id() else {
        return;
    };
    if matches!(value, Value::Placeholder(_)) {
        needs_slot.insert(ref_id);
    }
    if visiting.contains(&ref_id) {
        // Reached via a cycle still on the current path.
        needs_slot.insert(ref_id);
        return;
    }
    if !visited_once.insert(ref_id) {
        // Reached a second time via a different, non-cyclic path.
        needs_slot.insert(ref_id);
        return;
    }
    visiting.insert(ref_id);
    match value {
        Value::Array(rc) => {
            for (_, v) in &rc.borrow().entries {
                scan_refs(v, needs_slot, visiting, visited_once);
            }
        }
        Value::Object(rc) => {
            for (_, v) in &rc.borrow().fields {
                scan_refs(v, needs_slot, visiting, visited_once);
            }
        }
        Value::Placeholder(rc) => {
            scan_refs(&rc.borrow().payload, needs_slot, visiting, visited_once);
        }
        Value::Native(_) | Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
    }
    visiting.remove(&ref_id);
}

struct FlattenCtx {
    needs_slot: HashSet<RefId>,
    assigned: HashMap<RefId, usize>,
    shortcuts: Vec<WireSlot>,
}

fn flatten(value: &Value, ctx: &mut FlattenCtx) -> WireValue {
    match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::Int(*i),
        Value::Float(f) => WireValue::Float(*f),
        Value::Str(s) => WireValue::Str(s.clone()),
        Value::Native(rc) => {
            let repr = rc
                .borrow()
                .inner
                .native_repr()
                .unwrap_or(ciborium::value::Value::Null);
            WireValue::Native(repr)
        }
        Value::Array(rc) => {
            let ref_id = RefId::of(rc);
            if !ctx.needs_slot.contains(&ref_id) {
                let entries = rc
                    .borrow()
                    .entries
                    .iter()
                    .map(|(k, v)| (flatten_key(k), flatten(v, ctx)))
                    .collect();
                return WireValue::Array(entries);
            }
            if let Some(&index) = ctx.assigned.get(&ref_id) {
                return WireValue::Ref(index);
            }
            let index = reserve_slot(ctx, ref_id, WireSlot::Array(Vec::new()));
            let entries = rc
                .borrow()
                .entries
                .iter()
                .map(|(k, v)| (flatten_key(k), flatten(v, ctx)))
                .collect();
            ctx.shortcuts[index] = WireSlot::Array(entries);
            WireValue::Ref(index)
        }
        Value::Object(rc) => {
            let ref_id = RefId::of(rc);
            let body = rc.borrow();
            if !ctx.needs_slot.contains(&ref_id) {
                let fields = body
                    .fields
                    .iter()
                    .map(|(name, v)| (name.clone(), flatten(v, ctx)))
                    .collect();
                return WireValue::Object {
                    class: body.class.clone(),
                    fields,
                };
            }
            if let Some(&index) = ctx.assigned.get(&ref_id) {
                return WireValue::Ref(index);
            }
            let class = body.class.clone();
            let field_list = body.fields.clone();
            drop(body);
            let index = reserve_slot(
                ctx,
                ref_id,
                WireSlot::Object {
                    class: class.clone(),
                    fields: Vec::new(),
                },
            );
            let fields = field_list
                .iter()
                .map(|(name, v)| (name.clone(), flatten(v, ctx)))
                .collect();
            ctx.shortcuts[index] = WireSlot::Object { class, fields };
            WireValue::Ref(index)
        }
        Value::Placeholder(rc) => {
            let ref_id = RefId::of(rc);
            if let Some(&index) = ctx.assigned.get(&ref_id) {
                return WireValue::Ref(index);
            }
            let class_tag = rc.borrow().class_tag.clone();
            let index = reserve_slot(
                ctx,
                ref_id,
                WireSlot::Placeholder(WirePlaceholder {
                    class_tag: class_tag.clone(),
                    payload: WireValue::Null,
                }),
            );
            let payload_value = rc.borrow().payload.clone();
            let payload = flatten(&payload_value, ctx);
            ctx.shortcuts[index] = WireSlot::Placeholder(WirePlaceholder { class_tag, payload });
            WireValue::Ref(index)
        }
    }
}

fn reserve_slot(ctx: &mut FlattenCtx, ref_id: RefId, placeholder: WireSlot) -> usize {
    let index = ctx.shortcuts.len();
    ctx.shortcuts.push(placeholder);
    ctx.assigned.insert(ref_id, index);
    index
}

fn flatten_key(key: &Key) -> WireKey {
    match key {
        Key::Int(i) => WireKey::Int(*i),
        Key::Str(s) => WireKey::Str(s.clone()),
    }
}
