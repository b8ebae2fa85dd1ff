//! Shapes: content-addressed descriptions of a JSON value's structure, plus
//! the codec that turns a `serde_json::Value` into its shaped binary body
//! given a shape, and back.
//!
//! A shape is computed once per distinct structure and shared by every value
//! with that structure (the `shape_dictionary`). Two values share a shape
//! iff their canonical shape bytes are byte-equal, which is exactly the
//! comparison `ShapeDictionary::find_or_insert` performs.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::shaper::attribute::AttributeDictionary;

/// Short strings are stored inline in a fixed-size slot; anything longer is
/// a variable-size "long string" located via the array offset table (or, at
/// the top level, just appended after the shape marker, with its own length
/// prefix).
pub const SHORT_STRING_MAX: usize = 7;

/// A value's structural shape. Content-addressed: identical shapes share one
/// `sid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Null,
    Boolean,
    Number,
    ShortString,
    LongString,
    /// Heterogeneous list: each element carries its own shape id inline.
    List,
    /// Every element shares one child shape.
    HomogeneousList { element: Box<Shape> },
    /// Every element shares one *fixed-size* child shape and there are a
    /// known number of them -- the common case for e.g. a 3-vector.
    HomogeneousSizedList { element: Box<Shape>, length: usize },
    /// An object. Attributes are sorted by attribute id so two objects with
    /// the same keys in different insertion order produce the same shape.
    Array { fields: Vec<(u64, Shape)> },
}

impl Shape {
    /// Whether every instance of this shape occupies a fixed number of
    /// bytes, which lets an `Array` shape lay the field out inline instead
    /// of through the offset table.
    pub fn is_fixed_size(&self) -> bool {
        match self {
            Shape::Null => true,
            Shape::Boolean => true,
            Shape::Number => true,
            Shape::ShortString => true,
            Shape::LongString => false,
            Shape::List => false,
            Shape::HomogeneousList { .. } => false,
            Shape::HomogeneousSizedList { element, length } => {
                element.is_fixed_size() && *length > 0
            }
            Shape::Array { fields } => fields.iter().all(|(_, s)| s.is_fixed_size()),
        }
    }

    /// Byte width of one instance, for fixed-size shapes only.
    pub(crate) fn fixed_width(&self) -> Option<usize> {
        if !self.is_fixed_size() {
            return None;
        }
        Some(match self {
            Shape::Null => 0,
            Shape::Boolean => 1,
            Shape::Number => 8,
            Shape::ShortString => SHORT_STRING_MAX + 1, // +1 length byte
            Shape::HomogeneousSizedList { element, length } => {
                element.fixed_width().unwrap_or(0) * length
            }
            Shape::Array { fields } => fields
                .iter()
                .map(|(_, s)| s.fixed_width().unwrap_or(0))
                .sum(),
            _ => unreachable!("non fixed-size shape reached fixed_width"),
        })
    }

    /// A stable numeric discriminant used in the canonical byte encoding and
    /// in the type-ordering half of the comparison contract.
    pub(crate) fn type_order(&self) -> u8 {
        match self {
            Shape::Null => 1,
            Shape::Boolean => 2,
            Shape::Number => 3,
            Shape::ShortString | Shape::LongString => 4,
            Shape::List | Shape::HomogeneousList { .. } | Shape::HomogeneousSizedList { .. } => 5,
            Shape::Array { .. } => 6,
        }
    }

    /// Infer the shape of `value`, registering any attribute names it
    /// introduces with `attributes`. Shapes are inferred bottom-up so that
    /// content-addressing is purely structural.
    pub fn infer(value: &Value, attributes: &AttributeDictionary) -> Result<Shape> {
        Ok(match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Boolean,
            Value::Number(_) => Shape::Number,
            Value::String(s) if s.len() <= SHORT_STRING_MAX => Shape::ShortString,
            Value::String(_) => Shape::LongString,
            Value::Array(items) => {
                if items.is_empty() {
                    Shape::List
                } else {
                    let first = Shape::infer(&items[0], attributes)?;
                    let homogeneous = items[1..]
                        .iter()
                        .map(|v| Shape::infer(v, attributes))
                        .collect::<Result<Vec<_>>>()?
                        .iter()
                        .all(|s| *s == first);
                    if homogeneous && first.is_fixed_size() {
                        Shape::HomogeneousSizedList {
                            element: Box::new(first),
                            length: items.len(),
                        }
                    } else if homogeneous {
                        Shape::HomogeneousList {
                            element: Box::new(first),
                        }
                    } else {
                        Shape::List
                    }
                }
            }
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, v) in map {
                    let aid = attributes.find_or_insert(key)?;
                    fields.push((aid, Shape::infer(v, attributes)?));
                }
                fields.sort_by_key(|(aid, _)| *aid);
                Shape::Array { fields }
            }
        })
    }

    /// Canonical byte encoding of the shape's *structure* (not any instance
    /// value). This is the content-addressing key in `ShapeDictionary`.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Shape::Null => out.push(1),
            Shape::Boolean => out.push(2),
            Shape::Number => out.push(3),
            Shape::ShortString => out.push(4),
            Shape::LongString => out.push(5),
            Shape::List => out.push(6),
            Shape::HomogeneousList { element } => {
                out.push(7);
                element.write_canonical(out);
            }
            Shape::HomogeneousSizedList { element, length } => {
                out.push(8);
                out.extend_from_slice(&(*length as u64).to_le_bytes());
                element.write_canonical(out);
            }
            Shape::Array { fields } => {
                out.push(9);
                out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
                for (aid, shape) in fields {
                    out.extend_from_slice(&aid.to_le_bytes());
                    shape.write_canonical(out);
                }
            }
        }
    }

    /// Parse the structure back out of canonical bytes (used when the
    /// shaper reloads its persisted shape dictionary on open).
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Shape> {
        let mut cursor = 0usize;
        let shape = Self::read_canonical(bytes, &mut cursor)?;
        Ok(shape)
    }

    fn read_canonical(bytes: &[u8], cursor: &mut usize) -> Result<Shape> {
        let take = |cursor: &mut usize, n: usize| -> Result<&[u8]> {
            if *cursor + n > bytes.len() {
                return Err(StorageError::CorruptedDatafile("shape bytes truncated".into()));
            }
            let slice = &bytes[*cursor..*cursor + n];
            *cursor += n;
            Ok(slice)
        };
        let kind = take(cursor, 1)?[0];
        Ok(match kind {
            1 => Shape::Null,
            2 => Shape::Boolean,
            3 => Shape::Number,
            4 => Shape::ShortString,
            5 => Shape::LongString,
            6 => Shape::List,
            7 => {
                let element = Self::read_canonical(bytes, cursor)?;
                Shape::HomogeneousList {
                    element: Box::new(element),
                }
            }
            8 => {
                let len_bytes = take(cursor, 8)?;
                let length = u64::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
                let element = Self::read_canonical(bytes, cursor)?;
                Shape::HomogeneousSizedList {
                    element: Box::new(element),
                    length,
                }
            }
            9 => {
                let count_bytes = take(cursor, 4)?;
                let count = u32::from_le_bytes(count_bytes.try_into().unwrap()) as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    let aid_bytes = take(cursor, 8)?;
                    let aid = u64::from_le_bytes(aid_bytes.try_into().unwrap());
                    let shape = Self::read_canonical(bytes, cursor)?;
                    fields.push((aid, shape));
                }
                Shape::Array { fields }
            }
            _ => {
                return Err(StorageError::CorruptedDatafile(format!(
                    "unknown shape type discriminant {kind}"
                )))
            }
        })
    }
}

/// The dictionary of distinct shapes seen by a shaper, content-addressed by
/// the `blake3` hash of `Shape::to_canonical_bytes()` (with full-bytes
/// equality as the tiebreak for hash collisions).
#[derive(Default)]
pub struct ShapeDictionary {
    by_hash: HashMap<[u8; 32], Vec<u64>>,
    by_id: Vec<(Shape, Vec<u8>)>,
    next_sid: u64,
}

impl ShapeDictionary {
    pub fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_id: Vec::new(),
            // sid 0 is reserved (never assigned) so a default/zeroed field
            // unambiguously means "no shape yet".
            next_sid: 1,
        }
    }

    /// Re-seed from a shape marker read back from the shaper's datafile
    /// during recovery: the sid is already fixed, just register it.
    pub fn reload(&mut self, sid: u64, canonical_bytes: Vec<u8>) -> Result<()> {
        let shape = Shape::from_canonical_bytes(&canonical_bytes)?;
        let hash = blake3::hash(&canonical_bytes);
        self.by_hash.entry(*hash.as_bytes()).or_default().push(sid);
        if self.by_id.len() <= sid as usize {
            self.by_id.resize_with(sid as usize + 1, || (Shape::Null, Vec::new()));
        }
        self.by_id[sid as usize] = (shape, canonical_bytes);
        if sid >= self.next_sid {
            self.next_sid = sid + 1;
        }
        Ok(())
    }

    /// Look up an existing shape by id, resulting from `find_or_insert`.
    pub fn get(&self, sid: u64) -> Option<&Shape> {
        self.by_id.get(sid as usize).map(|(s, _)| s)
    }

    /// Find the sid for a shape already in the dictionary, if present.
    pub fn find(&self, shape: &Shape) -> Option<u64> {
        let bytes = shape.to_canonical_bytes();
        let hash = blake3::hash(&bytes);
        self.by_hash.get(hash.as_bytes()).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|&sid| self.by_id[sid as usize].1 == bytes)
        })
    }

    /// Insert a brand-new shape, returning its freshly assigned sid and its
    /// canonical bytes (for the caller to persist as a shape marker).
    pub fn insert_new(&mut self, shape: Shape) -> (u64, Vec<u8>) {
        let bytes = shape.to_canonical_bytes();
        let sid = self.next_sid;
        self.next_sid += 1;
        let hash = blake3::hash(&bytes);
        self.by_hash.entry(*hash.as_bytes()).or_default().push(sid);
        self.by_id.push((shape, bytes.clone()));
        (sid, bytes)
    }

    /// Find `shape`'s sid, inserting (and running `on_insert` with the
    /// freshly assigned sid and canonical bytes) only if it's new. Mirrors
    /// [`AttributeDictionary::find_or_insert_with`]; the shape mutex this
    /// guards is the caller's (the shaper wraps the whole dictionary in a
    /// `Mutex` since, unlike the attribute dictionary, none of its methods
    /// are internally synchronised).
    pub fn find_or_insert_with<F>(&mut self, shape: Shape, on_insert: F) -> Result<u64>
    where
        F: FnOnce(u64, &[u8]) -> Result<()>,
    {
        if let Some(sid) = self.find(&shape) {
            return Ok(sid);
        }
        let bytes = shape.to_canonical_bytes();
        let sid = self.next_sid;
        on_insert(sid, &bytes)?;
        self.next_sid += 1;
        let hash = blake3::hash(&bytes);
        self.by_hash.entry(*hash.as_bytes()).or_default().push(sid);
        self.by_id.push((shape, bytes));
        Ok(sid)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ── Value codec ──────────────────────────────────────────────────────

/// Encode `value` into its shaped binary body, given the (already inferred)
/// `shape`. Fixed-size fields of an `Array` shape are laid out contiguously;
/// variable-size fields are laid out via a trailing offset table. `names`
/// resolves an attribute id back to the key it was interned from, so each
/// `Array` field can be looked up in `value`'s object by name rather than by
/// position -- `fields` is sorted by attribute id (`Shape::infer`), which
/// does not in general match `serde_json::Map`'s (lexicographic) iteration
/// order, so a positional zip would pair fields with the wrong values.
pub fn encode_value(value: &Value, shape: &Shape, names: &dyn Fn(u64) -> Option<String>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(value, shape, names, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, shape: &Shape, names: &dyn Fn(u64) -> Option<String>, out: &mut Vec<u8>) -> Result<()> {
    match (value, shape) {
        (Value::Null, Shape::Null) => {}
        (Value::Bool(b), Shape::Boolean) => out.push(if *b { 1 } else { 0 }),
        (Value::Number(n), Shape::Number) => {
            let f = n.as_f64().ok_or_else(|| {
                StorageError::InvalidMarker("number shape value not representable as f64".into())
            })?;
            out.extend_from_slice(&f.to_le_bytes());
        }
        (Value::String(s), Shape::ShortString) => {
            let mut buf = [0u8; SHORT_STRING_MAX];
            let bytes = s.as_bytes();
            buf[..bytes.len()].copy_from_slice(bytes);
            out.push(bytes.len() as u8);
            out.extend_from_slice(&buf);
        }
        (Value::String(s), Shape::LongString) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        (Value::Array(items), Shape::List) => {
            // Heterogeneous: count, then (sid placeholder, length, bytes) is
            // left to the caller (the shaper), since encoding needs access
            // to the shape dictionary to assign per-element sids. Here we
            // only support the case where the shaper has pre-flattened each
            // element to `(Shape, Value)`; for a bare List shape with no
            // further structure we just encode raw JSON per element.
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                let bytes = serde_json::to_vec(item)?;
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(&bytes);
            }
        }
        (Value::Array(items), Shape::HomogeneousList { element }) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(item, element, names, out)?;
            }
        }
        (Value::Array(items), Shape::HomogeneousSizedList { element, length }) => {
            if items.len() != *length {
                return Err(StorageError::InvalidMarker(
                    "array length does not match homogeneous-sized-list shape".into(),
                ));
            }
            for item in items {
                write_value(item, element, names, out)?;
            }
        }
        (Value::Object(map), Shape::Array { fields }) => {
            write_object(map, fields, names, out)?;
        }
        _ => {
            return Err(StorageError::InvalidMarker(
                "value does not match the shape it was inferred against".into(),
            ))
        }
    }
    Ok(())
}

fn write_object(
    map: &serde_json::Map<String, Value>,
    fields: &[(u64, Shape)],
    names: &dyn Fn(u64) -> Option<String>,
    out: &mut Vec<u8>,
) -> Result<()> {
    // `fields` is sorted by attribute id (`Shape::infer`), which does not in
    // general agree with `map`'s (lexicographic, since `serde_json::Map` is a
    // `BTreeMap` without the `preserve_order` feature) iteration order, so a
    // positional zip would pair each field with the wrong attribute's value.
    // Resolve each field's id back to its name and index `map` directly.
    if map.len() != fields.len() {
        return Err(StorageError::InvalidMarker(
            "object key count does not match array shape field count".into(),
        ));
    }

    let mut fixed = Vec::new();
    let mut variable = Vec::new();
    for (aid, shape) in fields {
        let name = names(*aid).ok_or_else(|| {
            StorageError::InvalidMarker(format!("no attribute name registered for aid {aid}"))
        })?;
        let value = map.get(&name).ok_or_else(|| {
            StorageError::InvalidMarker(format!("object missing field {name:?} required by its shape"))
        })?;
        if shape.is_fixed_size() {
            write_value(value, shape, names, &mut fixed)?;
        } else {
            let mut buf = Vec::new();
            write_value(value, shape, names, &mut buf)?;
            variable.push(buf);
        }
    }

    let offset_table_len = variable.len() * 4;
    let mut offsets = Vec::with_capacity(offset_table_len);
    let mut running = fixed.len() + offset_table_len;
    for v in &variable {
        offsets.extend_from_slice(&(running as u32).to_le_bytes());
        running += v.len();
    }

    out.extend_from_slice(&fixed);
    out.extend_from_slice(&offsets);
    for v in variable {
        out.extend_from_slice(&v);
    }
    Ok(())
}

/// Decode a shaped binary body back into a `serde_json::Value`, given the
/// shape and (for objects) the attribute names resolved from their ids.
pub fn decode_value(bytes: &[u8], shape: &Shape, names: &dyn Fn(u64) -> Option<String>) -> Result<Value> {
    let mut cursor = 0usize;
    read_value(bytes, shape, &mut cursor, names)
}

fn read_value(
    bytes: &[u8],
    shape: &Shape,
    cursor: &mut usize,
    names: &dyn Fn(u64) -> Option<String>,
) -> Result<Value> {
    let remaining = |cursor: &usize| -> Result<&[u8]> {
        bytes
            .get(*cursor..)
            .ok_or_else(|| StorageError::CorruptedDatafile("shaped body truncated".into()))
    };
    Ok(match shape {
        Shape::Null => Value::Null,
        Shape::Boolean => {
            let b = remaining(cursor)?[0] != 0;
            *cursor += 1;
            Value::Bool(b)
        }
        Shape::Number => {
            let slice = &remaining(cursor)?[..8];
            let f = f64::from_le_bytes(slice.try_into().unwrap());
            *cursor += 8;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        Shape::ShortString => {
            let len = remaining(cursor)?[0] as usize;
            *cursor += 1;
            let slice = &remaining(cursor)?[..SHORT_STRING_MAX];
            let s = String::from_utf8_lossy(&slice[..len]).into_owned();
            *cursor += SHORT_STRING_MAX;
            Value::String(s)
        }
        Shape::LongString => {
            let len_bytes = &remaining(cursor)?[..4];
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            *cursor += 4;
            let slice = &remaining(cursor)?[..len];
            let s = String::from_utf8_lossy(slice).into_owned();
            *cursor += len;
            Value::String(s)
        }
        Shape::List => {
            let len_bytes = &remaining(cursor)?[..4];
            let count = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            *cursor += 4;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let len_bytes = &remaining(cursor)?[..4];
                let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
                *cursor += 4;
                let slice = &remaining(cursor)?[..len];
                items.push(serde_json::from_slice(slice)?);
                *cursor += len;
            }
            Value::Array(items)
        }
        Shape::HomogeneousList { element } => {
            let len_bytes = &remaining(cursor)?[..4];
            let count = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            *cursor += 4;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(bytes, element, cursor, names)?);
            }
            Value::Array(items)
        }
        Shape::HomogeneousSizedList { element, length } => {
            let mut items = Vec::with_capacity(*length);
            for _ in 0..*length {
                items.push(read_value(bytes, element, cursor, names)?);
            }
            Value::Array(items)
        }
        Shape::Array { fields } => {
            let mut map = serde_json::Map::new();
            let fixed_fields: Vec<&(u64, Shape)> = fields.iter().filter(|(_, s)| s.is_fixed_size()).collect();
            let variable_fields: Vec<&(u64, Shape)> =
                fields.iter().filter(|(_, s)| !s.is_fixed_size()).collect();

            for (aid, field_shape) in &fixed_fields {
                let value = read_value(bytes, field_shape, cursor, names)?;
                let name = names(*aid).unwrap_or_else(|| format!("attr{aid}"));
                map.insert(name, value);
            }

            let offsets_start = *cursor;
            *cursor += variable_fields.len() * 4;
            for (i, (aid, field_shape)) in variable_fields.iter().enumerate() {
                let off_bytes = &bytes[offsets_start + i * 4..offsets_start + i * 4 + 4];
                let offset = u32::from_le_bytes(off_bytes.try_into().unwrap()) as usize;
                let mut sub_cursor = offset;
                let value = read_value(bytes, field_shape, &mut sub_cursor, names)?;
                let name = names(*aid).unwrap_or_else(|| format!("attr{aid}"));
                map.insert(name, value);
            }
            Value::Object(map)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_structures_share_shape() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let a = Shape::infer(&json!({"a": 1, "b": 2}), &attrs).unwrap();
        let b = Shape::infer(&json!({"b": 20, "a": 10}), &attrs).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_canonical_bytes(), b.to_canonical_bytes());
    }

    #[test]
    fn adding_a_field_changes_shape() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let a = Shape::infer(&json!({"a": 1, "b": 2}), &attrs).unwrap();
        let c = Shape::infer(&json!({"a": 1, "b": 2, "c": 3}), &attrs).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn shape_dictionary_dedups_by_content() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let shape = Shape::infer(&json!({"x": 1}), &attrs).unwrap();
        let mut dict = ShapeDictionary::new();
        let (sid1, _) = dict.insert_new(shape.clone());
        assert_eq!(dict.find(&shape), Some(sid1));
    }

    #[test]
    fn value_round_trips_through_shaped_bytes() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let value = json!({"a": 1.0, "b": "hi"});
        let shape = Shape::infer(&value, &attrs).unwrap();

        let names_table = attrs.clone_names_for_test();
        let names = |aid: u64| names_table.get(&aid).cloned();
        let bytes = encode_value(&value, &shape, &names).unwrap();
        let decoded = decode_value(&bytes, &shape, &names).unwrap();
        assert_eq!(decoded, value);
    }

    /// Attribute ids are assigned in first-sight order, which here is the
    /// opposite of the object's own (lexicographic) key order: `value`
    /// (aid 0), then `name` (aid 1), then `age` (aid 2) is registered from an
    /// unrelated document. `fields` (sorted by aid) and a `BTreeMap`-backed
    /// `serde_json::Map`'s iteration (sorted by name) then disagree, which is
    /// exactly the case a positional field/value zip would get wrong.
    #[test]
    fn round_trips_when_attribute_ids_disagree_with_lexicographic_key_order() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        attrs.find_or_insert("value").unwrap();
        attrs.find_or_insert("name").unwrap();
        attrs.find_or_insert("age").unwrap();

        let value = json!({"age": 10, "name": "x", "value": true});
        let shape = Shape::infer(&value, &attrs).unwrap();

        let names_table = attrs.clone_names_for_test();
        let names = |aid: u64| names_table.get(&aid).cloned();
        let bytes = encode_value(&value, &shape, &names).unwrap();
        let decoded = decode_value(&bytes, &shape, &names).unwrap();
        assert_eq!(decoded, value);
    }
}
