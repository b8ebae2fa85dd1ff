//! Compiled `(sid, path) -> extractor` cache.
//!
//! A path like `a.b.c` is compiled once per shape into a sequence of byte
//! offsets/variable-table lookups instead of being re-walked against the
//! shape tree (and re-decoded in full) on every document read. The compiled
//! form locates *where in the shaped bytes* the target field starts; the
//! caller still uses `shaper::shape::decode_value` to turn that slice into a
//! `serde_json::Value`, since that's the only place the string/number/array
//! decode logic lives.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::shaper::shape::{decode_value, Shape};

/// One step of a compiled path: how to get from a parent `Array` shape's
/// byte region to one of its fields' byte region.
#[derive(Debug, Clone)]
enum Locator {
    /// Field lives at a fixed byte offset from the start of the parent's
    /// region (sum of the fixed widths of the fields before it).
    Fixed(usize),
    /// Field lives in the variable-length region; its start offset (relative
    /// to the parent region) is the `slot_index`'th u32 in the offset table,
    /// which itself starts right after `fixed_prefix_len` bytes of fixed
    /// fields.
    Variable { slot_index: usize, fixed_prefix_len: usize },
}

#[derive(Debug, Clone)]
struct Step {
    locator: Locator,
    /// The shape of the field this step lands on, i.e. the parent shape for
    /// the next step (or the target shape, on the last step).
    shape: Shape,
}

/// A compiled `(sid, path)` lookup: apply `steps` in order to locate the
/// target field's byte region, then decode it with `shape`.
#[derive(Debug, Clone)]
pub struct CompiledAccessor {
    steps: Vec<Step>,
    shape: Shape,
}

impl CompiledAccessor {
    /// Locate and decode the target field out of a document's full shaped
    /// bytes. Returns `Ok(None)` only if the path cannot be resolved against
    /// these particular bytes (which should not happen for bytes produced
    /// under the same shape this accessor was compiled against).
    pub fn extract(&self, bytes: &[u8], names: &dyn Fn(u64) -> Option<String>) -> Result<Value> {
        let mut region = bytes;
        for step in &self.steps {
            let offset = match &step.locator {
                Locator::Fixed(offset) => *offset,
                Locator::Variable { slot_index, fixed_prefix_len } => {
                    let table_offset = fixed_prefix_len + slot_index * 4;
                    let slot = region.get(table_offset..table_offset + 4).ok_or_else(|| {
                        StorageError::CorruptedDatafile("accessor offset table truncated".into())
                    })?;
                    u32::from_le_bytes(slot.try_into().unwrap()) as usize
                }
            };
            region = region
                .get(offset..)
                .ok_or_else(|| StorageError::CorruptedDatafile("accessor offset out of range".into()))?;
        }
        decode_value(region, &self.shape, names)
    }
}

/// Compile `path` (a sequence of attribute ids, outermost first) against
/// `root`, returning `None` if the path does not exist in this shape (e.g.
/// it names a field the shape doesn't have, or descends into a non-object).
fn compile(root: &Shape, path: &[u64]) -> Option<CompiledAccessor> {
    let mut steps = Vec::with_capacity(path.len());
    let mut current = root;
    for &aid in path {
        let fields = match current {
            Shape::Array { fields } => fields,
            _ => return None,
        };
        let field_index = fields.iter().position(|(id, _)| *id == aid)?;
        let (_, field_shape) = &fields[field_index];

        let fixed_prefix_len: usize = fields
            .iter()
            .take(field_index)
            .filter(|(_, s)| s.is_fixed_size())
            .map(|(_, s)| s.fixed_width().unwrap_or(0))
            .sum();

        let locator = if field_shape.is_fixed_size() {
            Locator::Fixed(fixed_prefix_len)
        } else {
            let slot_index = fields
                .iter()
                .take(field_index)
                .filter(|(_, s)| !s.is_fixed_size())
                .count();
            // `fixed_prefix_len` here must be the *total* fixed-region
            // length (every fixed field, not just those before this one)
            // since the offset table starts right after it.
            let total_fixed_len: usize = fields
                .iter()
                .filter(|(_, s)| s.is_fixed_size())
                .map(|(_, s)| s.fixed_width().unwrap_or(0))
                .sum();
            Locator::Variable { slot_index, fixed_prefix_len: total_fixed_len }
        };

        steps.push(Step { locator, shape: field_shape.clone() });
        current = field_shape;
    }
    Some(CompiledAccessor { steps, shape: current.clone() })
}

/// Process-wide cache of compiled accessors, keyed by `(sid, path)`.
/// Independent of (never locked together with) the attribute or shape
/// dictionary mutexes.
#[derive(Default)]
pub struct AccessorCache {
    compiled: Mutex<HashMap<(u64, Vec<u64>), Option<CompiledAccessor>>>,
}

impl AccessorCache {
    pub fn new() -> Self {
        Self { compiled: Mutex::new(HashMap::new()) }
    }

    /// Get (compiling and caching on first use) the accessor for `sid`'s
    /// `path`, then immediately apply it to `bytes`.
    pub fn extract(
        &self,
        sid: u64,
        path: &[u64],
        root: &Shape,
        bytes: &[u8],
        names: &dyn Fn(u64) -> Option<String>,
    ) -> Result<Option<Value>> {
        let key = (sid, path.to_vec());
        let mut cache = self.compiled.lock().unwrap();
        let entry = cache.entry(key).or_insert_with(|| compile(root, path));
        match entry {
            Some(accessor) => accessor.extract(bytes, names).map(Some),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.compiled.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaper::attribute::AttributeDictionary;
    use serde_json::json;

    #[test]
    fn extracts_fixed_field_from_top_level() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let value = json!({"a": 1.0, "b": 2.0});
        let shape = Shape::infer(&value, &attrs).unwrap();
        let a = attrs.find_or_insert("a").unwrap();

        let names = attrs.clone_names_for_test();
        let name_lookup = |aid: u64| names.get(&aid).cloned();
        let bytes = crate::shaper::shape::encode_value(&value, &shape, &name_lookup).unwrap();

        let cache = AccessorCache::new();
        let extracted = cache
            .extract(1, &[a], &shape, &bytes, &name_lookup)
            .unwrap()
            .unwrap();
        assert_eq!(extracted, json!(1.0));
    }

    #[test]
    fn extracts_variable_field_via_offset_table() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let value = json!({"a": 1.0, "name": "a very long string indeed"});
        let shape = Shape::infer(&value, &attrs).unwrap();
        let name_aid = attrs.find_or_insert("name").unwrap();

        let names = attrs.clone_names_for_test();
        let name_lookup = |aid: u64| names.get(&aid).cloned();
        let bytes = crate::shaper::shape::encode_value(&value, &shape, &name_lookup).unwrap();

        let cache = AccessorCache::new();
        let extracted = cache
            .extract(2, &[name_aid], &shape, &bytes, &name_lookup)
            .unwrap()
            .unwrap();
        assert_eq!(extracted, json!("a very long string indeed"));
    }

    #[test]
    fn unknown_path_returns_none() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let value = json!({"a": 1.0});
        let shape = Shape::infer(&value, &attrs).unwrap();
        let missing = attrs.find_or_insert("nope").unwrap();

        let cache = AccessorCache::new();
        let result = cache
            .extract(3, &[missing], &shape, &[], &|_| None)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn repeated_extraction_reuses_compiled_entry() {
        let attrs = AttributeDictionary::new_in_memory_for_test();
        let value = json!({"a": 1.0});
        let shape = Shape::infer(&value, &attrs).unwrap();
        let a = attrs.find_or_insert("a").unwrap();
        let names = attrs.clone_names_for_test();
        let name_lookup = |aid: u64| names.get(&aid).cloned();
        let bytes = crate::shaper::shape::encode_value(&value, &shape, &name_lookup).unwrap();

        let cache = AccessorCache::new();
        for _ in 0..5 {
            cache.extract(4, &[a], &shape, &bytes, &name_lookup).unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
