//! The shape dictionary: a persistent, process-wide
//! registry mapping attribute names and value shapes to stable integer ids,
//! giving every document a compact self-describing binary representation.
//!
//! Wires together [`attribute::AttributeDictionary`], [`shape::ShapeDictionary`]
//! and [`accessor::AccessorCache`] over a dedicated [`Datafile`], following
//! the same "append a marker, then update the in-memory index" discipline as
//! the primary collection's write path.

pub mod accessor;
pub mod attribute;
pub mod compare;
pub mod shape;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::datafile::file::Datafile;
use crate::datafile::marker::{AttributeMarkerBody, MarkerType, MarkerUuid, ShapeMarkerBody};
use crate::error::{Result, StorageError};
use crate::sequence::SequenceGenerator;
use crate::shaper::accessor::AccessorCache;
use crate::shaper::attribute::AttributeDictionary;
use crate::shaper::shape::{Shape, ShapeDictionary};

/// Default size of a shaper's own datafile (`SHAPES/` directory, §6.1):
/// attribute and shape markers are tiny and rare relative to document
/// markers, so this is far smaller than a typical collection journal.
pub const DEFAULT_SHAPE_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// The shaper. One instance per collection (mirroring `SHAPES/` being a
/// subdirectory of each collection directory in §6.1), though nothing
/// prevents sharing one across collections that want a common vocabulary.
pub struct Shaper {
    attributes: AttributeDictionary,
    shapes: Mutex<ShapeDictionary>,
    accessors: AccessorCache,
    datafile: Mutex<Datafile>,
    sequence: Arc<SequenceGenerator>,
    server_id: u64,
}

impl Shaper {
    /// Create a brand-new shaper backed by a fresh datafile at `path`.
    pub fn create(
        path: &Path,
        server_id: u64,
        sequence: Arc<SequenceGenerator>,
    ) -> Result<Self> {
        let fid = sequence.new_tick();
        let datafile = Datafile::create(Some(path), DEFAULT_SHAPE_FILE_SIZE, fid, server_id)?;
        Ok(Self {
            attributes: AttributeDictionary::new(),
            shapes: Mutex::new(ShapeDictionary::new()),
            accessors: AccessorCache::new(),
            datafile: Mutex::new(datafile),
            sequence,
            server_id,
        })
    }

    /// Re-open a shaper whose datafile already exists, replaying every
    /// attribute/shape marker to rebuild the in-memory dictionaries.
    pub fn open(path: &Path, server_id: u64, sequence: Arc<SequenceGenerator>) -> Result<Self> {
        let datafile = Datafile::open(path)?;
        let attributes = AttributeDictionary::new();
        let mut shapes = ShapeDictionary::new();

        datafile.iterate(|header, body| {
            sequence.observe(header.uuid.sequence);
            match header.marker_type {
                MarkerType::Attribute => {
                    let decoded = AttributeMarkerBody::decode(body)?;
                    attributes.reload(decoded.aid, &decoded.name);
                }
                MarkerType::Shape => {
                    let decoded = ShapeMarkerBody::decode(body)?;
                    shapes.reload(decoded.sid, decoded.shape_bytes)?;
                }
                _ => {}
            }
            Ok(())
        })?;
        attributes.rebuild_weights();

        Ok(Self {
            attributes,
            shapes: Mutex::new(shapes),
            accessors: AccessorCache::new(),
            datafile: Mutex::new(datafile),
            sequence,
            server_id,
        })
    }

    fn next_uuid(&self) -> MarkerUuid {
        MarkerUuid::new(self.server_id, self.sequence.new_tick())
    }

    /// Find `name`'s aid, persisting a fresh attribute marker and
    /// rebalancing weights on first sight.
    pub fn find_or_insert_attribute(&self, name: &str) -> Result<u64> {
        self.attributes.find_or_insert_with(name, |aid, weight, name| {
            debug!(aid, weight, name, "shaper: inserting new attribute");
            let uuid = self.next_uuid();
            let marker = AttributeMarkerBody { aid, weight, name: name.to_string() }.encode(uuid, true);
            let mut datafile = self.datafile.lock().unwrap();
            let reservation = datafile.reserve(marker.len())?;
            datafile.write(reservation, &marker, false)
        })
    }

    /// Find `shape`'s sid, persisting a fresh shape marker on first sight.
    pub fn find_or_insert_shape(&self, shape: Shape) -> Result<u64> {
        let mut shapes = self.shapes.lock().unwrap();
        shapes.find_or_insert_with(shape, |sid, shape_bytes| {
            debug!(sid, bytes = shape_bytes.len(), "shaper: inserting new shape");
            let uuid = self.next_uuid();
            let marker = ShapeMarkerBody { sid, shape_bytes: shape_bytes.to_vec() }.encode(uuid, true);
            let mut datafile = self.datafile.lock().unwrap();
            let reservation = datafile.reserve(marker.len())?;
            datafile.write(reservation, &marker, false)
        })
    }

    /// Infer `value`'s shape (registering any new attribute names along the
    /// way), intern it, and return `(sid, shape)`.
    pub fn shape_of(&self, value: &Value) -> Result<(u64, Shape)> {
        let shape = Shape::infer(value, &self.attributes)?;
        let sid = self.find_or_insert_shape(shape.clone())?;
        Ok((sid, shape))
    }

    /// Encode `value` into its shaped binary body under `shape`.
    pub fn encode(&self, value: &Value, shape: &Shape) -> Result<Vec<u8>> {
        shape::encode_value(value, shape, &|aid| self.attributes.name_of(aid))
    }

    /// Decode a shaped binary body back into a `serde_json::Value`, given
    /// its shape id.
    pub fn decode(&self, bytes: &[u8], sid: u64) -> Result<Value> {
        let shape = self
            .shape_by_id(sid)
            .ok_or_else(|| StorageError::CorruptedDatafile(format!("unknown shape id {sid}")))?;
        shape::decode_value(bytes, &shape, &|aid| self.attributes.name_of(aid))
    }

    /// Look up an already-registered shape by id.
    pub fn shape_by_id(&self, sid: u64) -> Option<Shape> {
        self.shapes.lock().unwrap().get(sid).cloned()
    }

    pub fn attribute_name(&self, aid: u64) -> Option<String> {
        self.attributes.name_of(aid)
    }

    pub fn attribute_weight(&self, aid: u64) -> Option<i64> {
        self.attributes.weight_of(aid)
    }

    /// Recursively register every object key in `value` as an attribute
    /// name and return an equivalent value. Kept mostly for its side effect
    /// of interning attribute names ahead of `shape_of`/`encode`; it does
    /// *not* establish any ordering contract on `value`'s encoding, since
    /// `serde_json::Map` is a `BTreeMap` and re-sorts inserted pairs
    /// lexicographically regardless of what order they're inserted in.
    /// `shape::encode_value` looks fields up by name, not position, so no
    /// such contract is needed.
    pub fn sort_document(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Object(map) => {
                let mut pairs: Vec<(u64, String, Value)> = map
                    .iter()
                    .map(|(k, v)| Ok((self.attributes.find_or_insert(k)?, k.clone(), self.sort_document(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                pairs.sort_by_key(|(aid, _, _)| *aid);
                let mut out = serde_json::Map::new();
                for (_, k, v) in pairs {
                    out.insert(k, v);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sort_document(v)).collect::<Result<Vec<_>>>()?)
            }
            other => other.clone(),
        })
    }

    /// Extract a single field at `path` (a list of attribute names,
    /// outermost first) out of an already-shaped document, without
    /// decoding the whole thing, via the memoised accessor cache.
    pub fn extract(&self, sid: u64, path: &[&str], bytes: &[u8]) -> Result<Option<Value>> {
        let shape = self
            .shape_by_id(sid)
            .ok_or_else(|| StorageError::CorruptedDatafile(format!("unknown shape id {sid}")))?;
        let path_aids: Option<Vec<u64>> = path.iter().map(|name| self.attributes.lookup(name)).collect();
        let Some(path_aids) = path_aids else { return Ok(None) };
        self.accessors
            .extract(sid, &path_aids, &shape, bytes, &|aid| self.attributes.name_of(aid))
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.lock().unwrap().len()
    }

    pub fn accessor_cache_len(&self) -> usize {
        self.accessors.len()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.datafile.lock().unwrap().path().map(|p| p.to_path_buf())
    }
}
