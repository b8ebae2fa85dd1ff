//! One-shot conversion from legacy (pre-key-marker) marker layouts to the
//! current key-bearing format.
//!
//! Legacy markers identify documents by a numeric `did` instead of a string
//! key; the converters below synthesise a key from the decimal `did` and
//! rebuild the offsets the current layout expects. Conversion never mutates
//! in place: the caller receives fresh bytes and writes them to a new file,
//! advancing the sequence generator to the legacy tick along the way.

use crate::datafile::marker::{KeyDeletionBody, KeyDocumentBody, KeyEdgeBody, MarkerUuid};
use crate::error::{Result, StorageError};
use crate::sequence::SequenceGenerator;

/// Legacy marker type discriminants, matching the 1.1 on-disk `_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMarkerType {
    V11Document,
    V11Edge,
    V11Deletion,
}

/// The fixed `base_marker_t` header common to every 1.1 marker: size(u32),
/// crc(u32), type(u32), [4 bytes padding on some builds], tick(u64).
struct LegacyBaseHeader {
    size: u32,
    tick: u64,
}

const LEGACY_BASE_HEADER_SIZE: usize = 24;

fn read_legacy_base_header(bytes: &[u8]) -> Result<LegacyBaseHeader> {
    if bytes.len() < LEGACY_BASE_HEADER_SIZE {
        return Err(StorageError::InvalidMarker(
            "legacy marker shorter than base header".into(),
        ));
    }
    let size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let tick = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    Ok(LegacyBaseHeader { size, tick })
}

/// Convert one legacy marker (`legacy_bytes`, exactly `marker_type`'s shape)
/// into the current key-bearing wire format. Advances `sequence` to at least
/// the legacy tick so newly-minted ids after the upgrade stay monotonic.
///
/// Only the 1.1 family is implemented: the 1.2 field layout in the upstream
/// source was never uncommented, so without a real 1.2 dataset to validate
/// offsets against, guessing them here would silently corrupt data instead
/// of failing loudly. Callers hitting 1.2 markers get `NotImplemented`.
pub fn migrate_marker(
    marker_type: LegacyMarkerType,
    legacy_bytes: &[u8],
    server_id: u64,
    sequence: &SequenceGenerator,
) -> Result<Vec<u8>> {
    let base = read_legacy_base_header(legacy_bytes)?;
    if base.size as usize > legacy_bytes.len() {
        return Err(StorageError::InvalidMarker(
            "legacy marker declared size exceeds buffer".into(),
        ));
    }
    sequence.observe(base.tick);
    let uuid = MarkerUuid::new(server_id, base.tick);

    match marker_type {
        LegacyMarkerType::V11Document => migrate_v11_document(legacy_bytes, uuid),
        LegacyMarkerType::V11Edge => migrate_v11_edge(legacy_bytes, uuid),
        LegacyMarkerType::V11Deletion => migrate_v11_deletion(legacy_bytes, uuid),
    }
}

// 1.1 `doc_document_marker_t` body, after the 24-byte base header:
// did(u64) rid(u64) sid(u64) shape(u64) = 32 bytes, then the shaped json body.
const V11_DOC_PREFIX: usize = LEGACY_BASE_HEADER_SIZE + 32;

fn migrate_v11_document(legacy_bytes: &[u8], uuid: MarkerUuid) -> Result<Vec<u8>> {
    if legacy_bytes.len() < V11_DOC_PREFIX {
        return Err(StorageError::InvalidMarker(
            "legacy document marker truncated".into(),
        ));
    }
    let did = u64::from_le_bytes(legacy_bytes[24..32].try_into().unwrap());
    let rid = u64::from_le_bytes(legacy_bytes[32..40].try_into().unwrap());
    let sid = u64::from_le_bytes(legacy_bytes[48..56].try_into().unwrap());

    let declared_size = u32::from_le_bytes(legacy_bytes[0..4].try_into().unwrap()) as usize;
    let end = declared_size.min(legacy_bytes.len()).max(V11_DOC_PREFIX);
    let shaped_body = legacy_bytes[V11_DOC_PREFIX..end].to_vec();

    Ok(KeyDocumentBody {
        rid,
        tid: rid,
        sid,
        key: did.to_string(),
        shaped_body,
    }
    .encode(uuid, true))
}

// 1.1 `doc_edge_marker_t` body: document body (32 bytes) + toCid(u64) toDid(u64)
// fromCid(u64) fromDid(u64) = 32 more bytes.
const V11_EDGE_PREFIX: usize = V11_DOC_PREFIX + 32;

fn migrate_v11_edge(legacy_bytes: &[u8], uuid: MarkerUuid) -> Result<Vec<u8>> {
    if legacy_bytes.len() < V11_EDGE_PREFIX {
        return Err(StorageError::InvalidMarker("legacy edge marker truncated".into()));
    }
    let did = u64::from_le_bytes(legacy_bytes[24..32].try_into().unwrap());
    let rid = u64::from_le_bytes(legacy_bytes[32..40].try_into().unwrap());
    let sid = u64::from_le_bytes(legacy_bytes[48..56].try_into().unwrap());
    let to_cid = u64::from_le_bytes(legacy_bytes[56..64].try_into().unwrap());
    let to_did = u64::from_le_bytes(legacy_bytes[64..72].try_into().unwrap());
    let from_cid = u64::from_le_bytes(legacy_bytes[72..80].try_into().unwrap());
    let from_did = u64::from_le_bytes(legacy_bytes[80..88].try_into().unwrap());

    let declared_size = u32::from_le_bytes(legacy_bytes[0..4].try_into().unwrap()) as usize;
    let end = declared_size.min(legacy_bytes.len()).max(V11_EDGE_PREFIX);
    let shaped_body = legacy_bytes[V11_EDGE_PREFIX..end].to_vec();

    Ok(KeyEdgeBody {
        rid,
        tid: rid,
        sid,
        key: did.to_string(),
        to_cid,
        from_cid,
        to_key: to_did.to_string(),
        from_key: from_did.to_string(),
        shaped_body,
    }
    .encode(uuid, true))
}

// 1.1 `doc_deletion_marker_t` body: did(u64) rid(u64) sid(u64) = 24 bytes, no payload.
const V11_DELETION_PREFIX: usize = LEGACY_BASE_HEADER_SIZE + 24;

fn migrate_v11_deletion(legacy_bytes: &[u8], uuid: MarkerUuid) -> Result<Vec<u8>> {
    if legacy_bytes.len() < V11_DELETION_PREFIX {
        return Err(StorageError::InvalidMarker(
            "legacy deletion marker truncated".into(),
        ));
    }
    let did = u64::from_le_bytes(legacy_bytes[24..32].try_into().unwrap());
    let rid = u64::from_le_bytes(legacy_bytes[32..40].try_into().unwrap());

    Ok(KeyDeletionBody {
        rid,
        tid: rid,
        key: did.to_string(),
    }
    .encode(uuid, true))
}

/// 1.2 markers are structurally close to the current format already (they
/// introduced transaction ids) but the upstream conversion routines for them
/// were never finished, so we refuse rather than guess.
pub fn migrate_v12_marker(_legacy_bytes: &[u8]) -> Result<Vec<u8>> {
    Err(StorageError::NotImplemented)
}
