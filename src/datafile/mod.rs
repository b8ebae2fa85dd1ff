//! The datafile layer: append-only, CRC-protected,
//! memory-mapped marker storage, plus the legacy-version migration path used
//! when opening datafiles written by an older marker layout.

pub mod anon;
pub mod file;
pub mod marker;
pub mod migration;

pub use file::{page_align, Datafile, DatafileState, Reservation, FOOTER_SIZE};
pub use marker::{
    align_up, compute_marker_crc, marker_align, AttributeMarkerBody, FileFooterBody,
    FileHeaderBody, KeyDeletionBody, KeyDocumentBody, KeyEdgeBody, MarkerHeader, MarkerType,
    MarkerUuid, ShapeMarkerBody, HEADER_SIZE, MAX_MARKER_SIZE,
};
pub use migration::migrate_marker;
