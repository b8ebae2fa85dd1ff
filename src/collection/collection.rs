//! The primary collection: the mutable in-memory image
//! of a collection -- primary hash index, per-datafile accounting, journal
//! rotation, and cap constraints, layered over the datafile + shaper
//! subsystems.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::collection::barrier::Barrier;
use crate::collection::compactor::{self, CompactionConfig, CompactionOutcome};
use crate::collection::parameter::{CollectionKind, Parameters};
use crate::collection::primary_index::{Mptr, PrimaryIndex};
use crate::datafile::file::Datafile;
use crate::datafile::marker::{
    KeyDeletionBody, KeyDocumentBody, KeyEdgeBody, MarkerType, MarkerUuid, HEADER_SIZE,
};
use crate::error::{Result, StorageError};
use crate::metrics::{Metrics, OperationKind};
use crate::resource::TuningProfile;
use crate::sequence::SequenceGenerator;
use crate::shaper::Shaper;

/// Per-datafile liveness accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatafileStats {
    pub alive_count: u64,
    pub alive_size: u64,
    pub dead_count: u64,
    pub dead_size: u64,
    pub deletions: u64,
}

/// Update conflict policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Error,
    LastWrite,
    Conflict,
    Illegal,
}

/// Per-operation context threaded through create/update/delete.
///
/// `allow_rollback` mirrors the write/read split the original engine made
/// between its write and read contexts: a write context allows the caller to
/// discard a reservation that was never turned into an indexed marker (e.g.
/// because `ctx.policy` rejected the operation after the reservation was
/// taken), while a read-only caller has nothing to roll back. This crate
/// never indexes a marker before its write succeeds, so there is no
/// rollback action to take either way; the field is threaded through for
/// parity with callers that branch on it, not because this collection's
/// write path currently needs to act on it.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext {
    pub policy: UpdatePolicy,
    pub expected_rid: u64,
    pub force_sync: bool,
    pub allow_rollback: bool,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self { policy: UpdatePolicy::LastWrite, expected_rid: 0, force_sync: false, allow_rollback: true }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub key: String,
    pub rid: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateOutcome {
    pub rid: u64,
    pub previous_rid: u64,
}

/// Summary statistics returned by [`Collection::figures`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Figures {
    pub number_datafiles: usize,
    pub number_journals: usize,
    pub alive_count: u64,
    pub alive_size: u64,
    pub dead_count: u64,
    pub dead_size: u64,
    pub deletions: u64,
}

/// A collection: one writable journal, zero or more sealed datafiles, a
/// primary hash index, and a shaper.
pub struct Collection {
    dir: PathBuf,
    parameters: Parameters,
    journal: Datafile,
    datafiles: Vec<Datafile>,
    stats: HashMap<u64, DatafileStats>,
    primary_index: PrimaryIndex,
    shaper: Arc<Shaper>,
    sequence: Arc<SequenceGenerator>,
    server_id: u64,
    barrier: Arc<Barrier>,
    tuning: TuningProfile,
    metrics: Arc<Metrics>,
    next_auto_key: AtomicU64,
    stopping: std::sync::atomic::AtomicBool,
}

fn journal_path(dir: &Path, fid: u64) -> PathBuf {
    dir.join(format!("journal-{fid}.db"))
}

fn datafile_path(dir: &Path, fid: u64) -> PathBuf {
    dir.join(format!("datafile-{fid}.db"))
}

fn compactor_path(dir: &Path, fid: u64) -> PathBuf {
    dir.join(format!("compactor-{fid}.db"))
}

/// Parse an edge collection's `_from`/`_to` string field (`"<cid>/<key>"`)
/// into the collection id and key it references.
fn parse_edge_reference(value: &Value, field: &str) -> Result<(u64, String)> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::InvalidMarker(format!("edge document missing string field {field:?}")))?;
    let (cid, key) = raw
        .split_once('/')
        .ok_or_else(|| StorageError::InvalidMarker(format!("{field} {raw:?} is not of the form \"<cid>/<key>\"")))?;
    let cid = cid
        .parse::<u64>()
        .map_err(|_| StorageError::InvalidMarker(format!("{field} {raw:?} has a non-numeric collection id")))?;
    Ok((cid, key.to_string()))
}

impl Collection {
    /// Create a brand-new collection directory with a fresh journal.
    pub fn create(
        dir: &Path,
        parameters: Parameters,
        shaper: Arc<Shaper>,
        sequence: Arc<SequenceGenerator>,
        server_id: u64,
        tuning: TuningProfile,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        parameters.save(&dir.join("parameter.json"))?;

        let fid = sequence.new_tick();
        let max_size = parameters.effective_max_size(tuning.default_journal_size);
        let path = if parameters.is_volatile { None } else { Some(journal_path(dir, fid)) };
        let journal = Datafile::create(path.as_deref(), max_size, fid, server_id)?;
        info!(fid, dir = %dir.display(), "collection: created fresh journal");

        Ok(Self {
            dir: dir.to_path_buf(),
            parameters,
            journal,
            datafiles: Vec::new(),
            stats: HashMap::new(),
            primary_index: PrimaryIndex::new(),
            shaper,
            sequence,
            server_id,
            barrier: Barrier::new(),
            tuning,
            metrics,
            next_auto_key: AtomicU64::new(0),
            stopping: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Re-open an existing collection directory: read `parameter.json`,
    /// open every `datafile-*.db` (fid-ascending) followed by the single
    /// `journal-*.db`, replaying every marker into the primary index and
    /// per-datafile stats.
    pub fn open(
        dir: &Path,
        shaper: Arc<Shaper>,
        sequence: Arc<SequenceGenerator>,
        server_id: u64,
        tuning: TuningProfile,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let parameters = Parameters::load(&dir.join("parameter.json"))?;

        let mut datafile_paths = Vec::new();
        let mut journal_path_found = None;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("datafile-") && name.ends_with(".db") {
                datafile_paths.push(entry.path());
            } else if name.starts_with("journal-") && name.ends_with(".db") {
                journal_path_found = Some(entry.path());
            }
        }
        datafile_paths.sort();

        let mut datafiles = Vec::new();
        let mut stats = HashMap::new();
        let mut primary_index = PrimaryIndex::new();

        for path in &datafile_paths {
            let datafile = Datafile::open(path)?;
            replay_datafile(&datafile, &sequence, &mut primary_index, &mut stats)?;
            datafiles.push(datafile);
        }

        let max_size = parameters.effective_max_size(tuning.default_journal_size);
        let journal = match journal_path_found {
            Some(path) => {
                let datafile = Datafile::open_journal(&path, max_size)?;
                replay_datafile(&datafile, &sequence, &mut primary_index, &mut stats)?;
                datafile
            }
            None => {
                let fid = sequence.new_tick();
                let path = if parameters.is_volatile { None } else { Some(journal_path(dir, fid)) };
                Datafile::create(path.as_deref(), max_size, fid, server_id)?
            }
        };

        info!(
            datafiles = datafiles.len(),
            documents = primary_index.len(),
            dir = %dir.display(),
            "collection: reopened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            parameters,
            journal,
            datafiles,
            stats,
            primary_index,
            shaper,
            sequence,
            server_id,
            barrier: Barrier::new(),
            tuning,
            metrics,
            next_auto_key: AtomicU64::new(0),
            stopping: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn next_uuid(&self) -> MarkerUuid {
        MarkerUuid::new(self.server_id, self.sequence.new_tick())
    }

    fn generate_key(&self) -> String {
        let n = self.next_auto_key.fetch_add(1, Ordering::Relaxed);
        format!("auto{}-{}", self.sequence.value(), n)
    }

    /// Reserve `size` bytes in the journal, rotating to a fresh journal and
    /// retrying exactly once if the current one is full.
    fn reserve_with_rotation(&mut self, size: usize) -> Result<(u64, crate::datafile::file::Reservation)> {
        match self.journal.reserve(size) {
            Ok(reservation) => Ok((self.journal.fid(), reservation)),
            Err(StorageError::DatafileFull) => {
                self.rotate_journal()?;
                let reservation = self.journal.reserve(size)?;
                Ok((self.journal.fid(), reservation))
            }
            Err(e) => Err(e),
        }
    }

    fn rotate_journal(&mut self) -> Result<()> {
        let old_fid = self.journal.fid();
        self.journal.seal()?;
        if !self.parameters.is_volatile {
            self.journal.rename(&datafile_path(&self.dir, old_fid))?;
        }

        let new_fid = self.sequence.new_tick();
        let max_size = self.parameters.effective_max_size(self.tuning.default_journal_size);
        let path = if self.parameters.is_volatile { None } else { Some(journal_path(&self.dir, new_fid)) };
        let new_journal = Datafile::create(path.as_deref(), max_size, new_fid, self.server_id)?;

        let sealed = std::mem::replace(&mut self.journal, new_journal);
        info!(old_fid, new_fid, "collection: rotated journal");
        self.datafiles.push(sealed);
        Ok(())
    }

    fn datafile_mut(&mut self, fid: u64) -> Option<&mut Datafile> {
        if self.journal.fid() == fid {
            Some(&mut self.journal)
        } else {
            self.datafiles.iter_mut().find(|d| d.fid() == fid)
        }
    }

    fn datafile(&self, fid: u64) -> Option<&Datafile> {
        if self.journal.fid() == fid {
            Some(&self.journal)
        } else {
            self.datafiles.iter().find(|d| d.fid() == fid)
        }
    }

    fn read_marker_body(&self, fid: u64, offset: usize) -> Result<(MarkerType, Vec<u8>)> {
        let _guard = self.barrier.acquire();
        let datafile = self
            .datafile(fid)
            .ok_or_else(|| StorageError::CorruptedDatafile(format!("mptr references unknown datafile {fid}")))?;
        let bytes = datafile.live_bytes();
        let header = crate::datafile::marker::MarkerHeader::read_from(&bytes[offset..])?;
        let body = bytes[offset + crate::datafile::marker::HEADER_SIZE..offset + header.size as usize].to_vec();
        Ok((header.marker_type, body))
    }

    /// Insert a new document, allocating a key if none was given. For an
    /// `Edge` collection, `value` must carry string `_from`/`_to` attributes
    /// of the form `"<cid>/<key>"`, which are parsed into the key-edge
    /// marker's dedicated `to_cid`/`from_cid`/`to_key`/`from_key` fields
    /// (they also remain ordinary attributes in the shaped body).
    pub fn create_document(&mut self, value: &Value, key: Option<String>, ctx: OperationContext) -> Result<CreateOutcome> {
        let started = std::time::Instant::now();
        let key = key.unwrap_or_else(|| self.generate_key());
        if self.primary_index.get(&key).is_some() {
            return Err(StorageError::UniqueViolation);
        }

        let sorted = self.shaper.sort_document(value)?;
        let (sid, shape) = self.shaper.shape_of(&sorted)?;
        let shaped_body = self.shaper.encode(&sorted, &shape)?;

        let rid = self.sequence.new_tick();
        let marker = match self.parameters.kind {
            CollectionKind::Document => {
                KeyDocumentBody { rid, tid: rid, sid, key: key.clone(), shaped_body }
                    .encode(self.next_uuid(), !self.parameters.is_volatile)
            }
            CollectionKind::Edge => {
                let (to_cid, to_key) = parse_edge_reference(value, "_to")?;
                let (from_cid, from_key) = parse_edge_reference(value, "_from")?;
                KeyEdgeBody { rid, tid: rid, sid, key: key.clone(), to_cid, from_cid, to_key, from_key, shaped_body }
                    .encode(self.next_uuid(), !self.parameters.is_volatile)
            }
        };

        let (fid, reservation) = self.reserve_with_rotation(marker.len())?;
        let offset = reservation.offset;
        self.datafile_mut(fid).unwrap().write(reservation, &marker, ctx.force_sync || self.parameters.wait_for_sync)?;

        self.primary_index.insert(Mptr {
            key: key.clone(),
            rid_current: rid,
            rid_valid_from: rid,
            rid_valid_to: 0,
            datafile_id: fid,
            offset,
        });
        let entry = self.stats.entry(fid).or_default();
        entry.alive_count += 1;
        entry.alive_size += marker.len() as u64;

        self.metrics.record_operation(OperationKind::Create, started.elapsed().as_micros() as u64);
        self.apply_cap_constraint()?;
        Ok(CreateOutcome { key, rid })
    }

    /// Read back a document's current value, if it's live.
    pub fn read_document(&self, key: &str) -> Result<Option<Value>> {
        let started = std::time::Instant::now();
        let Some(mptr) = self.primary_index.get(key) else { return Ok(None) };
        let (marker_type, body) = self.read_marker_body(mptr.datafile_id, mptr.offset)?;
        let value = match marker_type {
            MarkerType::KeyDocument => {
                let decoded = KeyDocumentBody::decode(&body)?;
                self.shaper.decode(&decoded.shaped_body, decoded.sid)?
            }
            MarkerType::KeyEdge => {
                let decoded = KeyEdgeBody::decode(&body)?;
                self.shaper.decode(&decoded.shaped_body, decoded.sid)?
            }
            other => {
                return Err(StorageError::CorruptedDatafile(format!(
                    "mptr points at unexpected marker type {other:?}"
                )))
            }
        };
        self.metrics.record_operation(OperationKind::Read, started.elapsed().as_micros() as u64);
        Ok(Some(value))
    }

    /// Revision id currently backing `key`, if live.
    pub fn current_rid(&self, key: &str) -> Option<u64> {
        self.primary_index.get(key).map(|m| m.rid_current)
    }

    /// Update an existing document, enforcing `ctx.policy`.
    pub fn update_document(&mut self, key: &str, value: &Value, ctx: OperationContext) -> Result<UpdateOutcome> {
        let started = std::time::Instant::now();
        let previous_rid = self
            .primary_index
            .get(key)
            .map(|m| m.rid_current)
            .ok_or_else(|| StorageError::MissingDocument(key.to_string()))?;

        match ctx.policy {
            UpdatePolicy::Error => {
                if ctx.expected_rid != 0 && ctx.expected_rid != previous_rid {
                    return Err(StorageError::Conflict { expected: ctx.expected_rid, actual: previous_rid });
                }
            }
            UpdatePolicy::LastWrite => {}
            UpdatePolicy::Conflict => return Err(StorageError::NotImplemented),
            UpdatePolicy::Illegal => {
                return Err(StorageError::IllegalState("update policy is illegal for this collection".into()))
            }
        }

        let sorted = self.shaper.sort_document(value)?;
        let (sid, shape) = self.shaper.shape_of(&sorted)?;
        let shaped_body = self.shaper.encode(&sorted, &shape)?;

        let rid = self.sequence.new_tick();
        let marker = match self.parameters.kind {
            CollectionKind::Document => {
                KeyDocumentBody { rid, tid: rid, sid, key: key.to_string(), shaped_body }
                    .encode(self.next_uuid(), !self.parameters.is_volatile)
            }
            CollectionKind::Edge => {
                let (to_cid, to_key) = parse_edge_reference(value, "_to")?;
                let (from_cid, from_key) = parse_edge_reference(value, "_from")?;
                KeyEdgeBody { rid, tid: rid, sid, key: key.to_string(), to_cid, from_cid, to_key, from_key, shaped_body }
                    .encode(self.next_uuid(), !self.parameters.is_volatile)
            }
        };

        let (fid, reservation) = self.reserve_with_rotation(marker.len())?;
        let offset = reservation.offset;
        self.datafile_mut(fid).unwrap().write(reservation, &marker, ctx.force_sync || self.parameters.wait_for_sync)?;

        let (old_fid, _old_offset, _old_rid) = self.primary_index.swing(key, rid, fid, offset).unwrap();
        if let Some(old_stats) = self.stats.get_mut(&old_fid) {
            old_stats.alive_count = old_stats.alive_count.saturating_sub(1);
            old_stats.dead_count += 1;
        }
        let entry = self.stats.entry(fid).or_default();
        entry.alive_count += 1;
        entry.alive_size += marker.len() as u64;

        self.metrics.record_operation(OperationKind::Update, started.elapsed().as_micros() as u64);
        Ok(UpdateOutcome { rid, previous_rid })
    }

    /// Delete a document, writing a tombstone marker.
    pub fn delete_document(&mut self, key: &str, ctx: OperationContext) -> Result<()> {
        let started = std::time::Instant::now();
        let Some(mptr) = self.primary_index.get(key) else {
            return Err(StorageError::MissingDocument(key.to_string()));
        };
        let previous_rid = mptr.rid_current;
        let old_fid = mptr.datafile_id;

        let rid = self.sequence.new_tick();
        let marker = KeyDeletionBody { rid, tid: rid, key: key.to_string() }
            .encode(self.next_uuid(), !self.parameters.is_volatile);

        let (fid, reservation) = self.reserve_with_rotation(marker.len())?;
        self.datafile_mut(fid).unwrap().write(reservation, &marker, ctx.force_sync || self.parameters.wait_for_sync)?;

        self.primary_index.remove(key);
        if let Some(old_stats) = self.stats.get_mut(&old_fid) {
            old_stats.alive_count = old_stats.alive_count.saturating_sub(1);
            old_stats.deletions += 1;
        }
        let _ = previous_rid;

        self.metrics.record_operation(OperationKind::Delete, started.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Remove every live document, writing one deletion marker per key.
    pub fn truncate(&mut self) -> Result<()> {
        let started = std::time::Instant::now();
        let keys: Vec<String> = self.primary_index.keys().map(|k| k.to_string()).collect();
        for key in keys {
            if self.stopping.load(Ordering::Relaxed) {
                return Err(StorageError::ShutdownInProgress);
            }
            self.delete_document(&key, OperationContext::default())?;
        }
        self.metrics.record_operation(OperationKind::Truncate, started.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Apply the configured cap constraint, evicting the oldest live
    /// documents (FIFO by rid) until both bounds are satisfied.
    fn apply_cap_constraint(&mut self) -> Result<()> {
        if self.parameters.cap.is_unbounded() {
            return Ok(());
        }
        let batch = self.tuning.cap_check_batch_size;
        let mut evicted = 0usize;
        loop {
            let figures = self.figures();
            let over_docs = self
                .parameters
                .cap
                .max_documents
                .is_some_and(|max| figures.alive_count > max);
            let over_size = self.parameters.cap.max_size.is_some_and(|max| figures.alive_size > max);
            if !(over_docs || over_size) || evicted >= batch {
                break;
            }

            let mut by_rid: Vec<(u64, String)> = self
                .primary_index
                .iter()
                .map(|(k, m)| (m.rid_current, k.to_string()))
                .collect();
            by_rid.sort();
            let Some((_, oldest_key)) = by_rid.into_iter().next() else { break };
            warn!(key = %oldest_key, "collection: cap constraint evicting oldest document");
            self.delete_document(&oldest_key, OperationContext::default())?;
            evicted += 1;
        }
        Ok(())
    }

    /// Sum per-datafile accounting into a whole-collection summary
    /// (SPEC_FULL.md §4.3 "figures").
    pub fn figures(&self) -> Figures {
        let mut figures = Figures {
            number_datafiles: self.datafiles.len(),
            number_journals: 1,
            ..Figures::default()
        };
        for stats in self.stats.values() {
            figures.alive_count += stats.alive_count;
            figures.alive_size += stats.alive_size;
            figures.dead_count += stats.dead_count;
            figures.dead_size += stats.dead_size;
            figures.deletions += stats.deletions;
        }
        figures
    }

    /// Roll dead-marker-heavy sealed datafiles into one fresh sealed
    /// datafile, dropping every marker no live mptr references any more
    /// (SPEC_FULL.md §4.1 "compactors", §6.1's transient `compactor-<fid>.db`).
    ///
    /// The read phase -- deciding which markers in each candidate datafile
    /// are still live -- runs across `tuning.compaction_threads` via rayon:
    /// each candidate's mapping is read-only and `Sync`, so distinct
    /// datafiles can be scanned concurrently. The write phase is
    /// necessarily sequential: one compactor file, one primary index.
    pub fn compact(&mut self, config: &CompactionConfig) -> Result<CompactionOutcome> {
        let candidate_fids: std::collections::HashSet<u64> = {
            let pairs: Vec<(u64, DatafileStats)> = self
                .datafiles
                .iter()
                .map(|d| (d.fid(), self.stats.get(&d.fid()).copied().unwrap_or_default()))
                .collect();
            compactor::plan(pairs.iter().map(|(fid, s)| (*fid, s)), config)
                .into_iter()
                .collect()
        };
        if candidate_fids.len() < config.min_candidates {
            return Ok(CompactionOutcome::default());
        }

        let started = std::time::Instant::now();
        let candidates: Vec<&Datafile> =
            self.datafiles.iter().filter(|d| candidate_fids.contains(&d.fid())).collect();
        let old_total_bytes: u64 = candidates.iter().map(|d| d.current_size()).sum();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.tuning.compaction_threads.max(1))
            .build()
            .map_err(|e| StorageError::IllegalState(format!("compaction thread pool: {e}")))?;

        let index = &self.primary_index;
        let per_datafile: Vec<(u64, Vec<(String, Vec<u8>)>)> = pool.install(|| {
            candidates
                .par_iter()
                .map(|datafile| {
                    let fid = datafile.fid();
                    let bytes = datafile.live_bytes();
                    let mut offset = 0usize;
                    let mut live = Vec::new();
                    while offset + HEADER_SIZE <= bytes.len() {
                        let header = match crate::datafile::marker::MarkerHeader::read_from(&bytes[offset..]) {
                            Ok(h) => h,
                            Err(_) => break,
                        };
                        if offset + header.size as usize > bytes.len() {
                            break;
                        }
                        let body = &bytes[offset + HEADER_SIZE..offset + header.size as usize];
                        let key = match header.marker_type {
                            MarkerType::KeyDocument => KeyDocumentBody::decode(body).ok().map(|d| d.key),
                            MarkerType::KeyEdge => KeyEdgeBody::decode(body).ok().map(|d| d.key),
                            _ => None,
                        };
                        if let Some(key) = key {
                            let still_live =
                                index.get(&key).is_some_and(|m| m.datafile_id == fid && m.offset == offset);
                            if still_live {
                                live.push((key, bytes[offset..offset + header.size as usize].to_vec()));
                            }
                        }
                        offset += header.size as usize;
                    }
                    (fid, live)
                })
                .collect()
        });

        let documents_relocated: usize = per_datafile.iter().map(|(_, live)| live.len()).sum();
        drop(candidates);

        if documents_relocated == 0 {
            // Every candidate was fully dead: drop them outright, no
            // compactor file needed.
            self.barrier.wait_until_clear();
            self.remove_datafiles(&candidate_fids)?;
            self.metrics.record_compaction(started.elapsed().as_millis() as u64, 0, old_total_bytes);
            return Ok(CompactionOutcome {
                datafiles_removed: candidate_fids.len(),
                documents_relocated: 0,
                bytes_reclaimed: old_total_bytes,
            });
        }

        // Write phase: a fresh sealed datafile receiving every surviving
        // marker, grouped by source datafile (fid-ascending, since
        // `self.datafiles` is kept in that order) for a deterministic
        // on-disk layout.
        let new_fid = self.sequence.new_tick();
        let total_live_bytes: u64 = per_datafile
            .iter()
            .flat_map(|(_, live)| live.iter())
            .map(|(_, bytes)| bytes.len() as u64)
            .sum();
        let path = if self.parameters.is_volatile {
            None
        } else {
            Some(compactor_path(&self.dir, new_fid))
        };
        let mut compactor_file =
            Datafile::create(path.as_deref(), total_live_bytes + HEADER_SIZE as u64, new_fid, self.server_id)?;

        let mut relocations = Vec::with_capacity(documents_relocated);
        let mut new_alive_size = 0u64;
        for (_, live) in &per_datafile {
            for (key, marker_bytes) in live {
                let reservation = compactor_file.append(marker_bytes, self.parameters.wait_for_sync)?;
                relocations.push((key.clone(), reservation.offset));
                new_alive_size += marker_bytes.len() as u64;
            }
        }
        compactor_file.seal()?;
        if !self.parameters.is_volatile {
            compactor_file.rename(&datafile_path(&self.dir, new_fid))?;
        }

        for (key, offset) in &relocations {
            self.primary_index.relocate(key, new_fid, *offset);
        }

        // Only now may the old datafiles be dropped from the working set:
        // wait for every barrier guard acquired before the swing above to
        // release.
        self.barrier.wait_until_clear();
        self.remove_datafiles(&candidate_fids)?;

        self.datafiles.push(compactor_file);
        self.stats.insert(
            new_fid,
            DatafileStats {
                alive_count: documents_relocated as u64,
                alive_size: new_alive_size,
                dead_count: 0,
                dead_size: 0,
                deletions: 0,
            },
        );

        let bytes_reclaimed = old_total_bytes.saturating_sub(new_alive_size);
        info!(
            new_fid,
            removed = candidate_fids.len(),
            documents_relocated,
            bytes_reclaimed,
            "collection: compaction pass complete"
        );
        self.metrics.record_compaction(
            started.elapsed().as_millis() as u64,
            documents_relocated as u64,
            bytes_reclaimed,
        );

        Ok(CompactionOutcome { datafiles_removed: candidate_fids.len(), documents_relocated, bytes_reclaimed })
    }

    /// Drop every datafile whose fid is in `fids` from the working set and
    /// delete its backing file. Only called once the barrier is clear, so
    /// no mptr still points into what's being removed.
    fn remove_datafiles(&mut self, fids: &std::collections::HashSet<u64>) -> Result<()> {
        let mut removed_paths = Vec::new();
        self.datafiles.retain(|d| {
            if fids.contains(&d.fid()) {
                removed_paths.push(d.path().map(|p| p.to_path_buf()));
                false
            } else {
                true
            }
        });
        for fid in fids {
            self.stats.remove(fid);
        }
        for path in removed_paths.into_iter().flatten() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn document_count(&self) -> usize {
        self.primary_index.len()
    }

    pub fn shaper(&self) -> &Shaper {
        &self.shaper
    }

    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Mark the collection as shutting down; long-running operations that
    /// check this flag between iterations return early
    /// (SPEC_FULL.md §5 "Cancellation and timeouts").
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }
}

fn replay_datafile(
    datafile: &Datafile,
    sequence: &SequenceGenerator,
    primary_index: &mut PrimaryIndex,
    stats: &mut HashMap<u64, DatafileStats>,
) -> Result<()> {
    let fid = datafile.fid();
    stats.entry(fid).or_default();
    let mut offset = 0usize;

    datafile.iterate(|header, body| {
        sequence.observe(header.uuid.sequence);
        let this_offset = offset;
        offset += header.size as usize;

        match header.marker_type {
            MarkerType::KeyDocument | MarkerType::KeyEdge => {
                let (rid, key) = match header.marker_type {
                    MarkerType::KeyDocument => {
                        let d = KeyDocumentBody::decode(body)?;
                        (d.rid, d.key)
                    }
                    _ => {
                        let d = KeyEdgeBody::decode(body)?;
                        (d.rid, d.key)
                    }
                };
                debug!(key, rid, fid, "collection: replaying document marker");
                if let Some(previous) = primary_index.get(&key) {
                    if let Some(old_stats) = stats.get_mut(&previous.datafile_id) {
                        old_stats.alive_count = old_stats.alive_count.saturating_sub(1);
                        old_stats.dead_count += 1;
                    }
                }
                primary_index.insert(Mptr {
                    key,
                    rid_current: rid,
                    rid_valid_from: rid,
                    rid_valid_to: 0,
                    datafile_id: fid,
                    offset: this_offset,
                });
                let entry = stats.entry(fid).or_default();
                entry.alive_count += 1;
                entry.alive_size += header.size as u64;
            }
            MarkerType::KeyDeletion => {
                let decoded = KeyDeletionBody::decode(body)?;
                if let Some(previous) = primary_index.remove(&decoded.key) {
                    if let Some(old_stats) = stats.get_mut(&previous.datafile_id) {
                        old_stats.alive_count = old_stats.alive_count.saturating_sub(1);
                        old_stats.deletions += 1;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::parameter::CollectionKind;
    use serde_json::json;
    use tempfile::tempdir;

    fn new_collection(dir: &Path, max_size: u64) -> Collection {
        let sequence = Arc::new(SequenceGenerator::new());
        let shaper = Arc::new(Shaper::create(&dir.join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
        let mut params = Parameters::new(1, "docs", CollectionKind::Document);
        params.max_size = Some(max_size);
        Collection::create(
            &dir.join("collection-1"),
            params,
            shaper,
            sequence,
            1,
            TuningProfile::default(),
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn create_then_reopen_recovers_documents() {
        let dir = tempdir().unwrap();
        let mut keys = Vec::new();
        {
            let mut collection = new_collection(dir.path(), 1024 * 1024);
            for i in 0..3 {
                let outcome = collection
                    .create_document(&json!({"n": i}), None, OperationContext::default())
                    .unwrap();
                keys.push(outcome.key);
            }
        }

        let sequence = Arc::new(SequenceGenerator::new());
        let shaper = Arc::new(
            Shaper::open(&dir.path().join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap(),
        );
        let reopened = Collection::open(
            &dir.path().join("collection-1"),
            shaper,
            sequence,
            1,
            TuningProfile::default(),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        for (i, key) in keys.iter().enumerate() {
            let value = reopened.read_document(key).unwrap().unwrap();
            assert_eq!(value["n"], json!(i));
        }
        assert!(reopened.read_document("missing-key").unwrap().is_none());
    }

    #[test]
    fn update_with_error_policy_detects_conflict() {
        let dir = tempdir().unwrap();
        let mut collection = new_collection(dir.path(), 1024 * 1024);
        let created = collection
            .create_document(&json!({"n": 1}), Some("doc1".into()), OperationContext::default())
            .unwrap();

        let ctx = OperationContext {
            policy: UpdatePolicy::Error,
            expected_rid: created.rid,
            force_sync: false,
            allow_rollback: true,
        };
        let updated = collection.update_document("doc1", &json!({"n": 2}), ctx).unwrap();
        assert_eq!(updated.previous_rid, created.rid);

        let stale_ctx = OperationContext {
            policy: UpdatePolicy::Error,
            expected_rid: created.rid,
            force_sync: false,
            allow_rollback: true,
        };
        let err = collection.update_document("doc1", &json!({"n": 3}), stale_ctx).unwrap_err();
        match err {
            StorageError::Conflict { expected, actual } => {
                assert_eq!(expected, created.rid);
                assert_eq!(actual, updated.rid);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn journal_rotation_creates_a_sealed_datafile() {
        let dir = tempdir().unwrap();
        // A small journal forces a rotation well before the test runs out of patience.
        let mut collection = new_collection(dir.path(), 16 * 1024);
        let mut created = 0;
        for i in 0..400 {
            let value = json!({"n": i, "payload": "x".repeat(32)});
            match collection.create_document(&value, None, OperationContext::default()) {
                Ok(_) => created += 1,
                Err(StorageError::DatafileFull) => unreachable!("rotation should absorb DatafileFull"),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 400);
        let figures = collection.figures();
        assert!(figures.number_datafiles >= 1);
    }

    #[test]
    fn delete_then_read_returns_missing() {
        let dir = tempdir().unwrap();
        let mut collection = new_collection(dir.path(), 1024 * 1024);
        collection
            .create_document(&json!({"n": 1}), Some("doc1".into()), OperationContext::default())
            .unwrap();
        collection.delete_document("doc1", OperationContext::default()).unwrap();
        assert!(collection.read_document("doc1").unwrap().is_none());
        let err = collection
            .delete_document("doc1", OperationContext::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingDocument(_)));
    }

    #[test]
    fn truncate_removes_every_document() {
        let dir = tempdir().unwrap();
        let mut collection = new_collection(dir.path(), 1024 * 1024);
        for i in 0..5 {
            collection
                .create_document(&json!({"n": i}), None, OperationContext::default())
                .unwrap();
        }
        assert_eq!(collection.document_count(), 5);
        collection.truncate().unwrap();
        assert_eq!(collection.document_count(), 0);
    }

    #[test]
    fn edge_collection_writes_key_edge_markers() {
        let dir = tempdir().unwrap();
        let sequence = Arc::new(SequenceGenerator::new());
        let shaper = Arc::new(Shaper::create(&dir.path().join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
        let params = Parameters::new(2, "edges", CollectionKind::Edge);
        let mut collection = Collection::create(
            &dir.path().join("collection-2"),
            params,
            shaper,
            sequence,
            1,
            TuningProfile::default(),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        let edge = json!({"_from": "1/a", "_to": "1/b", "weight": 3});
        let created = collection.create_document(&edge, Some("e1".into()), OperationContext::default()).unwrap();

        let (marker_type, body) = collection.read_marker_body(
            collection.primary_index.get("e1").unwrap().datafile_id,
            collection.primary_index.get("e1").unwrap().offset,
        ).unwrap();
        assert_eq!(marker_type, MarkerType::KeyEdge);
        let decoded = KeyEdgeBody::decode(&body).unwrap();
        assert_eq!(decoded.to_cid, 1);
        assert_eq!(decoded.to_key, "b");
        assert_eq!(decoded.from_cid, 1);
        assert_eq!(decoded.from_key, "a");
        assert_eq!(decoded.rid, created.rid);

        let read_back = collection.read_document("e1").unwrap().unwrap();
        assert_eq!(read_back["_from"], json!("1/a"));
        assert_eq!(read_back["weight"], json!(3));
    }

    #[test]
    fn edge_collection_rejects_missing_from_to() {
        let dir = tempdir().unwrap();
        let sequence = Arc::new(SequenceGenerator::new());
        let shaper = Arc::new(Shaper::create(&dir.path().join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
        let params = Parameters::new(2, "edges", CollectionKind::Edge);
        let mut collection = Collection::create(
            &dir.path().join("collection-2"),
            params,
            shaper,
            sequence,
            1,
            TuningProfile::default(),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        let err = collection
            .create_document(&json!({"weight": 3}), None, OperationContext::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMarker(_)));
    }

    #[test]
    fn cap_constraint_evicts_oldest_first() {
        let dir = tempdir().unwrap();
        let sequence = Arc::new(SequenceGenerator::new());
        let shaper = Arc::new(Shaper::create(&dir.path().join("SHAPES.db"), 1, Arc::clone(&sequence)).unwrap());
        let mut params = Parameters::new(1, "docs", CollectionKind::Document);
        params.cap.max_documents = Some(2);
        let mut collection = Collection::create(
            &dir.path().join("collection-1"),
            params,
            shaper,
            sequence,
            1,
            TuningProfile::default(),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        collection.create_document(&json!({"n": 1}), Some("a".into()), OperationContext::default()).unwrap();
        collection.create_document(&json!({"n": 2}), Some("b".into()), OperationContext::default()).unwrap();
        collection.create_document(&json!({"n": 3}), Some("c".into()), OperationContext::default()).unwrap();

        assert_eq!(collection.document_count(), 2);
        assert!(collection.read_document("a").unwrap().is_none());
        assert!(collection.read_document("c").unwrap().is_some());
    }
}
