//! The `Datafile` state machine.
//!
//! A datafile is either backed by a physical file (mmap'd) or an anonymous
//! region (volatile collections). It moves through `write -> read` once
//! sealed; corrupted opens land in one of the two terminal error states.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use crate::datafile::anon::AnonymousRegion;
use crate::datafile::marker::{
    marker_align, validate_marker, FileFooterBody, FileHeaderBody, MarkerHeader, MarkerType,
    MarkerUuid, HEADER_SIZE,
};
use crate::error::{Result, StorageError};

/// Size, in bytes, of an empty (bodyless) footer marker once padded.
pub const FOOTER_SIZE: usize = HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatafileState {
    Write,
    Read,
    Closed,
    OpenError(std::io::ErrorKind),
    WriteError(std::io::ErrorKind),
}

enum WritableBacking {
    Physical { file: File, mmap: MmapMut },
    Anonymous(AnonymousRegion),
}

impl WritableBacking {
    fn as_slice(&self) -> &[u8] {
        match self {
            WritableBacking::Physical { mmap, .. } => mmap,
            WritableBacking::Anonymous(region) => region.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            WritableBacking::Physical { mmap, .. } => mmap,
            WritableBacking::Anonymous(region) => region.as_mut_slice(),
        }
    }

    fn is_physical(&self) -> bool {
        matches!(self, WritableBacking::Physical { .. })
    }
}

enum Backing {
    Writable(WritableBacking),
    Sealed(Mmap),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Writable(w) => w.as_slice(),
            Backing::Sealed(m) => m,
        }
    }
}

/// A reservation of `size` bytes starting at `offset`, returned by
/// `Datafile::reserve`. The caller fills it via `Datafile::write`.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub offset: usize,
    pub size: usize,
}

pub struct Datafile {
    path: Option<PathBuf>,
    fid: u64,
    server_id: u64,
    max_size: u64,
    current_size: u64,
    sealed: bool,
    state: DatafileState,
    backing: Backing,
}

fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE never touches invalid memory.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw <= 0 {
        4096
    } else {
        raw as usize
    }
}

/// Round `n` up to a multiple of the host page size.
pub fn page_align(n: u64) -> u64 {
    let page = page_size() as u64;
    (n + page - 1) / page * page
}

impl Datafile {
    /// Create a new datafile. `path = None` creates an anonymous (volatile)
    /// region instead of a physical file.
    pub fn create(path: Option<&Path>, max_size: u64, fid: u64, server_id: u64) -> Result<Self> {
        let max_size = page_align(max_size.max((HEADER_SIZE + FOOTER_SIZE) as u64));

        let mut backing = match path {
            Some(p) => {
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(p)?;
                file.set_len(max_size)?;
                let mmap = unsafe { MmapMut::map_mut(&file)? };
                WritableBacking::Physical { file, mmap }
            }
            None => WritableBacking::Anonymous(AnonymousRegion::new(max_size as usize)?),
        };

        let compute_crc = backing.is_physical();
        let uuid = MarkerUuid::new(server_id, fid);
        let header_bytes = FileHeaderBody {
            version: 1,
            max_size,
            fid,
        }
        .encode(uuid, compute_crc);

        let len = header_bytes.len();
        backing.as_mut_slice()[0..len].copy_from_slice(&header_bytes);

        Ok(Self {
            path: path.map(|p| p.to_path_buf()),
            fid,
            server_id,
            max_size,
            current_size: len as u64,
            sealed: false,
            state: DatafileState::Write,
            backing: Backing::Writable(backing),
        })
    }

    /// Open an existing physical datafile read-only. Used for already-sealed
    /// datafiles: the header and every marker up to the footer are validated
    /// strictly; any CRC failure is a hard error.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let (header, scan) = Self::validate_and_scan(&mmap, true, true)?;
        if !scan.sealed {
            return Err(StorageError::CorruptedDatafile(
                "expected sealed datafile, no footer found".into(),
            ));
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            fid: header.uuid.sequence,
            server_id: header.uuid.server_id,
            max_size: mmap.len() as u64,
            current_size: scan.current_size as u64,
            sealed: true,
            state: DatafileState::Read,
            backing: Backing::Sealed(mmap),
        })
    }

    /// Open an existing physical datafile for continued writing (a journal
    /// recovered across a restart). If the file turns out to already carry a
    /// footer, it is reopened as a sealed (read-only) datafile instead.
    pub fn open_journal(path: &Path, max_size: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap_ro = unsafe { Mmap::map(&file)? };
        let (header, scan) = Self::validate_and_scan(&mmap_ro, true, true)?;
        if scan.sealed {
            drop(mmap_ro);
            return Self::open(path);
        }
        drop(mmap_ro);

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            path: Some(path.to_path_buf()),
            fid: header.uuid.sequence,
            server_id: header.uuid.server_id,
            max_size: max_size.max(file.metadata()?.len()),
            current_size: scan.current_size as u64,
            sealed: false,
            state: DatafileState::Write,
            backing: Backing::Writable(WritableBacking::Physical { file, mmap }),
        })
    }

    /// Open even when corruption is found; the scan stops at the first bad
    /// marker (or the first all-zero slot) and leaves everything from there
    /// on visible to the caller via `corrupted_from()`.
    pub fn force_open(path: &Path) -> Result<(Self, Option<usize>)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap_ro = unsafe { Mmap::map(&file)? };
        let scan = match Self::validate_and_scan(&mmap_ro, true, false) {
            Ok((_, scan)) => scan,
            Err(_) => ScanResult {
                current_size: 0,
                sealed: false,
            },
        };
        let header = MarkerHeader::read_from(&mmap_ro)?;
        let corrupted_from = if (scan.current_size as u64) < file.metadata()?.len() && !scan.sealed
        {
            Some(scan.current_size)
        } else {
            None
        };
        drop(mmap_ro);

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let df = Self {
            path: Some(path.to_path_buf()),
            fid: header.uuid.sequence,
            server_id: header.uuid.server_id,
            max_size: file.metadata()?.len(),
            current_size: scan.current_size as u64,
            sealed: scan.sealed,
            state: if corrupted_from.is_some() {
                DatafileState::OpenError(std::io::ErrorKind::InvalidData)
            } else {
                DatafileState::Write
            },
            backing: Backing::Writable(WritableBacking::Physical { file, mmap }),
        };
        Ok((df, corrupted_from))
    }

    fn validate_and_scan(bytes: &[u8], check_crc: bool, strict: bool) -> Result<(MarkerHeader, ScanResult)> {
        let header = validate_marker(bytes, check_crc)?;
        if header.marker_type as u32 != MarkerType::FileHeader as u32 {
            return Err(StorageError::CorruptedDatafile(
                "first marker is not a file header".into(),
            ));
        }
        let scan = scan_markers(bytes, check_crc, strict)?;
        Ok((header, scan))
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn fid(&self) -> u64 {
        self.fid
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn state(&self) -> DatafileState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_volatile(&self) -> bool {
        self.path.is_none()
    }

    /// Raw bytes currently mapped, up to `current_size`.
    pub fn live_bytes(&self) -> &[u8] {
        &self.backing.as_slice()[..self.current_size as usize]
    }

    // ── Write path ──────────────────────────────────────────────────

    /// Reserve `size` bytes at the end of the datafile. Fails with
    /// `DatafileFull` if the remaining room (less the footer) is too small,
    /// `ReadOnly` if sealed, `DocumentTooLarge` if `size` alone can never fit.
    pub fn reserve(&mut self, size: usize) -> Result<Reservation> {
        if self.sealed {
            return Err(StorageError::ReadOnly);
        }
        if matches!(self.state, DatafileState::WriteError(_) | DatafileState::OpenError(_)) {
            return Err(StorageError::IllegalState(
                "datafile is in an error state".into(),
            ));
        }
        let aligned = marker_align(size);
        let overhead = FOOTER_SIZE;
        if aligned as u64 + overhead as u64 > self.max_size {
            return Err(StorageError::DocumentTooLarge {
                size: aligned,
                limit: (self.max_size as usize).saturating_sub(overhead),
            });
        }
        if self.current_size as usize + aligned + overhead > self.max_size as usize {
            return Err(StorageError::DatafileFull);
        }
        let offset = self.current_size as usize;
        self.current_size += aligned as u64;
        Ok(Reservation { offset, size: aligned })
    }

    /// Copy `bytes` (a fully-encoded marker, see `datafile::marker`) into a
    /// previously-returned reservation, then optionally msync the affected
    /// range. `bytes.len()` must not exceed `reservation.size`.
    pub fn write(&mut self, reservation: Reservation, bytes: &[u8], force_sync: bool) -> Result<()> {
        if self.sealed {
            return Err(StorageError::ReadOnly);
        }
        if bytes.len() > reservation.size {
            return Err(StorageError::IllegalState(
                "marker bytes exceed reservation size".into(),
            ));
        }
        let backing = match &mut self.backing {
            Backing::Writable(w) => w,
            Backing::Sealed(_) => return Err(StorageError::ReadOnly),
        };
        let dst = &mut backing.as_mut_slice()[reservation.offset..reservation.offset + bytes.len()];
        dst.copy_from_slice(bytes);

        if force_sync {
            if let WritableBacking::Physical { mmap, .. } = backing {
                match mmap.flush_range(reservation.offset, reservation.size) {
                    Ok(()) => {}
                    Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => {
                        self.state = DatafileState::WriteError(std::io::ErrorKind::Other);
                        return Err(StorageError::FilesystemFull);
                    }
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
        }
        Ok(())
    }

    /// Reserve and write a fully-encoded marker in one step; a thin
    /// convenience wrapper used by callers that don't need the two-phase
    /// reserve/write split (e.g. the shaper, which never straddles a
    /// rotation boundary).
    pub fn append(&mut self, bytes: &[u8], force_sync: bool) -> Result<Reservation> {
        let reservation = self.reserve(bytes.len())?;
        self.write(reservation, bytes, force_sync)?;
        Ok(reservation)
    }

    /// Stream every valid marker in the datafile up to `current_size`,
    /// stopping early if `visitor` returns `Err`.
    pub fn iterate(&self, mut visitor: impl FnMut(&MarkerHeader, &[u8]) -> Result<()>) -> Result<()> {
        let bytes = self.backing.as_slice();
        let mut offset = 0usize;
        let check_crc = !self.is_volatile();
        while offset < self.current_size as usize {
            let header = validate_marker(&bytes[offset..], check_crc)?;
            let body = &bytes[offset + HEADER_SIZE..offset + header.size as usize];
            visitor(&header, body)?;
            offset += header.size as usize;
        }
        Ok(())
    }

    /// Append a footer marker, sync, remap read-only, and (for physical
    /// files) truncate to `current_size`.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        let uuid = MarkerUuid::new(self.server_id, self.fid);
        let physical = matches!(&self.backing, Backing::Writable(w) if w.is_physical());
        let footer = FileFooterBody::encode(uuid, physical);
        let reservation = self.append(&footer, true)?;
        debug_assert_eq!(reservation.size, FOOTER_SIZE);

        let current_size = self.current_size;
        let old = std::mem::replace(&mut self.backing, Backing::Sealed(empty_mmap()?));
        self.backing = match old {
            Backing::Writable(WritableBacking::Physical { file, mmap }) => {
                mmap.flush()?;
                let ro = mmap.make_read_only()?;
                file.set_len(current_size)?;
                Backing::Sealed(ro)
            }
            Backing::Writable(WritableBacking::Anonymous(region)) => {
                let mmap = region.into_inner();
                Backing::Sealed(mmap.make_read_only()?)
            }
            Backing::Sealed(m) => Backing::Sealed(m),
        };
        self.sealed = true;
        self.state = DatafileState::Read;
        Ok(())
    }

    /// Rename the backing physical file. Invalid for anonymous datafiles or
    /// when the target already exists.
    pub fn rename(&mut self, new_path: &Path) -> Result<()> {
        let old_path = self
            .path
            .clone()
            .ok_or_else(|| StorageError::IllegalState("cannot rename an anonymous datafile".into()))?;
        if new_path.exists() {
            return Err(StorageError::RenameTargetExists(
                new_path.display().to_string(),
            ));
        }
        fs::rename(&old_path, new_path)?;
        self.path = Some(new_path.to_path_buf());
        Ok(())
    }

    /// Recover a torn journal: keep only the first `voc_size` bytes (the
    /// last known-good marker boundary), rename the original to
    /// `*.corrupted`, write a fresh sealed datafile under the original name.
    pub fn truncate_and_seal(path: &Path, voc_size: usize, server_id: u64, fid: u64) -> Result<Self> {
        let original = fs::read(path)?;
        if voc_size > original.len() {
            return Err(StorageError::IllegalState(
                "voc_size exceeds original file length".into(),
            ));
        }
        let new_max = page_align((voc_size + FOOTER_SIZE) as u64);

        let mut corrupted_path = path.to_path_buf();
        let mut file_name = corrupted_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".corrupted");
        corrupted_path.set_file_name(file_name);
        fs::rename(path, &corrupted_path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(new_max)?;
        {
            let mut f = &file;
            f.write_all(&original[..voc_size])?;
        }

        let mut df = Self::open_journal(path, new_max)?;
        df.current_size = voc_size as u64;
        let _ = (server_id, fid); // fid/server_id are already fixed by the recovered header
        df.seal()?;
        Ok(df)
    }
}

fn empty_mmap() -> Result<Mmap> {
    let mmap_mut = MmapMut::map_anon(1)?;
    Ok(mmap_mut.make_read_only()?)
}

struct ScanResult {
    current_size: usize,
    sealed: bool,
}

/// Scan a datafile's markers starting right after the (already-validated)
/// file header, returning the offset of the first unusable byte and whether
/// a footer was found.
fn scan_markers(bytes: &[u8], check_crc: bool, strict: bool) -> Result<ScanResult> {
    let header = MarkerHeader::read_from(bytes)?;
    let mut offset = header.size as usize;
    let mut sealed = false;

    loop {
        if offset + HEADER_SIZE > bytes.len() {
            break;
        }
        let size_peek = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        if size_peek == 0 {
            break;
        }
        match validate_marker(&bytes[offset..], check_crc) {
            Ok(marker_header) => {
                if marker_header.marker_type as u32 == MarkerType::FileFooter as u32 {
                    offset += marker_header.size as usize;
                    sealed = true;
                    break;
                }
                offset += marker_header.size as usize;
            }
            Err(e) => {
                if strict {
                    return Err(e);
                }
                break;
            }
        }
    }

    Ok(ScanResult {
        current_size: offset,
        sealed,
    })
}
