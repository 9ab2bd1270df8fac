//! Archiver for the VDF packages used by Gothic 1 and 2.
use crate::engine::{
    ArchiveHandle, ArchiveInfo, Archiver, EnumerateCallback, EnumerateCallbackResult, Io,
    IoStream,
};
use byteorder::{LittleEndian, ReadBytesExt};
use libc::c_void;
use log::{debug, error, info};
use std::ffi::CString;
use std::io::{Read, Seek, SeekFrom};

pub(crate) const COMMENT_LENGTH: usize = 256;
pub(crate) const SIGNATURE_LENGTH: usize = 16;
pub(crate) const ENTRY_NAME_LENGTH: usize = 64;
pub(crate) const ENTRY_DIR: u32 = 0x8000_0000;
pub(crate) const ENTRY_LAST: u32 = 0x4000_0000;
pub(crate) const SIGNATURE_G1: &[u8; SIGNATURE_LENGTH] = b"PSVDSC_V2.00\r\n\r\n";
pub(crate) const SIGNATURE_G2: &[u8; SIGNATURE_LENGTH] = b"PSVDSC_V2.00\n\r\n\r";

pub static VDF_ARCHIVER: Archiver = Archiver {
    info: ArchiveInfo {
        extension: "VDF",
        description: "Gothic I/II engine format",
    },
    open_archive: vdf_open_archive,
    close_archive: vdf_close_archive,
    enumerate: vdf_enumerate,
};

struct CatalogEntry {
    name: String,
    offset: u32,
    kind: u32,
}

/// `VdfArchive` is what an `ArchiveHandle` from this archiver points to.
struct VdfArchive {
    io: *mut Io,
    /// Full paths of the files, in catalog order.
    files: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
enum OpenError {
    #[error("signature does not match")]
    Unsupported,
    #[error("{0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

unsafe fn vdf_open_archive(
    io: *mut Io,
    name: &str,
    for_writing: bool,
    claimed: &mut bool,
) -> Option<ArchiveHandle> {
    info!(r#"vdf_open_archive(name: "{name}", for_writing: {for_writing})"#);
    if for_writing {
        error!("vdf archives are read only");
        return None;
    }
    let mut stream = unsafe { IoStream::new(io) };
    let files = match read_signature(&mut stream) {
        Ok(()) => {
            *claimed = true;
            read_files(&mut stream)
        }
        Err(error) => Err(error),
    };
    match files {
        Ok(files) => {
            debug!("vdf_open_archive: {} files in {name}", files.len());
            let archive = Box::new(VdfArchive { io, files });
            ArchiveHandle::from_raw(Box::into_raw(archive).cast())
        }
        Err(OpenError::Unsupported) => {
            debug!("vdf_open_archive: {name} is not a vdf archive");
            None
        }
        Err(error) => {
            error!("vdf_open_archive: {name} is corrupt: {error}");
            None
        }
    }
}

fn read_signature<R: Read + Seek>(stream: &mut R) -> Result<(), OpenError> {
    stream.seek(SeekFrom::Start(COMMENT_LENGTH as u64))?;
    let mut signature = [0_u8; SIGNATURE_LENGTH];
    if stream.read_exact(&mut signature).is_err() {
        return Err(OpenError::Unsupported);
    }
    if &signature != SIGNATURE_G1 && &signature != SIGNATURE_G2 {
        return Err(OpenError::Unsupported);
    }
    Ok(())
}

fn read_files<R: Read + Seek>(stream: &mut R) -> Result<Vec<String>, OpenError> {
    let count = stream.read_u32::<LittleEndian>()?;
    let _num_files = stream.read_u32::<LittleEndian>()?;
    let _timestamp = stream.read_u32::<LittleEndian>()?;
    let _data_size = stream.read_u32::<LittleEndian>()?;
    let catalog_offset = stream.read_u32::<LittleEndian>()?;
    let _entry_size = stream.read_u32::<LittleEndian>()?;

    stream.seek(SeekFrom::Start(u64::from(catalog_offset)))?;
    // The count comes from the file, so grow with what is actually read.
    let mut entries = vec![];
    for _ in 0..count {
        entries.push(read_entry(stream)?);
    }
    if entries.is_empty() {
        return Ok(vec![]);
    }
    collect_files(&entries)
}

fn read_entry<R: Read>(stream: &mut R) -> Result<CatalogEntry, OpenError> {
    let mut name = [0_u8; ENTRY_NAME_LENGTH];
    stream.read_exact(&mut name)?;
    let offset = stream.read_u32::<LittleEndian>()?;
    let _size = stream.read_u32::<LittleEndian>()?;
    let kind = stream.read_u32::<LittleEndian>()?;
    let _attributes = stream.read_u32::<LittleEndian>()?;

    // Names are padded with spaces, some writers also leave NULs behind.
    let end = name
        .iter()
        .rposition(|&byte| byte != b' ' && byte != 0)
        .map_or(0, |last| last + 1);
    if end == 0 {
        return Err(OpenError::Corrupt("entry without a name".to_string()));
    }
    Ok(CatalogEntry {
        name: String::from_utf8_lossy(&name[..end]).into_owned(),
        offset,
        kind,
    })
}

/// `collect_files` walks the directory tree from the root run in catalog pre-order.
/// Every catalog entry may belong to exactly one directory run.
fn collect_files(entries: &[CatalogEntry]) -> Result<Vec<String>, OpenError> {
    let mut files = vec![];
    let mut consumed = vec![false; entries.len()];
    // (next entry of the run, path prefix of the run)
    let mut runs = vec![(0_usize, String::new())];
    while let Some((index, prefix)) = runs.pop() {
        let Some(entry) = entries.get(index) else {
            return Err(OpenError::Corrupt(format!("directory entry {index} is out of range")));
        };
        if std::mem::replace(&mut consumed[index], true) {
            return Err(OpenError::Corrupt(format!("entry {index} belongs to two directories")));
        }
        let path = format!("{prefix}{}", entry.name);
        if entry.kind & ENTRY_LAST == 0 {
            if index + 1 == entries.len() {
                return Err(OpenError::Corrupt("directory is not terminated".to_string()));
            }
            runs.push((index + 1, prefix));
        }
        if entry.kind & ENTRY_DIR != 0 {
            runs.push((entry.offset as usize, format!("{path}/")));
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

unsafe fn vdf_close_archive(archive: ArchiveHandle) {
    let archive = unsafe { Box::from_raw(archive.as_ptr().cast::<VdfArchive>()) };
    info!("vdf_close_archive()");
    if let Some(destroy) = unsafe { archive.io.as_ref() }.and_then(|io| io.destroy) {
        unsafe { destroy(archive.io) };
    }
}

unsafe fn vdf_enumerate(
    archive: ArchiveHandle,
    dirname: &str,
    callback: EnumerateCallback,
    origdir: &str,
    data: *mut c_void,
) -> bool {
    debug!(r#"vdf_enumerate(dirname: "{dirname}", origdir: "{origdir}")"#);
    let archive = unsafe { &*archive.as_ptr().cast::<VdfArchive>() };
    let Ok(origdir) = CString::new(origdir) else {
        error!("vdf_enumerate: origdir contains a NUL byte");
        return false;
    };
    let prefix = dirname.trim_end_matches('/');
    for file in &archive.files {
        let under_dir = prefix.is_empty()
            || file
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        if !under_dir {
            continue;
        }
        let Ok(fname) = CString::new(file.as_str()) else {
            continue;
        };
        match unsafe { callback(data, origdir.as_ptr(), fname.as_ptr()) } {
            EnumerateCallbackResult::Ok => {}
            EnumerateCallbackResult::Stop => return true,
            EnumerateCallbackResult::Error => {
                error!("vdf_enumerate: callback reported an error at {file}");
                return false;
            }
        }
    }
    true
}
