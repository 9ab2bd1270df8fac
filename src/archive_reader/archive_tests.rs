use crate::engine::{ArchiveHandle, ArchiveInfo, Archiver, EnumerateCallback, Io};
use crate::error::{Error, Result};
use crate::file_access::{FileHandle, FileProvider, MemoryFileProvider};
use crate::vdf::tests::build_vdf;
use crate::vdf::{ENTRY_DIR, ENTRY_LAST};
use crate::ArchiveReader;
use libc::c_void;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

const fn test_archive() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/test_resources/test.vdf")
}

const fn gothic1_archive() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/test_resources/gothic1.vdf")
}

const fn not_an_archive() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/test_resources/not_an_archive.vdf")
}

/// Keeps one reference to every handle it hands out, so tests can watch the counts.
struct SpyProvider {
    inner: MemoryFileProvider,
    opened: Rc<RefCell<Vec<FileHandle>>>,
}

impl FileProvider for SpyProvider {
    fn open(&self, path: &Path) -> Result<FileHandle> {
        let file = self.inner.open(path)?;
        self.opened.borrow_mut().push(file.reference());
        Ok(file)
    }
}

fn spy_reader() -> (ArchiveReader, Rc<RefCell<Vec<FileHandle>>>) {
    let mut inner = MemoryFileProvider::new();
    inner
        .insert(
            "small.vdf",
            build_vdf(&[("a.txt", 0, 0), ("dir", 2, ENTRY_DIR | ENTRY_LAST), ("b.dat", 0, ENTRY_LAST)]),
        )
        .insert("garbage.vdf", b"garbage".repeat(64));
    let opened = Rc::new(RefCell::new(vec![]));
    let mut reader = ArchiveReader::new();
    reader.file_provider(SpyProvider {
        inner,
        opened: Rc::clone(&opened),
    });
    (reader, opened)
}

#[test]
fn test_open_then_close() -> Result<()> {
    let mut reader = ArchiveReader::new();
    reader.open(test_archive())?;
    assert!(reader.is_open());
    assert_eq!(reader.path(), Some(Path::new(test_archive())));
    reader.close()?;
    assert!(!reader.is_open());
    assert_eq!(reader.path(), None);
    assert!(matches!(reader.close(), Err(Error::NotOpen)));
    Ok(())
}

#[test]
fn test_get_files() -> Result<()> {
    let mut reader = ArchiveReader::new();
    reader.open(test_archive())?;
    let files = reader.get_files()?;
    assert_eq!(files, ["a.txt", "dir/b.dat"]);
    assert_eq!(reader.get_files()?, files);
    Ok(())
}

#[test]
fn test_end_to_end_gothic1() -> Result<()> {
    let expected = [
        "_WORK/DATA/SCRIPTS/GOTHIC.DAT",
        "_WORK/DATA/SCRIPTS/MENU.DAT",
        "_WORK/DATA/WORLDS/WORLD.ZEN",
        "_WORK/DATA/README.TXT",
    ];
    let mut reader = ArchiveReader::new();
    reader.format("vdf")?.open(gothic1_archive())?;
    let files = reader.get_files()?;
    assert_eq!(files.len(), expected.len());
    assert_eq!(files, expected);
    reader.close()?;
    drop(reader);
    Ok(())
}

#[test]
fn test_open_invalid_archive() {
    let mut reader = ArchiveReader::new();
    assert!(matches!(reader.open(not_an_archive()), Err(Error::OpenFailed(_))));
    assert!(!reader.is_open());
    assert!(matches!(reader.get_files(), Err(Error::NotOpen)));
    assert!(matches!(reader.close(), Err(Error::NotOpen)));
}

#[test]
fn test_open_missing_file() {
    let mut reader = ArchiveReader::new();
    let missing = concat!(env!("CARGO_MANIFEST_DIR"), "/test_resources/missing.vdf");
    assert!(matches!(reader.open(missing), Err(Error::Io(_))));
    assert!(!reader.is_open());
}

#[test]
fn test_failed_open_replaces_open_archive() -> Result<()> {
    let mut reader = ArchiveReader::new();
    reader.open(test_archive())?;
    assert!(reader.open(not_an_archive()).is_err());
    assert!(!reader.is_open());
    assert!(matches!(reader.get_files(), Err(Error::NotOpen)));
    Ok(())
}

#[test]
fn test_get_files_before_open() {
    let reader = ArchiveReader::new();
    assert!(matches!(reader.get_files(), Err(Error::NotOpen)));
}

#[test]
fn test_unknown_format() {
    let mut reader = ArchiveReader::new();
    assert!(matches!(reader.format("zip"), Err(Error::UnknownFormat(_))));
}

#[test]
fn test_close_releases_file_handle() -> Result<()> {
    let (mut reader, opened) = spy_reader();
    reader.open("small.vdf")?;
    // spy + session + adapter claimed by the archive
    assert_eq!(opened.borrow()[0].ref_count(), 3);
    assert_eq!(reader.get_files()?, ["a.txt", "dir/b.dat"]);
    reader.close()?;
    assert_eq!(opened.borrow()[0].ref_count(), 1);
    Ok(())
}

#[test]
fn test_rejected_archive_releases_file_handle() {
    let (mut reader, opened) = spy_reader();
    assert!(matches!(reader.open("garbage.vdf"), Err(Error::OpenFailed(label)) if label == "garbage.vdf"));
    assert_eq!(opened.borrow()[0].ref_count(), 1);
}

#[test]
fn test_open_twice_does_not_leak() -> Result<()> {
    let (mut reader, opened) = spy_reader();
    reader.open("small.vdf")?;
    reader.open("small.vdf")?;
    assert_eq!(opened.borrow().len(), 2);
    assert_eq!(opened.borrow()[0].ref_count(), 1);
    assert_eq!(opened.borrow()[1].ref_count(), 3);
    assert_eq!(reader.get_files()?, ["a.txt", "dir/b.dat"]);
    Ok(())
}

#[test]
fn test_drop_closes_session() -> Result<()> {
    let (mut reader, opened) = spy_reader();
    reader.open("small.vdf")?;
    drop(reader);
    assert_eq!(opened.borrow()[0].ref_count(), 1);
    Ok(())
}

/// Reads through a second cursor obtained with `duplicate`, releasing both on close.
struct DuplicatedArchive {
    original: *mut Io,
    copy: *mut Io,
}

unsafe fn duplicating_open(
    io: *mut Io,
    _name: &str,
    _for_writing: bool,
    claimed: &mut bool,
) -> Option<ArchiveHandle> {
    let copy = unsafe { ((*io).duplicate?)(io) };
    if copy.is_null() {
        return None;
    }
    *claimed = true;
    let archive = Box::new(DuplicatedArchive { original: io, copy });
    ArchiveHandle::from_raw(Box::into_raw(archive).cast())
}

unsafe fn duplicating_close(archive: ArchiveHandle) {
    let archive = unsafe { Box::from_raw(archive.as_ptr().cast::<DuplicatedArchive>()) };
    for io in [archive.copy, archive.original] {
        unsafe { ((*io).destroy.unwrap())(io) };
    }
}

unsafe fn duplicating_enumerate(
    archive: ArchiveHandle,
    _dirname: &str,
    callback: EnumerateCallback,
    _origdir: &str,
    data: *mut c_void,
) -> bool {
    let archive = unsafe { &*archive.as_ptr().cast::<DuplicatedArchive>() };
    let mut buf = [0_u8; 5];
    let read = unsafe { ((*archive.copy).read.unwrap())(archive.copy, buf.as_mut_ptr().cast(), 5) };
    let Ok(name) = std::ffi::CString::new(&buf[..read.max(0) as usize]) else {
        return false;
    };
    unsafe { callback(data, c"".as_ptr(), name.as_ptr()) };
    true
}

static DUPLICATING_ARCHIVER: Archiver = Archiver {
    info: ArchiveInfo {
        extension: "DUP",
        description: "duplicating test archiver",
    },
    open_archive: duplicating_open,
    close_archive: duplicating_close,
    enumerate: duplicating_enumerate,
};

#[test]
fn test_duplicated_adapter_released_once() -> Result<()> {
    let opened = Rc::new(RefCell::new(vec![]));
    let mut inner = MemoryFileProvider::new();
    inner.insert("plain.bin", b"hello world".to_vec());
    let mut reader = ArchiveReader::new();
    reader.archiver(&DUPLICATING_ARCHIVER).file_provider(SpyProvider {
        inner,
        opened: Rc::clone(&opened),
    });
    reader.open("plain.bin")?;
    // spy + session + adapter + duplicate
    assert_eq!(opened.borrow()[0].ref_count(), 4);
    assert_eq!(reader.get_files()?, ["hello"]);
    reader.close()?;
    assert_eq!(opened.borrow()[0].ref_count(), 1);
    Ok(())
}
