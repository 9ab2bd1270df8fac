//! The C-style contract spoken between stream adapters and archivers.
//!
//! The layout mirrors the PhysicsFS `PHYSFS_Io` / `PHYSFS_Archiver` pair, so an archiver
//! only ever sees an [`Io`] control block and hands back an opaque [`ArchiveHandle`].
#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_void};
use std::io::{Read, Seek, SeekFrom};
use std::ptr::NonNull;

pub type io_sint64 = i64;
pub type io_uint64 = u64;

pub type IoReadFn = unsafe extern "C" fn(io: *mut Io, buf: *mut c_void, len: io_uint64) -> io_sint64;
pub type IoWriteFn =
    unsafe extern "C" fn(io: *mut Io, buf: *const c_void, len: io_uint64) -> io_sint64;
pub type IoSeekFn = unsafe extern "C" fn(io: *mut Io, offset: io_uint64) -> c_int;
pub type IoTellFn = unsafe extern "C" fn(io: *mut Io) -> io_sint64;
pub type IoLengthFn = unsafe extern "C" fn(io: *mut Io) -> io_sint64;
pub type IoDuplicateFn = unsafe extern "C" fn(io: *mut Io) -> *mut Io;
pub type IoFlushFn = unsafe extern "C" fn(io: *mut Io) -> c_int;
pub type IoDestroyFn = unsafe extern "C" fn(io: *mut Io);

/// `Io` is a manually managed stream control block.
///
/// Whoever holds a pointer to an `Io` owns it and must release it exactly once
/// through its own `destroy` slot.
#[repr(C)]
#[derive(Debug)]
pub struct Io {
    pub version: u32,
    pub opaque: *mut c_void,
    pub read: Option<IoReadFn>,
    pub write: Option<IoWriteFn>,
    pub seek: Option<IoSeekFn>,
    pub tell: Option<IoTellFn>,
    pub length: Option<IoLengthFn>,
    pub duplicate: Option<IoDuplicateFn>,
    pub flush: Option<IoFlushFn>,
    pub destroy: Option<IoDestroyFn>,
}

/// `EnumerateCallbackResult` is what a visitor tells the archiver after each entry.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnumerateCallbackResult {
    Error = -1,
    Stop = 0,
    Ok = 1,
}

pub type EnumerateCallback = unsafe extern "C" fn(
    data: *mut c_void,
    origdir: *const c_char,
    fname: *const c_char,
) -> EnumerateCallbackResult;

/// `ArchiveHandle` is the opaque token an archiver returns for an opened archive.
/// Only the archiver that produced it may look inside.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArchiveHandle(NonNull<c_void>);

impl ArchiveHandle {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// `ArchiveInfo` describes a supported archive format.
#[derive(Debug, Copy, Clone)]
pub struct ArchiveInfo {
    pub extension: &'static str,
    pub description: &'static str,
}

/// `Archiver` is the capability bundle of one archive format.
///
/// # Contract
/// * `open_archive` never takes ownership of `io` when it returns `None`.
///   On success the returned archive owns `io` and releases it in `close_archive`.
/// * `claimed` is set once the stream has been recognised as this format,
///   even if parsing fails later.
pub struct Archiver {
    pub info: ArchiveInfo,
    pub open_archive: unsafe fn(
        io: *mut Io,
        name: &str,
        for_writing: bool,
        claimed: &mut bool,
    ) -> Option<ArchiveHandle>,
    pub close_archive: unsafe fn(archive: ArchiveHandle),
    pub enumerate: unsafe fn(
        archive: ArchiveHandle,
        dirname: &str,
        callback: EnumerateCallback,
        origdir: &str,
        data: *mut c_void,
    ) -> bool,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver").field("info", &self.info).finish_non_exhaustive()
    }
}

/// `IoStream` borrows an `Io` and exposes it as `Read + Seek`,
/// so archivers can parse with ordinary readers.
pub struct IoStream {
    io: *mut Io,
}

impl IoStream {
    /// # Safety
    /// `io` must stay alive while the stream is used.
    pub unsafe fn new(io: *mut Io) -> Self {
        Self { io }
    }

    fn io(&self) -> std::io::Result<&Io> {
        unsafe { self.io.as_ref() }.ok_or_else(|| invalid_io("stream control block is null"))
    }

    pub fn length(&mut self) -> std::io::Result<u64> {
        let length = self.io()?.length.ok_or_else(|| invalid_io("length is unsupported"))?;
        u64::try_from(unsafe { length(self.io) })
            .map_err(|_| invalid_io("stream reported a negative length"))
    }

    fn tell(&self) -> std::io::Result<u64> {
        let tell = self.io()?.tell.ok_or_else(|| invalid_io("tell is unsupported"))?;
        u64::try_from(unsafe { tell(self.io) })
            .map_err(|_| invalid_io("stream reported a negative position"))
    }

    fn seek_to(&mut self, position: u64) -> std::io::Result<u64> {
        let seek = self.io()?.seek.ok_or_else(|| invalid_io("seek is unsupported"))?;
        match unsafe { seek(self.io, position) } {
            0 => Err(invalid_io("seek failed")),
            _ => Ok(position),
        }
    }
}

impl Read for IoStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.io()?.read.ok_or_else(|| invalid_io("read is unsupported"))?;
        let transferred = unsafe { read(self.io, buf.as_mut_ptr().cast(), buf.len() as io_uint64) };
        usize::try_from(transferred).map_err(|_| invalid_io("read failed"))
    }
}

impl Seek for IoStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.tell()?.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| invalid_io("seek out of range"))?;
        self.seek_to(target)
    }
}

fn invalid_io(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message.to_string())
}
