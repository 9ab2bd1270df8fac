//! Presents a [`FileHandle`] through the [`Io`] control block archivers expect.
//!
//! Each control block owns exactly one boxed `FileHandle` behind `opaque`.
//! `duplicate` boxes a fresh reference, `destroy` drops it, so the handle's
//! reference count always equals the number of live control blocks plus the
//! host's own owners.

use crate::engine::{io_sint64, io_uint64, Io};
use crate::file_access::FileHandle;
use libc::{c_int, c_void};
use log::{debug, error};

pub(crate) const IO_VERSION: u32 = 0;

/// `make_io` wraps a new reference of `file` into a heap allocated control block.
/// The caller owns the result and releases it through its `destroy` slot.
pub fn make_io(file: &FileHandle) -> *mut Io {
    debug!(r#"make_io(file: "{}")"#, file.path().display());
    new_io(Box::new(file.reference()))
}

/// `detach` releases the file reference held by `io` while keeping the block itself alive.
/// Later operations on the block fail closed, and `destroy` only frees the block.
///
/// # Safety
/// `io` must be null or a live block created by this module.
pub unsafe fn detach(io: *mut Io) {
    let Some(io) = (unsafe { io.as_mut() }) else {
        return;
    };
    let opaque = std::mem::replace(&mut io.opaque, std::ptr::null_mut());
    if !opaque.is_null() {
        drop(unsafe { Box::from_raw(opaque.cast::<FileHandle>()) });
    }
}

fn new_io(file: Box<FileHandle>) -> *mut Io {
    Box::into_raw(Box::new(Io {
        version: IO_VERSION,
        opaque: Box::into_raw(file).cast::<c_void>(),
        read: Some(file_access_read),
        write: None,
        seek: Some(file_access_seek),
        tell: Some(file_access_tell),
        length: Some(file_access_length),
        duplicate: Some(file_access_duplicate),
        flush: None,
        destroy: Some(file_access_destroy),
    }))
}

/// `file_of` resolves the handle behind `io`, or `None` if the block, its back-reference,
/// or the stream itself is no longer usable.
unsafe fn file_of<'a>(io: *mut Io) -> Option<&'a FileHandle> {
    let io = unsafe { io.as_ref() }?;
    let file = unsafe { io.opaque.cast::<FileHandle>().as_ref() }?;
    file.is_valid().then_some(file)
}

/// A slice may not span more than `isize::MAX` bytes.
fn slice_len(len: io_uint64) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX).min(isize::MAX as usize)
}

unsafe extern "C" fn file_access_read(io: *mut Io, buf: *mut c_void, len: io_uint64) -> io_sint64 {
    let Some(file) = (unsafe { file_of(io) }) else {
        error!("file_access_read: file handle is null or closed");
        return 0;
    };
    if buf.is_null() || len == 0 {
        return 0;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), slice_len(len)) };
    match file.read(buf) {
        Ok(transferred) => transferred as io_sint64,
        Err(err) => {
            error!("file_access_read: {err:?}");
            -1
        }
    }
}

unsafe extern "C" fn file_access_seek(io: *mut Io, offset: io_uint64) -> c_int {
    let Some(file) = (unsafe { file_of(io) }) else {
        error!("file_access_seek: file handle is null or closed");
        return 0;
    };
    match file.seek(offset) {
        Ok(()) => 1,
        Err(err) => {
            error!("file_access_seek(offset: {offset}): {err:?}");
            0
        }
    }
}

unsafe extern "C" fn file_access_tell(io: *mut Io) -> io_sint64 {
    let Some(file) = (unsafe { file_of(io) }) else {
        error!("file_access_tell: file handle is null or closed");
        return 0;
    };
    match file.position() {
        Ok(position) => io_sint64::try_from(position).unwrap_or(io_sint64::MAX),
        Err(err) => {
            error!("file_access_tell: {err:?}");
            0
        }
    }
}

unsafe extern "C" fn file_access_length(io: *mut Io) -> io_sint64 {
    let Some(file) = (unsafe { file_of(io) }) else {
        error!("file_access_length: file handle is null or closed");
        return 0;
    };
    match file.length() {
        Ok(length) => io_sint64::try_from(length).unwrap_or(io_sint64::MAX),
        Err(err) => {
            error!("file_access_length: {err:?}");
            0
        }
    }
}

unsafe extern "C" fn file_access_duplicate(io: *mut Io) -> *mut Io {
    let Some(file) = (unsafe { file_of(io) }) else {
        error!("file_access_duplicate: file handle is null or closed");
        return std::ptr::null_mut();
    };
    debug!("file_access_duplicate: ref_count={}", file.ref_count() + 1);
    new_io(Box::new(file.reference()))
}

unsafe extern "C" fn file_access_destroy(io: *mut Io) {
    if io.is_null() {
        return;
    }
    let io = unsafe { Box::from_raw(io) };
    if !io.opaque.is_null() {
        drop(unsafe { Box::from_raw(io.opaque.cast::<FileHandle>()) });
    }
}
