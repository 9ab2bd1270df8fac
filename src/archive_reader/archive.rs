use crate::engine::{ArchiveHandle, Archiver, EnumerateCallbackResult, Io};
use crate::error::{Error, Result};
use crate::file_access::{FileHandle, FileProvider, OsFileProvider};
use crate::registry::Registry;
use crate::stream_adapter::make_io;
use crate::vdf::VDF_ARCHIVER;
use libc::{c_char, c_void};
use log::{debug, error, info};
use std::ffi::CStr;
use std::path::{Path, PathBuf};

/// An archive handle together with the archiver that produced it,
/// so it is always closed by the right one.
struct OpenArchive {
    handle: ArchiveHandle,
    archiver: &'static Archiver,
}

/// `ArchiveReader` is a session over one archive at a time.
///
/// It starts closed, [`open`](ArchiveReader::open) moves it to open and
/// [`close`](ArchiveReader::close) (or dropping it) back to closed.
pub struct ArchiveReader {
    /// `archiver` reads the archives passed to the next `open`.
    archiver: &'static Archiver,
    /// `provider` turns paths into file handles.
    provider: Box<dyn FileProvider>,
    file: Option<FileHandle>,
    /// `io` is only non-null while the adapter has not been claimed by an archive.
    io: *mut Io,
    archive: Option<OpenArchive>,
    path: Option<PathBuf>,
}

impl ArchiveReader {
    /// `new` creates a closed session reading VDF archives from the local filesystem.
    pub fn new() -> Self {
        ArchiveReader {
            archiver: &VDF_ARCHIVER,
            provider: Box::new(OsFileProvider),
            file: None,
            io: std::ptr::null_mut(),
            archive: None,
            path: None,
        }
    }

    /// `format` selects the built-in archiver registered for `tag`.
    ///
    /// # Note:
    /// The change applies from the next `open`.
    pub fn format(&mut self, tag: &str) -> Result<&mut Self> {
        let archiver = Registry::with_builtin().get(tag)?;
        Ok(self.archiver(archiver))
    }

    /// `archiver` sets the archiver directly, e.g. one taken from a custom [`Registry`].
    pub fn archiver(&mut self, archiver: &'static Archiver) -> &mut Self {
        self.archiver = archiver;
        self
    }

    /// `file_provider` replaces the source of file handles.
    pub fn file_provider<F: FileProvider + 'static>(&mut self, provider: F) -> &mut Self {
        self.provider = Box::new(provider);
        self
    }
}

impl Default for ArchiveReader {
    fn default() -> Self {
        Self::new()
    }
}

// Lifecycle
impl ArchiveReader {
    /// `open` opens the archive at `path`, closing the current one first.
    ///
    /// Nothing is kept when the file cannot be opened or the archiver rejects it.
    /// A file the provider cannot open is reported as [`Error::Io`],
    /// an archive the archiver rejects as [`Error::OpenFailed`].
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(r#"ArchiveReader::open(path: "{}")"#, path.display());
        if self.is_open() {
            if let Err(error) = self.close() {
                debug!("implicit close failed: {error:?}");
            }
        }
        let label = path.to_str().ok_or(Error::PathNotUtf8)?;
        let file = self.provider.open(path)?;
        self.io = make_io(&file);
        self.file = Some(file);

        let mut claimed = false;
        let handle = unsafe { (self.archiver.open_archive)(self.io, label, false, &mut claimed) };
        let Some(handle) = handle else {
            error!(r#"{} rejected "{label}" (claimed: {claimed})"#, self.archiver.info.description);
            self.close()?;
            return Err(Error::OpenFailed(label.to_string()));
        };
        self.io = std::ptr::null_mut();
        self.archive = Some(OpenArchive {
            handle,
            archiver: self.archiver,
        });
        self.path = Some(path.into());
        Ok(())
    }

    /// `close` releases the archive, the adapter and the file handle.
    /// Closing a session that is not open reports [`Error::NotOpen`].
    pub fn close(&mut self) -> Result<()> {
        info!("ArchiveReader::close()");
        let Some(file) = self.file.take() else {
            error!("ArchiveReader cannot be closed because it is not open");
            return Err(Error::NotOpen);
        };
        if let Some(archive) = self.archive.take() {
            unsafe { (archive.archiver.close_archive)(archive.handle) };
        }
        let io = std::mem::replace(&mut self.io, std::ptr::null_mut());
        // Only reached when no archive claimed the adapter.
        if let Some(destroy) = unsafe { io.as_ref() }.and_then(|io| io.destroy) {
            unsafe { destroy(io) };
        }
        self.path = None;
        debug!("file handle released, ref_count={}", file.ref_count() - 1);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// `path` returns the path of the open archive.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// Consumers
impl ArchiveReader {
    /// `get_files` lists every file in the archive in the order the archiver visits them.
    /// Names are decoded as UTF-8, invalid sequences are replaced.
    pub fn get_files(&self) -> Result<Vec<String>> {
        info!("ArchiveReader::get_files()");
        let Some(archive) = &self.archive else {
            error!("ArchiveReader must be opened before use");
            return Err(Error::NotOpen);
        };
        let mut names = Vec::<String>::new();
        let completed = unsafe {
            (archive.archiver.enumerate)(
                archive.handle,
                "",
                append_file_name,
                "",
                (&mut names as *mut Vec<String>).cast(),
            )
        };
        if !completed {
            return Err(Error::Enumeration);
        }
        Ok(names)
    }
}

unsafe extern "C" fn append_file_name(
    data: *mut c_void,
    _origdir: *const c_char,
    fname: *const c_char,
) -> EnumerateCallbackResult {
    let Some(names) = (unsafe { data.cast::<Vec<String>>().as_mut() }) else {
        return EnumerateCallbackResult::Error;
    };
    if fname.is_null() {
        return EnumerateCallbackResult::Error;
    }
    let fname = unsafe { CStr::from_ptr(fname) }.to_bytes();
    names.push(String::from_utf8_lossy(fname).into_owned());
    EnumerateCallbackResult::Ok
}

impl Drop for ArchiveReader {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(error) = self.close() {
                error!("Failed to clean up ArchiveReader: {error:?}")
            }
        }
    }
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("format", &self.archiver.info.extension)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
