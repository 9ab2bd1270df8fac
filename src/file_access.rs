use crate::error::{path_does_not_exist, Result};
use log::{debug, error, info};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// `FileAccess` is the minimal set of stream primitives the adapter needs from the host.
/// Every `Read + Seek` type gets an implementation for free.
pub trait FileAccess {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn seek(&mut self, position: u64) -> std::io::Result<()>;
    fn position(&mut self) -> std::io::Result<u64>;
    fn length(&mut self) -> std::io::Result<u64>;
}

impl<T: Read + Seek> FileAccess for T {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // Keep reading until the buffer is full or the stream reports EOF.
        let mut transferred = 0;
        while transferred < buf.len() {
            match Read::read(self, &mut buf[transferred..]) {
                Ok(0) => break,
                Ok(read) => transferred += read,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(transferred)
    }

    fn seek(&mut self, position: u64) -> std::io::Result<()> {
        Seek::seek(self, SeekFrom::Start(position)).map(|_| ())
    }

    fn position(&mut self) -> std::io::Result<u64> {
        self.stream_position()
    }

    fn length(&mut self) -> std::io::Result<u64> {
        let current = self.stream_position()?;
        let end = Seek::seek(self, SeekFrom::End(0))?;
        if current != end {
            Seek::seek(self, SeekFrom::Start(current))?;
        }
        Ok(end)
    }
}

pub(crate) type SharedStream = Rc<RefCell<Option<Box<dyn FileAccess>>>>;

/// `FileHandle` is a shared-ownership handle to an open, seekable byte stream.
///
/// Cloning (or calling [`FileHandle::reference`]) adds an owner, dropping removes one.
/// The stream itself is released together with the last owner.
pub struct FileHandle {
    pub(crate) stream: SharedStream,
    path: Rc<Path>,
}

impl FileHandle {
    pub fn new<F: FileAccess + 'static, P: AsRef<Path>>(stream: F, path: P) -> Self {
        Self {
            stream: Rc::new(RefCell::new(Some(Box::new(stream)))),
            path: Rc::from(path.as_ref()),
        }
    }

    /// `reference` returns a new owner of the same underlying stream.
    pub fn reference(&self) -> Self {
        Self {
            stream: Rc::clone(&self.stream),
            path: Rc::clone(&self.path),
        }
    }

    /// `ref_count` is the number of owners currently sharing the stream.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.stream)
    }

    /// `is_valid` tells whether the stream is still open and not in use.
    pub fn is_valid(&self) -> bool {
        self.stream
            .try_borrow()
            .is_ok_and(|stream| stream.is_some())
    }

    /// `close` releases the stream for every owner.
    /// Owners keep existing, but any further access fails.
    pub fn close(&self) {
        debug!(r#"FileHandle::close(path: "{}")"#, self.path.display());
        match self.stream.try_borrow_mut() {
            Ok(mut stream) => drop(stream.take()),
            Err(_) => error!(r#"FileHandle::close(path: "{}"): stream is busy"#, self.path.display()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.with_stream(|stream| stream.read(buf))
    }

    pub fn seek(&self, position: u64) -> std::io::Result<()> {
        self.with_stream(|stream| stream.seek(position))
    }

    pub fn position(&self) -> std::io::Result<u64> {
        self.with_stream(|stream| stream.position())
    }

    pub fn length(&self) -> std::io::Result<u64> {
        self.with_stream(|stream| stream.length())
    }

    fn with_stream<T, F>(&self, operation: F) -> std::io::Result<T>
    where
        F: FnOnce(&mut dyn FileAccess) -> std::io::Result<T>,
    {
        let mut stream = self.stream.try_borrow_mut().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "file handle is busy")
        })?;
        match stream.as_deref_mut() {
            Some(stream) => operation(stream),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("file handle for {} is closed", self.path.display()),
            )),
        }
    }
}

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        self.reference()
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("ref_count", &self.ref_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// `FileProvider` opens host files for reading.
pub trait FileProvider {
    fn open(&self, path: &Path) -> Result<FileHandle>;
}

/// `OsFileProvider` opens files from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileProvider;

impl FileProvider for OsFileProvider {
    fn open(&self, path: &Path) -> Result<FileHandle> {
        info!(r#"OsFileProvider::open(path: "{}")"#, path.display());
        let file = File::open(path)?;
        Ok(FileHandle::new(file, path))
    }
}

/// `MemoryFileProvider` serves files from byte buffers registered up front.
/// Each `open` produces an independent stream over the shared bytes.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileProvider {
    files: HashMap<PathBuf, Arc<[u8]>>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: Into<PathBuf>, B: Into<Arc<[u8]>>>(&mut self, path: P, bytes: B) -> &mut Self {
        self.files.insert(path.into(), bytes.into());
        self
    }
}

impl FileProvider for MemoryFileProvider {
    fn open(&self, path: &Path) -> Result<FileHandle> {
        info!(r#"MemoryFileProvider::open(path: "{}")"#, path.display());
        let bytes = self
            .files
            .get(path)
            .ok_or_else(|| path_does_not_exist(path.to_string_lossy().to_string()))?;
        Ok(FileHandle::new(Cursor::new(Arc::clone(bytes)), path))
    }
}
