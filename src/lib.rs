//! `vdf-reader` lists the files inside packed archives such as the VDF packages of Gothic 1 and 2.
//! The archive engine never touches the filesystem itself: it reads through a C-style
//! stream control block ([`engine::Io`]) that adapts a shared, reference counted
//! [`FileHandle`] supplied by a pluggable [`FileProvider`].
//!
//! # Example
//! ```rust,no_run
//! use vdf_reader::ArchiveReader;
//! use vdf_reader::error::Result;
//!
//! fn main() -> Result<()> {
//!     let mut archive = ArchiveReader::new();
//!     archive.format("vdf")?.open("Data/Speech.vdf")?;
//!     for file_name in archive.get_files()? {
//!         println!("{file_name}");
//!     }
//!     archive.close()
//! }
//! ```
//!

mod archive_reader;
pub mod engine;
pub mod error;
pub mod file_access;
pub mod registry;
pub mod stream_adapter;
pub mod vdf;

pub use crate::archive_reader::*;
pub use error::*;
pub use file_access::{FileAccess, FileHandle, FileProvider, MemoryFileProvider, OsFileProvider};
pub use registry::Registry;
