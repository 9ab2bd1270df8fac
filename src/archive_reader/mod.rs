mod archive;
#[cfg(test)]
mod archive_tests;

pub use archive::*;
