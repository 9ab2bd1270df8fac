#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive is not open")]
    NotOpen,
    #[error("Failed to open archive: {0}")]
    OpenFailed(String),
    #[error("No archiver registered for format: {0}")]
    UnknownFormat(String),
    #[error("Archive path cannot be converted to utf8")]
    PathNotUtf8,
    #[error("Archive enumeration failed")]
    Enumeration,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn path_does_not_exist(message: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, message))
}
