use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("key authentication failed: header checksum mismatch")]
    AuthenticationFailure,

    #[error("corrupt archive: {0}")]
    CorruptArchive(#[source] Box<PackError>),

    #[error("malformed {record} record: expected {expected} bytes, got {actual}")]
    MalformedRecord {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("duplicate directory entry: {0}")]
    DuplicateEntry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;
