use std::io;
use thiserror::Error;

/// Main error type for VFS operations
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("Invalid path format: {0}")]
    PathFormatInvalid(String),

    #[error("Mountpoint not found: {0}")]
    MountpointNotFound(String),

    #[error("Mountpoint not mounted: {0}")]
    MountpointNotMounted(String),

    #[error("Mountpoint already mounted: {0}")]
    MountpointAlreadyMounted(String),

    /// Group or read-only denial raised by the dispatcher
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    /// Access denied by the backing store
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Adapter not supported: {0}")]
    AdapterUnsupported(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Requested range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("File too large")]
    FileTooLarge,

    /// A cross-adapter move wrote the destination but the source could not be removed
    #[error("Moved {from} to {to} but the source was retained: {reason}")]
    SourceRetained {
        from: String,
        to: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VfsError {
    /// Classify an OS error raised while operating on `path`
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(path),
            io::ErrorKind::PermissionDenied => VfsError::AccessDenied(path),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path),
            io::ErrorKind::IsADirectory => VfsError::IsADirectory(path),
            io::ErrorKind::NotADirectory => VfsError::NotADirectory(path),
            _ => VfsError::Io(err),
        }
    }

    /// Convert error to a response status code for the transport
    pub fn status_code(&self) -> u16 {
        match self {
            VfsError::NotFound(_) | VfsError::MountpointNotFound(_) => 404,
            VfsError::AccessDenied(_) => 401,
            VfsError::PermissionDenied(_) => 403,
            VfsError::RangeNotSatisfiable(_) => 416,
            VfsError::FileTooLarge => 413,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => 404,
                io::ErrorKind::PermissionDenied => 401,
                _ => 400,
            },
            _ => 400,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_)) || self.status_code() == 404
    }
}

/// Result type alias for VFS operations
pub type Result<T> = std::result::Result<T, VfsError>;
