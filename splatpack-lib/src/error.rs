use std::path::PathBuf;
use std::{fmt, io};

#[derive(Debug)]
pub enum PackError {
    EmptyInput,
    InvalidSettings(String),
    InvalidSplat(String),
    ParsePly(String),
    Camera(String),
    Metadata(String),
    Io { path: PathBuf, source: io::Error },
}

impl PackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::EmptyInput => {
                write!(f, "The splat array is empty.")
            }
            PackError::InvalidSettings(e) => {
                write!(f, "Invalid compression settings: {}", e)
            }
            PackError::InvalidSplat(e) => {
                write!(f, "Invalid splat data: {}", e)
            }
            PackError::ParsePly(e) => {
                write!(f, "Failed to parse splats from the buffer: {}", e)
            }
            PackError::Camera(e) => {
                write!(f, "Failed to import cameras: {}", e)
            }
            PackError::Metadata(e) => {
                write!(f, "Failed to serialize asset metadata: {}", e)
            }
            PackError::Io { path, source } => {
                write!(f, "An I/O error occurred on '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for PackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
