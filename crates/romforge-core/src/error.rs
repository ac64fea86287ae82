use std::path::PathBuf;

/// Errors produced by the romforge engines and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZip(#[from] sevenz_rust::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Profile error: {0}")]
    Profile(#[from] toml::de::Error),

    /// The DAT text is structurally invalid and cannot be partially processed
    #[error("Malformed DAT: {0}")]
    MalformedDat(String),

    /// A required argument was missing or inconsistent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a supported container: {}", .0.display())]
    UnsupportedContainer(PathBuf),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Cooperative cancellation was requested
    #[error("Operation canceled")]
    Canceled,
}

impl RomError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDat(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn entry_not_found(msg: impl Into<String>) -> Self {
        Self::EntryNotFound(msg.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, RomError>;
