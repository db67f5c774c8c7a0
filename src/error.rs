use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeegError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("File contains format errors")]
    FormatError,

    #[error("Signal index {0} out of range")]
    InvalidSignalIndex(usize),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File is discontinuous (EDF+D is not supported)")]
    DiscontinuousFile,

    #[error("Invalid header size")]
    InvalidHeader,

    #[error("Invalid number of signals: {0}")]
    InvalidSignalCount(i32),

    #[error("Physical min equals physical max")]
    PhysicalMinEqualsMax,

    #[error("Digital min equals digital max")]
    DigitalMinEqualsMax,

    #[error("Signals use different sampling rates: {0}")]
    MismatchedSampleRate(String),

    #[error("Invalid recording: {0}")]
    InvalidRecording(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Event table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Event spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Event table is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// The first retained event carries the repeat-previous sentinel, so
    /// there is no earlier label to inherit.
    #[error("First annotation label is '{0}': no previous annotation to inherit from")]
    UnresolvedLabel(String),

    #[error("No bipolar channels created for prefixes [{0}]")]
    NoBipolarChannels(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid channel pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SeegError {
    /// Whether the error is a violated data precondition rather than an
    /// I/O or parsing failure.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            SeegError::UnresolvedLabel(_)
                | SeegError::NoBipolarChannels(_)
                | SeegError::InvalidRecording(_)
                | SeegError::MismatchedSampleRate(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SeegError>;
