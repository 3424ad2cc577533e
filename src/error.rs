// Error taxonomy for patch generation and application.
//
// Structural problems in the inputs (no recognizable executable, mismatched
// formats) are not errors: generation degrades to raw mode instead. Errors
// here are the conditions a caller can act on: I/O failures, malformed
// patches, and images that do not match the patch.

use std::io;

use thiserror::Error;

/// Errors surfaced by the public generate/apply/file APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// An input file could not be read.
    #[error("failed to read input: {0}")]
    FileRead(#[source] io::Error),

    /// An output file could not be written.
    #[error("failed to write output: {0}")]
    FileWrite(#[source] io::Error),

    /// The patch is structurally malformed.
    #[error("invalid patch: {0}")]
    InvalidPatch(&'static str),

    /// The supplied old image does not match the one the patch was made from.
    #[error("old image does not match the patch")]
    InvalidOldImage,

    /// The reconstructed image failed checksum verification.
    #[error("reconstructed image failed verification")]
    InvalidNewImage,

    /// A disassembler produced inconsistent reference data.
    #[error("disassembly failed: {0}")]
    Disassembly(&'static str),

    /// The patch names an executable type no available disassembler handles.
    #[error("unsupported executable type {0}")]
    UnsupportedExeType(u8),

    /// Offsets are 32-bit; larger images are not supported.
    #[error("image too large (max 4 GiB)")]
    ImageTooLarge,
}

impl Error {
    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FileRead(_) => 2,
            Error::FileWrite(_) => 3,
            Error::InvalidPatch(_)
            | Error::InvalidOldImage
            | Error::InvalidNewImage
            | Error::Disassembly(_)
            | Error::UnsupportedExeType(_)
            | Error::ImageTooLarge => 4,
        }
    }
}
