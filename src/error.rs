//! Command Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not open the archive root at {}", _0.display())]
    ArchiveRoot(#[error(not(source))] std::path::PathBuf),
    #[display("remote service error")]
    Remote,
    #[display("archive error")]
    Archive,
    #[display("could not query the archive")]
    Replay,
    #[display("could not write output")]
    Output,
}
