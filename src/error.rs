//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, from the point of view of someone running `ketl`.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not set up logging")]
    Logging,
    #[display("database error")]
    Store,
    #[display("could not set up transports")]
    Transport,
    #[display("setup of API {_0} failed")]
    Setup(#[error(not(source))] String),
    #[display("pipeline failed")]
    Pipeline,
    /// Some files could not be extracted; the rest were processed.
    #[display("{_0} file(s) could not be extracted")]
    Incomplete(#[error(not(source))] usize),
}
