//! Resource model describing *where data lives*.
//!
//! The model is a strict ownership tree:
//!
//! ```text
//! Api ──< Source ──< CachedFile ──< ExpectedFile
//! ```
//!
//! - An [`Api`] is a named configuration root. Names are unique.
//! - A [`Source`] carries a base location (URL prefix) and a base local
//!   directory. It never names a retrievable resource itself.
//! - A [`CachedFile`] is one retrievable remote resource, addressed relative
//!   to its source, plus the [`Fingerprint`] recorded the last time it was
//!   fetched.
//! - An [`ExpectedFile`] is an artifact that must exist on disk once its
//!   cached file has been fetched (and unpacked, if it is an archive).
//!
//! Records reference their parent by identifier rather than by pointer. The
//! `New*` types are drafts: everything needed to create a record, validated on
//! construction, and doubling as the natural key used by get-or-create.

mod api;
pub mod error;
mod file;
mod ids;
mod path;
mod source;

pub use crate::api::{Api, BasicAuth, Cookie, Credentials, NewApi, TokenHeader};
pub use crate::file::{CachedFile, ExpectedFile, ExpectedMode, Fingerprint, NewCachedFile, NewExpectedFile};
pub use crate::ids::{ApiId, CachedFileId, ExpectedFileId, SourceId};
pub use crate::path::validate as validate_path;
pub use crate::source::{NewSource, Source};
