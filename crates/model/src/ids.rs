use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

identifier!(
    /// Generated identifier of an [`Api`](crate::Api) record.
    ApiId
);
identifier!(
    /// Generated identifier of a [`Source`](crate::Source) record.
    SourceId
);
identifier!(
    /// Generated identifier of a [`CachedFile`](crate::CachedFile) record.
    CachedFileId
);
identifier!(
    /// Generated identifier of an [`ExpectedFile`](crate::ExpectedFile) record.
    ExpectedFileId
);
