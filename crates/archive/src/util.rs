use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl Compression {
    /// Returns the file extension for this compression format, including the dot.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
            #[cfg(feature = "xz")]
            Compression::Xz => ".xz",
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
        }
    }

    /// Name of the decompressed file: `data.csv.gz` becomes `data.csv`.
    ///
    /// Paths without a matching extension are returned unchanged.
    #[must_use]
    pub fn strip_extension(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let ext = self.extension().trim_start_matches('.');
        match path.extension().and_then(|e| e.to_str()) {
            Some(actual) if !ext.is_empty() && actual.eq_ignore_ascii_case(ext) => path.with_extension(""),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::Gzip, "data.csv.gz", "data.csv")]
    #[case(Compression::Bzip2, "dir/data.json.BZ2", "dir/data.json")]
    #[case(Compression::Gzip, "data.csv", "data.csv")]
    #[case(Compression::None, "data.csv", "data.csv")]
    fn test_strip_extension(#[case] compression: Compression, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(compression.strip_extension(path), Path::new(expected));
    }

    #[test]
    fn test_display() {
        assert_eq!(Compression::Gzip.to_string(), "gzip");
        assert_eq!(Compression::default().to_string(), "none");
    }
}
