use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const LONGEST_MAGIC: usize = 6;

impl Compression {
    /// Detect compression from the (last) file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "bz2" => Compression::Bzip2,
                "gz" => Compression::Gzip,
                #[cfg(feature = "xz")]
                "xz" => Compression::Xz,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Detect compression from the leading bytes of a stream.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Compression::Bzip2;
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        #[cfg(feature = "xz")]
        if bytes.starts_with(&XZ_MAGIC) {
            return Compression::Xz;
        }
        Compression::None
    }

    /// Detect the compression of a file on disk.
    ///
    /// The extension wins when it names a format; otherwise the first bytes of
    /// the file are inspected, which catches servers that hand out gzipped
    /// content under a plain name.
    pub fn detect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let by_extension = Self::from_path(path);
        if by_extension != Compression::None {
            return Ok(by_extension);
        }
        let mut head = Vec::with_capacity(LONGEST_MAGIC);
        File::open(path)
            .and_then(|file| file.take(LONGEST_MAGIC as u64).read_to_end(&mut head))
            .or_raise(|| ErrorKind::Io)?;
        Ok(Self::from_magic_bytes(&head))
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case("data.csv", Compression::None)]
    #[case(".gz", Compression::None)]
    #[case("data.csv.gz", Compression::Gzip)]
    #[case("data.JSON.BZ2", Compression::Bzip2)]
    #[case("release.tar.gz", Compression::Gzip)]
    #[cfg_attr(feature = "xz", case("data.csv.xz", Compression::Xz))]
    fn test_from_path(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_path(test), expected);
    }

    #[rstest]
    #[case(b"a,b,c\n", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(&[0x42, 0x5A, 0x68, 0x39], Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00], Compression::Xz))]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
    }

    #[test]
    fn test_detect_sniffs_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export");
        std::fs::write(&path, Compression::Gzip.compress(b"a,b\n1,2\n").unwrap()).unwrap();
        assert_eq!(Compression::detect(&path).unwrap(), Compression::Gzip);
        let plain = dir.path().join("plain.csv");
        std::fs::write(&plain, b"a,b\n").unwrap();
        assert_eq!(Compression::detect(&plain).unwrap(), Compression::None);
        assert!(Compression::detect(dir.path().join("missing")).is_err());
    }
}
