//! Compression Operations

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::{Compression as BzCompression, read::MultiBzDecoder, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::MultiGzDecoder, write::GzEncoder};
use std::io::{Read, Write};
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};

// Only used to produce fixtures and small outputs, so favour speed.
const BZIP2_LEVEL: BzCompression = BzCompression::fast();
const GZIP_LEVEL: GzCompression = GzCompression::fast();
#[cfg(feature = "xz")]
const XZ_LEVEL: u32 = 1;

/// A type-erased reader that can cross threads (and `.await` points).
pub type BoxRead<'a> = Box<dyn Read + Send + 'a>;

impl Compression {
    /// Wrap a reader so that reading from it yields decompressed bytes.
    ///
    /// Multi-member gzip and bzip2 streams (concatenated files) are read to
    /// the end, not just their first member.
    pub fn wrap_reader<'a, R: Read + Send + 'a>(&self, reader: R) -> BoxRead<'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
            Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new_multi_decoder(reader)),
        }
    }

    /// Compress a byte slice in memory.
    ///
    /// ```
    /// use ketl_archive::Compression;
    ///
    /// let compressed = Compression::Gzip.compress(b"a,b\n1,2\n").unwrap();
    /// assert_eq!(Compression::from_magic_bytes(&compressed), Compression::Gzip);
    /// assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), b"a,b\n1,2\n");
    /// ```
    #[instrument(skip(input), fields(format = %self, input_size = input.len()))]
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match self {
            Compression::None => output.extend_from_slice(input),
            Compression::Bzip2 => {
                let mut encoder = BzEncoder::new(&mut output, BZIP2_LEVEL);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(&mut output, GZIP_LEVEL);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
            #[cfg(feature = "xz")]
            Compression::Xz => {
                let mut encoder = XzEncoder::new(&mut output, XZ_LEVEL);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
        }
        Ok(output)
    }

    /// Decompress a byte slice in memory.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.wrap_reader(input).read_to_end(&mut output).or_raise(|| ErrorKind::InvalidData)?;
        Ok(output)
    }
}
