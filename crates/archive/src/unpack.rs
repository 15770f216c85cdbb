//! Unpacking fetched archives onto disk.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument, warn};

/// A container holding several files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// A tarball, optionally compressed as a whole.
    Tar(Compression),
    Zip,
}

impl ArchiveFormat {
    /// Detect an archive format from the file name.
    ///
    /// ```
    /// use ketl_archive::{ArchiveFormat, Compression};
    ///
    /// assert_eq!(ArchiveFormat::from_path("release.tar.gz"), Some(ArchiveFormat::Tar(Compression::Gzip)));
    /// assert_eq!(ArchiveFormat::from_path("release.tgz"), Some(ArchiveFormat::Tar(Compression::Gzip)));
    /// assert_eq!(ArchiveFormat::from_path("data.csv.gz"), None);
    /// ```
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".zip") {
            return Some(ArchiveFormat::Zip);
        }
        if name.ends_with(".tgz") {
            return Some(ArchiveFormat::Tar(Compression::Gzip));
        }
        if name.ends_with(".tbz2") || name.ends_with(".tbz") {
            return Some(ArchiveFormat::Tar(Compression::Bzip2));
        }
        #[cfg(feature = "xz")]
        if name.ends_with(".txz") {
            return Some(ArchiveFormat::Tar(Compression::Xz));
        }
        let compression = Compression::from_path(&name);
        let inner = compression.strip_extension(&name);
        match inner.extension().and_then(|e| e.to_str()) {
            Some("tar") => Some(ArchiveFormat::Tar(compression)),
            _ => None,
        }
    }
}

/// Unpack `archive` into the directory `dest`, returning the path of every
/// file written, sorted.
///
/// Tarballs and zip files are extracted in full. A single compressed file
/// (`data.csv.gz`) is decompressed to `dest/data.csv`. Anything else is
/// [`ErrorKind::NotAnArchive`].
///
/// Entries that would land outside of `dest` abort the unpacking with
/// [`ErrorKind::UnsafeEntry`]. This is blocking I/O; async callers should run
/// it on a blocking thread.
#[instrument(fields(archive = %archive.display(), dest = %dest.display()))]
pub fn unpack(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest).or_raise(|| ErrorKind::Io)?;
    let mut written = match ArchiveFormat::from_path(archive) {
        Some(ArchiveFormat::Tar(compression)) => unpack_tar(archive, compression, dest)?,
        Some(ArchiveFormat::Zip) => unpack_zip(archive, dest)?,
        None => match Compression::detect(archive)? {
            Compression::None => exn::bail!(ErrorKind::NotAnArchive(archive.to_path_buf())),
            compression => vec![decompress_file(archive, compression, dest)?],
        },
    };
    written.sort();
    debug!(files = written.len(), "unpacked archive");
    Ok(written)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path).or_raise(|| ErrorKind::Io)?))
}

/// Lexically check that an entry name stays inside the destination.
///
/// `./` (common as the first entry of a tarball) is the destination itself
/// and comes back empty.
fn enclosed(name: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            },
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn unpack_tar(archive: &Path, compression: Compression, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut tar = tar::Archive::new(compression.wrap_reader(open(archive)?));
    let mut written = Vec::new();
    for entry in tar.entries().or_raise(|| ErrorKind::InvalidData)? {
        let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
        let name = entry.path().or_raise(|| ErrorKind::InvalidData)?.into_owned();
        let relative = enclosed(&name).ok_or_else(|| ErrorKind::UnsafeEntry(name.clone()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let is_file = entry.header().entry_type().is_file();
        if !entry.unpack_in(dest).or_raise(|| ErrorKind::Io)? {
            exn::bail!(ErrorKind::UnsafeEntry(name));
        }
        if is_file {
            written.push(dest.join(relative));
        }
    }
    Ok(written)
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut zip = zip::ZipArchive::new(open(archive)?).or_raise(|| ErrorKind::InvalidData)?;
    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).or_raise(|| ErrorKind::InvalidData)?;
        let Some(relative) = file.enclosed_name() else {
            exn::bail!(ErrorKind::UnsafeEntry(PathBuf::from(file.name())));
        };
        let target = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&target).or_raise(|| ErrorKind::Io)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let mut out = File::create(&target).or_raise(|| ErrorKind::Io)?;
        io::copy(&mut file, &mut out).or_raise(|| ErrorKind::InvalidData)?;
        written.push(target);
    }
    if written.is_empty() {
        warn!("zip archive contained no files");
    }
    Ok(written)
}

fn decompress_file(archive: &Path, compression: Compression, dest: &Path) -> Result<PathBuf> {
    let name = archive.file_name().ok_or_else(|| ErrorKind::NotAnArchive(archive.to_path_buf()))?;
    let mut target = dest.join(compression.strip_extension(name));
    // Sniffed rather than named: the name has nothing to strip.
    if target.as_path() == archive {
        target = dest.join(format!("{}.out", name.to_string_lossy()));
    }
    let mut reader = compression.wrap_reader(open(archive)?);
    let mut out = File::create(&target).or_raise(|| ErrorKind::Io)?;
    io::copy(&mut reader, &mut out).or_raise(|| ErrorKind::InvalidData)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case("a.zip", Some(ArchiveFormat::Zip))]
    #[case("a.tar", Some(ArchiveFormat::Tar(Compression::None)))]
    #[case("A.TAR.GZ", Some(ArchiveFormat::Tar(Compression::Gzip)))]
    #[case("a.tar.bz2", Some(ArchiveFormat::Tar(Compression::Bzip2)))]
    #[case("a.tbz2", Some(ArchiveFormat::Tar(Compression::Bzip2)))]
    #[cfg_attr(feature = "xz", case("a.tar.xz", Some(ArchiveFormat::Tar(Compression::Xz))))]
    #[case("a.csv", None)]
    #[case("a.csv.gz", None)]
    fn test_archive_format_from_path(#[case] path: &str, #[case] expected: Option<ArchiveFormat>) {
        assert_eq!(ArchiveFormat::from_path(path), expected);
    }

    #[rstest]
    #[case("a/b.csv", Some("a/b.csv"))]
    #[case("./a/./b.csv", Some("a/b.csv"))]
    #[case("a/../b.csv", Some("b.csv"))]
    #[case("../b.csv", None)]
    #[case("/etc/passwd", None)]
    #[case(".", Some(""))]
    fn test_enclosed(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(enclosed(Path::new(name)), expected.map(PathBuf::from));
    }

    fn tarball(compression: Compression, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        compression.compress(&builder.into_inner().unwrap()).unwrap()
    }

    #[rstest]
    #[case("release.tar", Compression::None)]
    #[case("release.tar.gz", Compression::Gzip)]
    #[case("release.tar.bz2", Compression::Bzip2)]
    fn test_unpack_tar(#[case] name: &str, #[case] compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join(name);
        let files: &[(&str, &[u8])] = &[("data/b.csv", b"b\n2\n"), ("a.csv", b"a\n1\n")];
        fs::write(&archive, tarball(compression, files)).unwrap();
        let dest = dir.path().join("out");
        let written = unpack(&archive, &dest).unwrap();
        assert_eq!(written, vec![dest.join("a.csv"), dest.join("data/b.csv")]);
        assert_eq!(fs::read(dest.join("data/b.csv")).unwrap(), b"b\n2\n");
    }

    #[test]
    fn test_unpack_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.add_directory("nested/", options).unwrap();
        writer.start_file("nested/one.json", options).unwrap();
        writer.write_all(br#"[{"a": 1}]"#).unwrap();
        writer.start_file("two.csv", options).unwrap();
        writer.write_all(b"x\n1\n").unwrap();
        writer.finish().unwrap();
        let dest = dir.path().join("out");
        let written = unpack(&archive, &dest).unwrap();
        assert_eq!(written, vec![dest.join("nested/one.json"), dest.join("two.csv")]);
    }

    #[test]
    fn test_unpack_single_compressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("data.csv.gz");
        fs::write(&archive, Compression::Gzip.compress(b"a\n1\n").unwrap()).unwrap();
        let written = unpack(&archive, dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("data.csv")]);
        assert_eq!(fs::read(&written[0]).unwrap(), b"a\n1\n");
    }

    #[test]
    fn test_plain_files_are_not_archives() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("data.csv");
        fs::write(&plain, b"a\n1\n").unwrap();
        let err = unpack(&plain, &dir.path().join("out")).unwrap_err();
        assert!(matches!(*err, ErrorKind::NotAnArchive(_)));
    }
}
