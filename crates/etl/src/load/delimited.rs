use crate::Batch;
use crate::error::{ErrorKind, Result};
use crate::load::Load;
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Writes batches to a CSV (`.csv`) or TSV (`.tsv`) file.
///
/// The destination is truncated when the first batch arrives (or on
/// finalize, if none did) and the header is written once.
#[derive(Debug)]
pub struct DelimitedFileLoader {
    path: PathBuf,
    name: String,
    delimiter: u8,
    file: Option<File>,
    header: Vec<String>,
}

impl DelimitedFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
        let delimiter = match extension.as_deref() {
            Some("csv") => b',',
            Some("tsv") => b'\t',
            _ => exn::bail!(ErrorKind::Configuration(format!("unknown output file type: {}", path.display()))),
        };
        Ok(Self { name: path.display().to_string(), path, delimiter, file: None, header: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create(&self) -> Result<File> {
        let failed = || ErrorKind::Load(self.name.clone());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.or_raise(failed)?;
        }
        let file = File::create(&self.path).await.or_raise(failed)?;
        debug!(path = %self.path.display(), "output truncated");
        Ok(file)
    }

    fn encode<'a, R, F>(&self, records: R) -> Result<Vec<u8>>
    where
        R: IntoIterator<Item = F>,
        F: IntoIterator<Item = &'a str>,
    {
        let failed = || ErrorKind::Load(self.name.clone());
        let mut writer = csv::WriterBuilder::new().delimiter(self.delimiter).from_writer(Vec::new());
        for record in records {
            writer.write_record(record).or_raise(failed)?;
        }
        writer.into_inner().map_err(|e| e.into_error()).or_raise(failed)
    }
}

#[async_trait]
impl Load for DelimitedFileLoader {
    fn destination(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(path = %self.path.display(), rows = batch.len()))]
    async fn load(&mut self, batch: &Batch) -> Result<()> {
        if self.file.is_some() && self.header != batch.columns() {
            exn::bail!(ErrorKind::Load(format!(
                "{}: columns {:?} do not match {:?}",
                self.name,
                batch.columns(),
                self.header
            )));
        }
        let rows: Vec<Vec<String>> = batch.rows().iter().map(|row| row.iter().map(ToString::to_string).collect()).collect();
        let bytes = self.encode(rows.iter().map(|row| row.iter().map(String::as_str)))?;
        let failed = || ErrorKind::Load(self.name.clone());
        let file = match self.file.take() {
            Some(file) => self.file.insert(file),
            None => {
                let mut file = self.create().await?;
                let header = self.encode([batch.columns().iter().map(String::as_str)])?;
                file.write_all(&header).await.or_raise(failed)?;
                self.header = batch.columns().to_vec();
                self.file.insert(file)
            },
        };
        file.write_all(&bytes).await.or_raise(failed)?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let failed = || ErrorKind::Load(self.name.clone());
        match self.file.as_mut() {
            Some(file) => {
                file.flush().await.or_raise(failed)?;
                file.sync_all().await.or_raise(failed)?;
            },
            None => {
                self.file = Some(self.create().await?);
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cell;

    fn batch(columns: &[&str], rows: Vec<Vec<Cell>>) -> Batch {
        Batch::with_rows(columns.iter().map(|s| s.to_string()).collect(), rows).unwrap()
    }

    #[tokio::test]
    async fn test_writes_header_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out/result.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale content\n").unwrap();

        let mut loader = DelimitedFileLoader::new(&path).unwrap();
        loader.load(&batch(&["a", "b"], vec![vec![Cell::Integer(1), Cell::Text("x,y".to_string())]])).await.unwrap();
        loader.load(&batch(&["a", "b"], vec![vec![Cell::Null, Cell::Float(2.5)]])).await.unwrap();
        loader.finalize().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1,\"x,y\"\n,2.5\n");
    }

    #[tokio::test]
    async fn test_tsv() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("result.TSV");
        let mut loader = DelimitedFileLoader::new(&path).unwrap();
        loader.load(&batch(&["a", "b"], vec![vec![Cell::Bool(true), Cell::Integer(2)]])).await.unwrap();
        loader.finalize().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\tb\ntrue\t2\n");
    }

    #[tokio::test]
    async fn test_column_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let mut loader = DelimitedFileLoader::new(temp.path().join("result.csv")).unwrap();
        loader.load(&batch(&["a"], vec![vec![Cell::Integer(1)]])).await.unwrap();
        let err = loader.load(&batch(&["b"], vec![vec![Cell::Integer(1)]])).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Load(_)));
    }

    #[tokio::test]
    async fn test_finalize_without_batches_truncates() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("result.csv");
        std::fs::write(&path, "stale\n").unwrap();
        let mut loader = DelimitedFileLoader::new(&path).unwrap();
        loader.finalize().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_unknown_extension() {
        let err = DelimitedFileLoader::new("result.xlsx").unwrap_err();
        assert!(matches!(*err, ErrorKind::Configuration(_)));
    }
}
