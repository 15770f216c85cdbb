use crate::error::{ErrorKind, Result};
use crate::load::Load;
use crate::{Batch, Cell};
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use exn::ResultExt;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, instrument};

/// Writes batches to a Parquet file.
///
/// Column types come from the first batch. A column of integers becomes
/// `Int64`, integers mixed with floats `Float64` and booleans `Boolean`.
/// Anything else, including a column with no values at all, is `Utf8`.
/// Later batches must carry the same columns, with values that fit.
pub struct ParquetLoader {
    path: PathBuf,
    name: String,
    writer: Option<(SchemaRef, ArrowWriter<File>)>,
    rows: usize,
}

impl ParquetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { name: path.display().to_string(), path, writer: None, rows: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create(path: &Path, name: &str, schema: SchemaRef) -> Result<ArrowWriter<File>> {
        let failed = || ErrorKind::Load(name.to_string());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.or_raise(failed)?;
        }
        let target = path.to_path_buf();
        let writer = tokio::task::spawn_blocking(move || {
            let path = target;
            let file = File::create(&path).or_raise(|| ErrorKind::Load(path.display().to_string()))?;
            let properties = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
            ArrowWriter::try_new(file, schema, Some(properties)).or_raise(|| ErrorKind::Load(path.display().to_string()))
        })
        .await
        .or_raise(failed)??;
        debug!(path = %path.display(), "output truncated");
        Ok(writer)
    }
}

#[async_trait]
impl Load for ParquetLoader {
    fn destination(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(path = %self.path.display(), rows = batch.len()))]
    async fn load(&mut self, batch: &Batch) -> Result<()> {
        let failed = || ErrorKind::Load(self.name.clone());
        let (schema, writer) = match self.writer.take() {
            Some((schema, writer)) => {
                let names = schema.fields().iter().map(|field| field.name().as_str());
                if !names.eq(batch.columns().iter().map(String::as_str)) {
                    exn::bail!(ErrorKind::Load(format!(
                        "{}: columns {:?} do not match the first batch",
                        self.name,
                        batch.columns()
                    )));
                }
                (schema, writer)
            },
            None => {
                let schema = schema_of(batch);
                let writer = Self::create(&self.path, &self.name, schema.clone()).await?;
                (schema, writer)
            },
        };
        let record = record_batch(&schema, batch, &self.name)?;
        let writer = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            writer.write(&record).map(|()| writer)
        })
        .await
        .or_raise(failed)?
        .or_raise(failed)?;
        self.writer = Some((schema, writer));
        self.rows += batch.len();
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let failed = || ErrorKind::Load(self.name.clone());
        let writer = match self.writer.take() {
            Some((_, writer)) => writer,
            None => Self::create(&self.path, &self.name, Arc::new(Schema::empty())).await?,
        };
        tokio::task::spawn_blocking(move || writer.close().map(drop)).await.or_raise(failed)?.or_raise(failed)?;
        debug!(rows = self.rows, "parquet file written");
        Ok(())
    }
}

fn schema_of(batch: &Batch) -> SchemaRef {
    let fields = batch
        .columns()
        .iter()
        .enumerate()
        .map(|(index, name)| Field::new(name, column_type(batch, index), true))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

fn column_type(batch: &Batch, index: usize) -> DataType {
    let mut inferred: Option<DataType> = None;
    for cell in batch.rows().iter().map(|row| &row[index]) {
        let cell_type = match cell {
            Cell::Null => continue,
            Cell::Bool(_) => DataType::Boolean,
            Cell::Integer(_) => DataType::Int64,
            Cell::Float(_) => DataType::Float64,
            Cell::Text(_) => return DataType::Utf8,
        };
        inferred = Some(match inferred {
            None => cell_type,
            Some(current) if current == cell_type => current,
            Some(DataType::Int64 | DataType::Float64) if cell_type.is_numeric() => DataType::Float64,
            Some(_) => return DataType::Utf8,
        });
    }
    inferred.unwrap_or(DataType::Utf8)
}

fn record_batch(schema: &SchemaRef, batch: &Batch, name: &str) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| column(field, batch, index, name))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema.clone(), columns).or_raise(|| ErrorKind::Load(name.to_string()))
}

fn column(field: &Field, batch: &Batch, index: usize, name: &str) -> Result<ArrayRef> {
    let cells = batch.rows().iter().map(|row| &row[index]);
    let mismatch = |cell: &Cell| {
        ErrorKind::Load(format!("{name}: {cell:?} does not fit column {} of type {}", field.name(), field.data_type()))
    };
    let array: ArrayRef = match field.data_type() {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(batch.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Bool(b) => builder.append_value(*b),
                    other => exn::bail!(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        },
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(batch.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Integer(i) => builder.append_value(*i),
                    other => exn::bail!(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        },
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(batch.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Integer(i) => builder.append_value(*i as f64),
                    Cell::Float(f) => builder.append_value(*f),
                    other => exn::bail!(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        },
        _ => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        },
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn batch(columns: &[&str], rows: Vec<Vec<Cell>>) -> Batch {
        Batch::with_rows(columns.iter().map(|s| s.to_string()).collect(), rows).unwrap()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn read(path: &Path) -> (SchemaRef, Vec<RecordBatch>) {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
        let schema = builder.schema().clone();
        let batches = builder.build().unwrap().collect::<std::result::Result<Vec<_>, _>>().unwrap();
        (schema, batches)
    }

    #[tokio::test]
    async fn test_typed_columns() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out/result.parquet");
        let columns = ["id", "score", "ok", "label", "empty"];

        let mut loader = ParquetLoader::new(&path);
        let first = batch(
            &columns,
            vec![
                vec![Cell::Integer(1), Cell::Float(1.5), Cell::Bool(true), text("a"), Cell::Null],
                vec![Cell::Integer(2), Cell::Integer(3), Cell::Null, Cell::Integer(7), Cell::Null],
            ],
        );
        loader.load(&first).await.unwrap();
        let second = batch(&columns, vec![vec![Cell::Integer(3), Cell::Null, Cell::Bool(false), text("c"), text("z")]]);
        loader.load(&second).await.unwrap();
        loader.finalize().await.unwrap();

        let (schema, batches) = read(&path);
        let types: Vec<_> = schema.fields().iter().map(|f| f.data_type().clone()).collect();
        assert_eq!(types, vec![DataType::Int64, DataType::Float64, DataType::Boolean, DataType::Utf8, DataType::Utf8]);
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 3);

        let (mut ids, mut scores, mut oks, mut labels) = (vec![], vec![], vec![], vec![]);
        for record in &batches {
            let id = record.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            let score = record.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
            let ok = record.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
            let label = record.column(3).as_any().downcast_ref::<StringArray>().unwrap();
            for i in 0..record.num_rows() {
                ids.push(id.value(i));
                scores.push(score.is_valid(i).then(|| score.value(i)));
                oks.push(ok.is_valid(i).then(|| ok.value(i)));
                labels.push(label.value(i).to_string());
            }
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(scores, vec![Some(1.5), Some(3.0), None]);
        assert_eq!(oks, vec![Some(true), None, Some(false)]);
        assert_eq!(labels, vec!["a", "7", "c"]);
    }

    #[tokio::test]
    async fn test_value_must_fit_first_batch_type() {
        let temp = tempfile::tempdir().unwrap();
        let mut loader = ParquetLoader::new(temp.path().join("result.parquet"));
        loader.load(&batch(&["n"], vec![vec![Cell::Integer(1)]])).await.unwrap();
        let err = loader.load(&batch(&["n"], vec![vec![text("one")]])).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Load(_)));
    }

    #[tokio::test]
    async fn test_column_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let mut loader = ParquetLoader::new(temp.path().join("result.parquet"));
        loader.load(&batch(&["a"], vec![vec![Cell::Integer(1)]])).await.unwrap();
        let err = loader.load(&batch(&["b"], vec![vec![Cell::Integer(1)]])).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Load(_)));
    }

    #[tokio::test]
    async fn test_finalize_without_batches_writes_empty_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("result.parquet");
        std::fs::write(&path, "stale").unwrap();
        let mut loader = ParquetLoader::new(&path);
        loader.finalize().await.unwrap();
        let written = std::fs::read(&path).unwrap();
        assert!(written.starts_with(b"PAR1"));
        assert!(written.ends_with(b"PAR1"));
    }
}
