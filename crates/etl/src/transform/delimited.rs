use crate::error::{ErrorKind, Result};
use crate::transform::{BatchStream, DEFAULT_CHUNK_SIZE, Transform, blocking};
use crate::{Batch, Cell};
use async_stream::try_stream;
use csv::{ReaderBuilder, StringRecord};
use exn::ResultExt;
use futures::Stream;
use ketl_archive::{BoxRead, Compression};
use ketl_model::ExpectedFile;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// How delimited text files are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    /// The first row (after `skip_rows`) holds the column names.
    pub has_headers: bool,
    /// Column names to use instead of the header row. When `has_headers` is
    /// also set, the header row is read and discarded.
    pub names: Option<Vec<String>>,
    /// Lines starting with this byte are ignored.
    pub comment: Option<u8>,
    /// Raw lines dropped from the top of every file.
    pub skip_rows: usize,
    pub chunk_size: usize,
    /// Swap rows and columns of every chunk.
    pub transpose: bool,
    /// Read every file whole and place them side by side in a single batch.
    /// This is the one mode that holds all input in memory; `transpose` is
    /// ignored.
    pub concat: bool,
    /// Guess cell types. Otherwise every cell is text.
    pub infer_types: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
            names: None,
            comment: None,
            skip_rows: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            transpose: false,
            concat: false,
            infer_types: true,
        }
    }
}

impl DelimitedOptions {
    pub fn tsv() -> Self {
        Self { delimiter: b'\t', ..Default::default() }
    }
}

/// Reads CSV-like files, transparently decompressing `.gz`, `.bz2` and `.xz`
/// input.
#[derive(Debug, Clone, Default)]
pub struct DelimitedTransformer {
    options: DelimitedOptions,
}

impl DelimitedTransformer {
    pub fn new(options: DelimitedOptions) -> Self {
        Self { options }
    }

    fn chunked<'a>(&'a self, files: &'a [ExpectedFile]) -> impl Stream<Item = Result<Batch>> + Send + 'a {
        try_stream! {
            for expected in files {
                debug!(path = %expected.path.display(), "reading delimited file");
                let (path, options) = (expected.path.clone(), self.options.clone());
                let mut file = blocking(&expected.path, move || DelimitedFile::open(path, &options)).await?;
                loop {
                    let (returned, chunk) = blocking(&expected.path, move || {
                        let chunk = file.read_chunk()?;
                        Ok((file, chunk))
                    })
                    .await?;
                    file = returned;
                    let Some(batch) = chunk else { break };
                    if self.options.transpose {
                        yield batch.transpose(file.rows_read - batch.len());
                    } else {
                        yield batch;
                    }
                }
            }
        }
    }

    fn concatenated<'a>(&'a self, files: &'a [ExpectedFile]) -> impl Stream<Item = Result<Batch>> + Send + 'a {
        try_stream! {
            let mut parts = Vec::with_capacity(files.len());
            for expected in files {
                let (path, options) = (expected.path.clone(), self.options.clone());
                let part = blocking(&expected.path, move || DelimitedFile::open(path, &options)?.read_all()).await?;
                parts.push(part);
            }
            if !parts.is_empty() {
                yield Batch::concat_columns(parts);
            }
        }
    }
}

impl Transform for DelimitedTransformer {
    fn name(&self) -> &str {
        "delimited"
    }

    fn transform<'a>(&'a self, files: &'a [ExpectedFile]) -> BatchStream<'a> {
        match self.options.concat {
            true => Box::pin(self.concatenated(files)),
            false => Box::pin(self.chunked(files)),
        }
    }
}

/// An open delimited file, positioned after its header.
struct DelimitedFile {
    path: PathBuf,
    reader: csv::Reader<BoxRead<'static>>,
    columns: Vec<String>,
    /// First data row, read early to count the columns of a headerless file.
    pending: Option<StringRecord>,
    rows_read: usize,
    chunk_size: usize,
    infer_types: bool,
}

impl DelimitedFile {
    fn open(path: PathBuf, options: &DelimitedOptions) -> Result<Self> {
        let failed = || ErrorKind::Transform(path.clone());
        let compression = Compression::detect(&path).or_raise(failed)?;
        let file = File::open(&path).or_raise(failed)?;
        let mut input = BufReader::new(compression.wrap_reader(BufReader::new(file)));
        let mut skipped = Vec::new();
        for _ in 0..options.skip_rows {
            skipped.clear();
            if input.read_until(b'\n', &mut skipped).or_raise(failed)? == 0 {
                break;
            }
        }

        let input: BoxRead<'static> = Box::new(input);
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .comment(options.comment)
            .has_headers(false)
            .from_reader(input);
        let mut first = StringRecord::new();
        let has_first = reader.read_record(&mut first).or_raise(failed)?;
        let width = first.len();
        let first_is_data = has_first && !options.has_headers;
        let columns = match (&options.names, options.has_headers) {
            (Some(names), _) => names.clone(),
            (None, true) => first.iter().map(str::to_string).collect(),
            (None, false) => (0..width).map(|i| i.to_string()).collect(),
        };
        Ok(Self {
            path,
            reader,
            columns,
            pending: first_is_data.then_some(first),
            rows_read: 0,
            chunk_size: options.chunk_size.max(1),
            infer_types: options.infer_types,
        })
    }

    fn read_chunk(&mut self) -> Result<Option<Batch>> {
        let mut batch = Batch::new(self.columns.clone());
        if let Some(record) = self.pending.take() {
            self.push(&mut batch, &record)?;
        }
        let mut record = StringRecord::new();
        while batch.len() < self.chunk_size
            && self.reader.read_record(&mut record).or_raise(|| ErrorKind::Transform(self.path.clone()))?
        {
            self.push(&mut batch, &record)?;
        }
        Ok((!batch.is_empty()).then_some(batch))
    }

    fn read_all(mut self) -> Result<Batch> {
        self.chunk_size = usize::MAX;
        let empty = Batch::new(self.columns.clone());
        Ok(self.read_chunk()?.unwrap_or(empty))
    }

    fn push(&mut self, batch: &mut Batch, record: &StringRecord) -> Result<()> {
        let row = record
            .iter()
            .map(|raw| match self.infer_types {
                true => Cell::infer(raw),
                false => Cell::Text(raw.to_string()),
            })
            .collect();
        batch.push(row).or_raise(|| ErrorKind::Transform(self.path.clone()))?;
        self.rows_read += 1;
        Ok(())
    }
}
