use crate::error::{ErrorKind, Result};
use crate::transform::{BatchStream, DEFAULT_CHUNK_SIZE, Transform, blocking};
use crate::{Batch, Cell};
use async_stream::try_stream;
use exn::ResultExt;
use futures::Stream;
use ketl_archive::{BoxRead, Compression};
use ketl_model::ExpectedFile;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How JSON documents are turned into rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonOptions {
    /// Keys (or array indices) leading from the document root to the
    /// records. An array there holds one record per element; anything else
    /// is a single record.
    pub record_path: Vec<String>,
    /// Keep only these (flattened) columns, in this order.
    pub columns: Option<Vec<String>>,
    /// Rename keys to snake_case before flattening.
    pub snake_case: bool,
    pub chunk_size: usize,
    /// One document per line. `None` decides by extension (`.jsonl`,
    /// `.ndjson`).
    pub lines: Option<bool>,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self { record_path: Vec::new(), columns: None, snake_case: false, chunk_size: DEFAULT_CHUNK_SIZE, lines: None }
    }
}

/// Reads JSON and JSON Lines files.
///
/// Nested objects are flattened into dotted column names (`{"a": {"b": 1}}`
/// becomes column `a.b`); arrays are kept as JSON text. Unless
/// [`JsonOptions::columns`] is set, the columns of a file are those seen in
/// its first chunk.
#[derive(Debug, Clone, Default)]
pub struct JsonTransformer {
    options: JsonOptions,
}

impl JsonTransformer {
    pub fn new(options: JsonOptions) -> Self {
        Self { options }
    }

    fn chunked<'a>(&'a self, files: &'a [ExpectedFile]) -> impl Stream<Item = Result<Batch>> + Send + 'a {
        try_stream! {
            for expected in files {
                debug!(path = %expected.path.display(), "reading JSON file");
                let (path, options) = (expected.path.clone(), self.options.clone());
                let mut file = blocking(&expected.path, move || JsonFile::open(path, options)).await?;
                loop {
                    let (returned, chunk) = blocking(&expected.path, move || {
                        let chunk = file.read_chunk()?;
                        Ok((file, chunk))
                    })
                    .await?;
                    file = returned;
                    let Some(batch) = chunk else { break };
                    yield batch;
                }
            }
        }
    }
}

impl Transform for JsonTransformer {
    fn name(&self) -> &str {
        "json"
    }

    fn transform<'a>(&'a self, files: &'a [ExpectedFile]) -> BatchStream<'a> {
        Box::pin(self.chunked(files))
    }
}

struct JsonFile {
    path: PathBuf,
    options: JsonOptions,
    /// Remaining lines of a JSON Lines file.
    lines: Option<Lines<BufReader<BoxRead<'static>>>>,
    queue: VecDeque<Value>,
    columns: Option<Vec<String>>,
}

impl JsonFile {
    fn open(path: PathBuf, options: JsonOptions) -> Result<Self> {
        let failed = || ErrorKind::Transform(path.clone());
        let compression = Compression::detect(&path).or_raise(failed)?;
        let input = BufReader::new(compression.wrap_reader(BufReader::new(File::open(&path).or_raise(failed)?)));
        let is_lines = options.lines.unwrap_or_else(|| is_json_lines(&compression.strip_extension(&path)));
        let mut file = Self { path, columns: options.columns.clone(), options, lines: None, queue: VecDeque::new() };
        match is_lines {
            true => file.lines = Some(input.lines()),
            false => {
                let document: Value = serde_json::from_reader(input).or_raise(|| ErrorKind::Transform(file.path.clone()))?;
                file.enqueue(document)?;
            },
        }
        Ok(file)
    }

    fn enqueue(&mut self, document: Value) -> Result<()> {
        match select(document, &self.options.record_path) {
            Some(Value::Array(records)) => self.queue.extend(records),
            Some(record) => self.queue.push_back(record),
            None => {
                let missing: Result<()> = Err(ErrorKind::MissingRecords(self.options.record_path.join(".")).into());
                missing.or_raise(|| ErrorKind::Transform(self.path.clone()))?;
            },
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(record) = self.queue.pop_front() {
                return Ok(Some(record));
            }
            let Some(lines) = self.lines.as_mut() else { return Ok(None) };
            let Some(line) = lines.next() else { return Ok(None) };
            let line = line.or_raise(|| ErrorKind::Transform(self.path.clone()))?;
            if line.trim().is_empty() {
                continue;
            }
            let document = serde_json::from_str(&line).or_raise(|| ErrorKind::Transform(self.path.clone()))?;
            self.enqueue(document)?;
        }
    }

    fn read_chunk(&mut self) -> Result<Option<Batch>> {
        let mut records = Vec::new();
        while records.len() < self.options.chunk_size.max(1) {
            match self.next_record()? {
                Some(record) => records.push(flatten(record, self.options.snake_case)),
                None => break,
            }
        }
        if records.is_empty() {
            return Ok(None);
        }
        let columns = self.columns.get_or_insert_with(|| columns_of(&records)).clone();
        let mut batch = Batch::new(columns.clone());
        for record in records {
            let mut cells: HashMap<String, Cell> = record.into_iter().collect();
            let row = columns.iter().map(|c| cells.remove(c).unwrap_or(Cell::Null)).collect();
            batch.push(row).or_raise(|| ErrorKind::Transform(self.path.clone()))?;
        }
        Ok(Some(batch))
    }
}

fn is_json_lines(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("ndjson"))
}

fn select(mut value: Value, path: &[String]) -> Option<Value> {
    for key in path {
        value = match value {
            Value::Object(mut map) => map.remove(key)?,
            Value::Array(mut items) => {
                let index = key.parse::<usize>().ok().filter(|i| *i < items.len())?;
                items.swap_remove(index)
            },
            _ => return None,
        };
    }
    Some(value)
}

/// Column names in order of first appearance.
fn columns_of(records: &[Vec<(String, Cell)>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for (name, _) in records.iter().flatten() {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }
    columns
}

fn flatten(record: Value, snake_case: bool) -> Vec<(String, Cell)> {
    let mut cells = Vec::new();
    match record {
        Value::Object(map) => flatten_into(&mut cells, None, map, snake_case),
        other => cells.push(("value".to_string(), cell(other))),
    }
    cells
}

fn flatten_into(cells: &mut Vec<(String, Cell)>, prefix: Option<&str>, map: Map<String, Value>, snake_case: bool) {
    for (key, value) in map {
        let key = if snake_case { to_snake_case(&key) } else { key };
        let name = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(cells, Some(&name), inner, snake_case),
            other => cells.push((name, cell(other))),
        }
    }
}

fn cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Bool(b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Cell::Integer(i),
            (None, Some(f)) => Cell::Float(f),
            (None, None) => Cell::Text(n.to_string()),
        },
        Value::String(s) => Cell::Text(s),
        other => Cell::Text(other.to_string()),
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut previous: Option<char> = None;
    for c in key.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        previous = Some(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
