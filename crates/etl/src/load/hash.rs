use crate::error::{ErrorKind, Result};
use crate::load::Load;
use crate::{Batch, Cell};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::PathBuf;
use tokio::fs;

/// Digests every batch (columns, cell types and values) into a single
/// BLAKE3 hash, written to the destination in hex on finalize.
///
/// Two runs over the same data produce the same file, which makes it useful
/// for checking pipeline output.
pub struct HashLoader {
    destination: PathBuf,
    name: String,
    hasher: blake3::Hasher,
}

impl HashLoader {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        Self { name: destination.display().to_string(), destination, hasher: blake3::Hasher::new() }
    }

    /// Hex digest of everything loaded so far.
    pub fn digest(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }

    fn update_text(&mut self, text: &str) {
        self.hasher.update(&(text.len() as u64).to_le_bytes());
        self.hasher.update(text.as_bytes());
    }
}

#[async_trait]
impl Load for HashLoader {
    fn destination(&self) -> &str {
        &self.name
    }

    async fn load(&mut self, batch: &Batch) -> Result<()> {
        self.hasher.update(&(batch.columns().len() as u64).to_le_bytes());
        for column in batch.columns() {
            self.update_text(column);
        }
        for row in batch.rows() {
            for cell in row {
                match cell {
                    Cell::Null => {
                        self.hasher.update(&[0]);
                    },
                    Cell::Bool(b) => {
                        self.hasher.update(&[1, u8::from(*b)]);
                    },
                    Cell::Integer(i) => {
                        self.hasher.update(&[2]);
                        self.hasher.update(&i.to_le_bytes());
                    },
                    Cell::Float(f) => {
                        self.hasher.update(&[3]);
                        self.hasher.update(&f.to_bits().to_le_bytes());
                    },
                    Cell::Text(s) => {
                        self.hasher.update(&[4]);
                        self.update_text(s);
                    },
                }
            }
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let failed = || ErrorKind::Load(self.name.clone());
        if let Some(parent) = self.destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.or_raise(failed)?;
        }
        fs::write(&self.destination, format!("{}\n", self.digest())).await.or_raise(failed)?;
        Ok(())
    }
}
