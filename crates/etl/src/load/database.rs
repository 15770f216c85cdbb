use crate::error::{ErrorKind, Result};
use crate::load::Load;
use crate::{Batch, Cell};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

/// SQLite caps the number of bound parameters per statement.
const MAX_PARAMETERS: usize = 999;

/// Writes batches into a SQLite table.
///
/// On the first batch the table is created (untyped columns named after the
/// batch's columns) if it does not exist yet, and emptied. Every batch is
/// then inserted in its own transaction. The store's own tables are refused,
/// so loading into the ketl database cannot clobber the resource model.
#[derive(Debug)]
pub struct DatabaseLoader {
    pool: SqlitePool,
    table: String,
    prepared: bool,
}

impl DatabaseLoader {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if table.trim().is_empty() {
            exn::bail!(ErrorKind::Configuration("table name must not be empty".to_string()));
        }
        if ketl_store::is_reserved_table(&table) {
            exn::bail!(ErrorKind::Configuration(format!("table {table} is reserved for the ketl store")));
        }
        Ok(Self { pool, table, prepared: false })
    }
}

#[async_trait]
impl Load for DatabaseLoader {
    fn destination(&self) -> &str {
        &self.table
    }

    #[instrument(skip_all, fields(table = %self.table, rows = batch.len()))]
    async fn load(&mut self, batch: &Batch) -> Result<()> {
        let failed = || ErrorKind::Load(self.table.clone());
        if batch.columns().is_empty() {
            return Ok(());
        }
        let table = quote(&self.table);
        let columns = batch.columns().iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");

        let mut tx = self.pool.begin().await.or_raise(failed)?;
        if !self.prepared {
            sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {table} ({columns})"))
                .execute(&mut *tx)
                .await
                .or_raise(failed)?;
            let deleted = sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await.or_raise(failed)?;
            debug!(rows = deleted.rows_affected(), "table emptied");
        }
        let rows_per_statement = (MAX_PARAMETERS / batch.columns().len()).max(1);
        for rows in batch.rows().chunks(rows_per_statement) {
            let mut insert = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {table} ({columns}) "));
            insert.push_values(rows, |mut values, row| {
                for cell in row {
                    match cell {
                        Cell::Null => values.push_bind(None::<String>),
                        Cell::Bool(b) => values.push_bind(*b),
                        Cell::Integer(i) => values.push_bind(*i),
                        Cell::Float(f) => values.push_bind(*f),
                        Cell::Text(s) => values.push_bind(s.clone()),
                    };
                }
            });
            insert.build().execute(&mut *tx).await.or_raise(failed)?;
        }
        tx.commit().await.or_raise(failed)?;
        self.prepared = true;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
