use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A single value in a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Guess the type of a raw textual value.
    ///
    /// ```
    /// use ketl_etl::Cell;
    ///
    /// assert_eq!(Cell::infer("42"), Cell::Integer(42));
    /// assert_eq!(Cell::infer("4.2e1"), Cell::Float(42.0));
    /// assert_eq!(Cell::infer("TRUE"), Cell::Bool(true));
    /// assert_eq!(Cell::infer(""), Cell::Null);
    /// assert_eq!(Cell::infer("inf"), Cell::Text("inf".to_string()));
    /// ```
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(integer) = trimmed.parse::<i64>() {
            return Cell::Integer(integer);
        }
        // f64 parsing also accepts "inf" and "NaN", which are words, not numbers.
        if trimmed.bytes().any(|b| b.is_ascii_digit())
            && let Ok(float) = trimmed.parse::<f64>()
        {
            return Cell::Float(float);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Cell::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Cell::Bool(false);
        }
        Cell::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Integer(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// A chunk of tabular data: named columns and rows of exactly that width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Batch {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Build a batch in one go, checking every row's width.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut batch = Self::new(columns);
        batch.rows.reserve(rows.len());
        for row in rows {
            batch.push(row)?;
        }
        Ok(batch)
    }

    pub fn push(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            exn::bail!(ErrorKind::RowWidth { row: self.rows.len(), found: row.len(), expected: self.columns.len() });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Swap rows and columns.
    ///
    /// The first column of the result (`column`) holds the original column
    /// names; the remaining columns are named after the position of the row
    /// they came from, counting from `first_row`.
    pub fn transpose(&self, first_row: usize) -> Self {
        let mut columns = Vec::with_capacity(self.rows.len() + 1);
        columns.push("column".to_string());
        columns.extend((first_row..first_row + self.rows.len()).map(|i| i.to_string()));
        let rows = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut row = Vec::with_capacity(self.rows.len() + 1);
                row.push(Cell::Text(name.clone()));
                row.extend(self.rows.iter().map(|r| r[i].clone()));
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Place batches side by side. Shorter batches are padded with nulls.
    pub fn concat_columns(batches: Vec<Batch>) -> Self {
        let height = batches.iter().map(Batch::len).max().unwrap_or_default();
        let columns = batches.iter().flat_map(|b| b.columns.iter().cloned()).collect();
        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); height];
        for batch in batches {
            let width = batch.columns.len();
            let mut source = batch.rows.into_iter();
            for row in rows.iter_mut() {
                match source.next() {
                    Some(cells) => row.extend(cells),
                    None => row.extend(std::iter::repeat_n(Cell::Null, width)),
                }
            }
        }
        Self { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case("-7", Cell::Integer(-7))]
    #[case(" 12 ", Cell::Integer(12))]
    #[case("0.5", Cell::Float(0.5))]
    #[case("false", Cell::Bool(false))]
    #[case("   ", Cell::Null)]
    #[case("NaN", text("NaN"))]
    #[case("12abc", text("12abc"))]
    fn test_infer(#[case] raw: &str, #[case] expected: Cell) {
        assert_eq!(Cell::infer(raw), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(Cell::Null.to_string(), "");
        assert_eq!(Cell::Float(1.5).to_string(), "1.5");
        assert_eq!(text("a,b").to_string(), "a,b");
    }

    #[test]
    fn test_rows_must_match_columns() {
        let mut batch = Batch::new(columns(&["a", "b"]));
        batch.push(vec![Cell::Integer(1), Cell::Null]).unwrap();
        let err = batch.push(vec![Cell::Integer(1)]).unwrap_err();
        assert!(matches!(*err, ErrorKind::RowWidth { row: 1, found: 1, expected: 2 }));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_transpose() {
        let batch = Batch::with_rows(
            columns(&["year", "value"]),
            vec![vec![Cell::Integer(2023), Cell::Float(1.5)], vec![Cell::Integer(2024), Cell::Null]],
        )
        .unwrap();
        let transposed = batch.transpose(10);
        assert_eq!(transposed.columns(), columns(&["column", "10", "11"]));
        assert_eq!(
            transposed.rows(),
            vec![
                vec![text("year"), Cell::Integer(2023), Cell::Integer(2024)],
                vec![text("value"), Cell::Float(1.5), Cell::Null],
            ]
        );
    }

    #[test]
    fn test_concat_columns_pads_short_batches() {
        let left = Batch::with_rows(columns(&["a"]), vec![vec![Cell::Integer(1)], vec![Cell::Integer(2)]]).unwrap();
        let right = Batch::with_rows(columns(&["b"]), vec![vec![text("x")]]).unwrap();
        let joined = Batch::concat_columns(vec![left, right]);
        assert_eq!(joined.columns(), columns(&["a", "b"]));
        assert_eq!(
            joined.rows(),
            vec![vec![Cell::Integer(1), text("x")], vec![Cell::Integer(2), Cell::Null]]
        );
    }
}
