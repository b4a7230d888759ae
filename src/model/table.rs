//! Whitespace-delimited tables with a header row

use crate::error::FlowError;
use std::path::Path;

/// A parsed table, stored column-major as raw cells
#[derive(Debug, Clone)]
pub struct Table {
    source: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Load a table from disk
    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse table content; `source` is only used in error messages
    pub fn parse(content: &str, source: &str) -> Result<Self, FlowError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let columns: Vec<String> = lines
            .next()
            .ok_or_else(|| FlowError::Table {
                path: source.to_string(),
                detail: "empty table".to_string(),
            })?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (i, line) in lines.enumerate() {
            let cells: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if cells.len() != columns.len() {
                return Err(FlowError::Table {
                    path: source.to_string(),
                    detail: format!(
                        "row {} has {} fields, header has {}",
                        i + 1,
                        cells.len(),
                        columns.len()
                    ),
                });
            }
            rows.push(cells);
        }

        Ok(Self {
            source: source.to_string(),
            columns,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn index_of(&self, name: &str) -> Result<usize, FlowError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| FlowError::Table {
                path: self.source.clone(),
                detail: format!("missing column '{}'", name),
            })
    }

    /// Raw cells of a column
    pub fn text_column(&self, name: &str) -> Result<Vec<&str>, FlowError> {
        let idx = self.index_of(name)?;
        Ok(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Numeric column; `n/a` and `nan` cells become NaN
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, FlowError> {
        let idx = self.index_of(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let cell = r[idx].as_str();
                if cell.eq_ignore_ascii_case("n/a") || cell.eq_ignore_ascii_case("nan") {
                    return Ok(f64::NAN);
                }
                cell.parse::<f64>().map_err(|_| FlowError::Table {
                    path: self.source.clone(),
                    detail: format!("row {} column '{}': not a number: {}", i + 1, name, cell),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_whitespace() {
        let table = Table::parse("onset\tduration  trial_type\n0.0\t1.5 A\n2 1 B\n", "t").unwrap();
        assert_eq!(table.columns(), &["onset", "duration", "trial_type"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.numeric_column("onset").unwrap(), vec![0.0, 2.0]);
        assert_eq!(table.text_column("trial_type").unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_na_is_nan() {
        let table = Table::parse("dvars\nn/a\n1.2\n", "t").unwrap();
        let col = table.numeric_column("dvars").unwrap();
        assert!(col[0].is_nan());
        assert_eq!(col[1], 1.2);
    }

    #[test]
    fn test_ragged_row_rejected() {
        let err = Table::parse("a b\n1\n", "conf.tsv").unwrap_err();
        assert!(err.to_string().contains("row 1 has 1 fields"));
    }

    #[test]
    fn test_missing_column() {
        let table = Table::parse("a\n1\n", "conf.tsv").unwrap();
        let err = table.numeric_column("b").unwrap_err();
        assert_eq!(err.to_string(), "conf.tsv: missing column 'b'");
    }
}
