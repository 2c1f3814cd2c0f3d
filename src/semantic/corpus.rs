//! Passage corpus loaded from a CSV file.
//!
//! Row order is significant: row `n` is the passage embedded at index
//! position `n`. Fields are addressed by header name, resolved once into a
//! [`FieldId`].

use std::path::Path;
use std::time::Instant;

/// A column of the corpus, resolved against its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("corpus has no header row")]
    MissingHeader,

    #[error("unknown field '{name}', corpus fields: {available:?}")]
    UnknownField {
        name: String,
        available: Vec<String>,
    },

    #[error("row {row} has {got} fields, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },
}

/// Immutable, position-indexed table of passages.
#[derive(Debug, Clone)]
pub struct Corpus {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl Corpus {
    /// Read a CSV file with a header row.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            return Err(CorpusError::MissingHeader);
        }

        let rows = csv_reader
            .records()
            .collect::<Result<Vec<_>, csv::Error>>()?;

        log::debug!(
            "took {}ms to read {} corpus rows from {}",
            now.elapsed().as_micros() as f64 / 1000.0,
            rows.len(),
            path.display()
        );

        Ok(Self { headers, rows })
    }

    /// Build a corpus from in-memory rows.
    pub fn from_rows<S: AsRef<str>>(
        headers: &[S],
        rows: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<Self, CorpusError> {
        if headers.is_empty() {
            return Err(CorpusError::MissingHeader);
        }

        let headers: Vec<String> = headers.iter().map(|h| h.as_ref().to_string()).collect();
        let mut records = Vec::new();
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != headers.len() {
                return Err(CorpusError::RaggedRow {
                    row,
                    expected: headers.len(),
                    got: values.len(),
                });
            }
            records.push(csv::StringRecord::from(values));
        }

        Ok(Self {
            headers,
            rows: records,
        })
    }

    /// Number of passages.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header names in column order.
    pub fn fields(&self) -> &[String] {
        &self.headers
    }

    /// Resolve a header name. Matching is exact.
    pub fn field(&self, name: &str) -> Result<FieldId, CorpusError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .map(FieldId)
            .ok_or_else(|| CorpusError::UnknownField {
                name: name.to_string(),
                available: self.headers.clone(),
            })
    }

    /// Header name of a resolved field.
    pub fn field_name(&self, field: FieldId) -> &str {
        &self.headers[field.0]
    }

    /// Value of `field` in the row at `position`, if the row exists.
    pub fn value(&self, position: usize, field: FieldId) -> Option<&str> {
        self.rows.get(position).and_then(|row| row.get(field.0))
    }
}
