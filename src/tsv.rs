//! Streaming reader for tab-separated files with a header row.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CosmicError;

#[derive(Debug)]
struct Header {
    source: PathBuf,
    columns: HashMap<String, usize>,
}

/// One data row; fields are addressed by header name.
#[derive(Debug, Clone)]
pub struct TsvRow {
    header: Arc<Header>,
    line: usize,
    fields: Vec<String>,
}

impl TsvRow {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn get(&self, column: &str) -> Result<&str, CosmicError> {
        self.header
            .columns
            .get(column)
            .and_then(|index| self.fields.get(*index))
            .map(|value| value.trim())
            .ok_or_else(|| CosmicError::MalformedRow {
                path: self.header.source.clone(),
                line: self.line,
                column: column.to_string(),
            })
    }
}

/// Invalid UTF-8 is decoded lossily, so a stray byte only affects its own field.
#[derive(Debug)]
pub struct TsvReader<R> {
    header: Arc<Header>,
    reader: R,
    buffer: Vec<u8>,
    line: usize,
}

impl TsvReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CosmicError> {
        if !path.exists() {
            return Err(CosmicError::MissingInput(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|err| {
            CosmicError::Filesystem(format!("open {}: {err}", path.display()))
        })?;
        Self::new(path, BufReader::new(file))
    }
}

impl<R: BufRead> TsvReader<R> {
    /// Reads the header row; `source` is only used in error messages.
    pub fn new(source: impl Into<PathBuf>, reader: R) -> Result<Self, CosmicError> {
        let mut tsv = Self {
            header: Arc::new(Header {
                source: source.into(),
                columns: HashMap::new(),
            }),
            reader,
            buffer: Vec::new(),
            line: 0,
        };
        while let Some(text) = tsv.next_line()? {
            let text = text.trim_start_matches('\u{feff}');
            if text.trim().is_empty() {
                continue;
            }
            let columns = text
                .split('\t')
                .enumerate()
                .map(|(index, name)| (name.trim().to_string(), index))
                .collect();
            if let Some(header) = Arc::get_mut(&mut tsv.header) {
                header.columns = columns;
            }
            break;
        }
        Ok(tsv)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.columns.contains_key(column)
    }

    /// Next line without its terminator, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<String>, CosmicError> {
        self.buffer.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buffer)
            .map_err(|err| read_error(&self.header.source, self.line + 1, err))?;
        if read == 0 {
            return Ok(None);
        }
        self.line += 1;
        let text = String::from_utf8_lossy(&self.buffer);
        Ok(Some(text.trim_end_matches(['\n', '\r']).to_string()))
    }
}

impl<R: BufRead> Iterator for TsvReader<R> {
    type Item = Result<TsvRow, CosmicError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.next_line() {
                Ok(Some(text)) => text,
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            };
            if text.trim().is_empty() {
                continue;
            }
            return Some(Ok(TsvRow {
                header: Arc::clone(&self.header),
                line: self.line,
                fields: text.split('\t').map(str::to_string).collect(),
            }));
        }
    }
}

fn read_error(source: &Path, line: usize, err: std::io::Error) -> CosmicError {
    CosmicError::Filesystem(format!("read {}:{line}: {err}", source.display()))
}
