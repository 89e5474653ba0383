//! Line-delimited JSON feedstock codec.
//!
//! A feedstock file holds one JSON object per line. The first line is the
//! dataset entry; every following line is a record entry.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{ConnectError, Result};

/// A dataset or record entry. Opaque to the pipeline apart from a few
/// well-known keys under `mdf`.
pub type Record = Map<String, Value>;

/// Writes feedstock entries, one compact JSON object per line.
pub struct FeedstockWriter<W: Write> {
    out: W,
}

impl FeedstockWriter<BufWriter<File>> {
    /// Create (or truncate) a feedstock file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FeedstockWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_entry(&mut self, entry: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write a whole feedstock to `path`.
pub fn write_feedstock(path: impl AsRef<Path>, entries: &[Record]) -> Result<()> {
    let mut writer = FeedstockWriter::create(path)?;
    for entry in entries {
        writer.write_entry(entry)?;
    }
    writer.finish()?;
    Ok(())
}

/// Streams entries back out of a feedstock file. Blank lines are skipped.
pub struct FeedstockReader<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl FeedstockReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> FeedstockReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for FeedstockReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(ConnectError::Feedstock {
                    line: self.line_no,
                    message: format!("expected a JSON object, found {}", json_kind(&other)),
                }),
                Err(e) => Err(ConnectError::Feedstock {
                    line: self.line_no,
                    message: e.to_string(),
                }),
            };
            return Some(parsed);
        }
    }
}

/// Read a whole feedstock file into memory.
pub fn read_feedstock(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    FeedstockReader::open(path)?.collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
