use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::app::ports::MappedRecordSink;
use crate::error::{MapperError, Result};
use crate::pipeline::{MappedRecord, RawRecord};

/// Streams raw records from a JSON Lines file, one object per line.
/// Blank lines are skipped; anything else that is not a JSON object is an
/// error naming the line.
pub struct JsonlReader<R> {
    lines: Lines<R>,
    path: PathBuf,
    line: usize,
    ordinal: usize,
}

impl JsonlReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MapperError::io(path, e))?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> JsonlReader<R> {
    pub fn new(reader: R, path: &Path) -> Self {
        Self {
            lines: reader.lines(),
            path: path.to_path_buf(),
            line: 0,
            ordinal: 0,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> MapperError {
        MapperError::Record {
            path: self.path.clone(),
            line: self.line,
            reason: reason.into(),
        }
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(MapperError::io(&self.path, e))),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }

            let value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => return Some(Err(self.malformed(e.to_string()))),
            };
            let record = RawRecord::from_value(value, self.ordinal);
            self.ordinal += 1;
            return Some(record.ok_or_else(|| self.malformed("expected a JSON object")));
        }
    }
}

/// Load mapped records written by an earlier `map` run
pub fn read_mapped_records(path: &Path) -> Result<Vec<MappedRecord>> {
    let file = File::open(path).map_err(|e| MapperError::io(path, e))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| MapperError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| MapperError::Record {
            path: path.to_path_buf(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Writes mapped records as JSON Lines. A dry-run sink only counts.
pub struct JsonlSink {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    written: usize,
}

impl JsonlSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        info!("Creating mapped record output file: {}", path.display());

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn dry_run(path: &Path) -> Self {
        Self {
            writer: None,
            path: path.to_path_buf(),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl MappedRecordSink for JsonlSink {
    fn write_mapped_record(&mut self, record: &MappedRecord) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.flush()?;
                info!("Wrote {} mapped records to {}", self.written, self.path.display());
            }
            None => info!("Dry run: {} mapped records not written to {}", self.written, self.path.display()),
        }
        Ok(())
    }
}
