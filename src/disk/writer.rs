//! Ready-made write callbacks
//!
//! Both writers read the target path and the samples from the resolved call
//! arguments, so they work with any template that carries a `Path` and a
//! `Data` placeholder. Samples are converted through `serde`, which lets any
//! `Serialize` sample type be written without a dedicated encoder.

use crate::callback::{CallArgs, Data, SaveCallback};
use crate::disk::RecordHeader;
use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes samples as delimited plain text
///
/// Scalars are written one per line, flat arrays as one row and arrays of
/// arrays as one row each. Floats use scientific notation with twelve
/// fractional digits, e.g. `1.500000000000e+00`.
#[derive(Debug, Clone)]
pub struct TextWriter {
    delimiter: String,
    precision: usize,
    create_dirs: bool,
}

impl Default for TextWriter {
    fn default() -> Self {
        Self {
            delimiter: "\t".into(),
            precision: 12,
            create_dirs: true,
        }
    }
}

impl TextWriter {
    /// Tab-delimited writer with twelve-digit floats
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `delimiter` between the values of a row
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Number of fractional digits for floats
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Whether missing parent directories are created
    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Lines for one sample
    pub fn rows(&self, value: &Value) -> anyhow::Result<Vec<String>> {
        match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_array) => items
                .iter()
                .map(|row| self.row(row.as_array().map(Vec::as_slice).unwrap_or_default()))
                .collect(),
            Value::Array(cells) => Ok(vec![self.row(cells)?]),
            Value::Object(_) => bail!("records with named fields cannot be written as text"),
            scalar => Ok(vec![self.scalar(scalar)?]),
        }
    }

    fn row(&self, cells: &[Value]) -> anyhow::Result<String> {
        let cells = cells
            .iter()
            .map(|cell| self.scalar(cell))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(cells.join(&self.delimiter))
    }

    fn scalar(&self, value: &Value) -> anyhow::Result<String> {
        Ok(match value {
            Value::Number(number) if number.is_f64() => {
                format_float(number.as_f64().unwrap_or(f64::NAN), self.precision)
            }
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => u8::from(*flag).to_string(),
            Value::String(text) => text.clone(),
            Value::Null => "nan".into(),
            Value::Array(_) | Value::Object(_) => bail!("values nested more than two levels deep cannot be written as text"),
        })
    }

    /// Write `data` to `path`, replacing any existing file
    pub fn write<T: Serialize>(&self, path: &Path, data: Data<'_, T>) -> anyhow::Result<()> {
        let mut out = BufWriter::new(create_file(path, self.create_dirs)?);
        for sample in data.as_slice() {
            let value = serde_json::to_value(sample).context("serializing sample")?;
            for line in self.rows(&value)? {
                writeln!(out, "{line}")?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl<T: Serialize> SaveCallback<T> for TextWriter {
    fn call(&mut self, call: &CallArgs<'_, T>) -> anyhow::Result<()> {
        let path = call.path().context("callback arguments carry no path")?;
        let data = call.data().context("callback arguments carry no data")?;
        self.write(path, data)
    }
}

/// Writes samples as framed, checksummed records
///
/// Each sample becomes one record: a `RecordHeader` followed by the sample
/// serialized as JSON. Read them back with `RecordFile`.
#[derive(Debug, Clone)]
pub struct RecordFileWriter {
    create_dirs: bool,
}

impl Default for RecordFileWriter {
    fn default() -> Self {
        Self { create_dirs: true }
    }
}

impl RecordFileWriter {
    /// Writer creating missing parent directories
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether missing parent directories are created
    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Write `data` to `path`, replacing any existing file
    ///
    /// Returns the number of records written.
    pub fn write<T: Serialize>(&self, path: &Path, data: Data<'_, T>) -> anyhow::Result<usize> {
        let mut out = BufWriter::new(create_file(path, self.create_dirs)?);
        let timestamp_us = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default();

        let samples = data.as_slice();
        for (index, sample) in samples.iter().enumerate() {
            let payload = serde_json::to_vec(sample).context("serializing sample")?;
            let size = u32::try_from(payload.len()).context("sample too large for one record")?;
            let index = u32::try_from(index).context("too many samples for one file")?;

            let mut header = RecordHeader::new(size, index, timestamp_us);
            header.update_crc(&payload);

            out.write_all(&header.to_bytes())?;
            out.write_all(&payload)?;
        }
        out.flush()?;
        Ok(samples.len())
    }
}

impl<T: Serialize> SaveCallback<T> for RecordFileWriter {
    fn call(&mut self, call: &CallArgs<'_, T>) -> anyhow::Result<()> {
        let path = call.path().context("callback arguments carry no path")?;
        let data = call.data().context("callback arguments carry no data")?;
        self.write(path, data).map(|_| ())
    }
}

fn create_file(path: &Path, create_dirs: bool) -> anyhow::Result<File> {
    if create_dirs {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

/// Scientific notation with a signed, at least two-digit exponent
fn format_float(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let formatted = format!("{value:.precision$e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or_default();
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}
