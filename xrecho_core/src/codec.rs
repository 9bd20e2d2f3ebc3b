//! Delimited tabular codec for the persisted recording files.
//!
//! Every XREcho file is a flat delimited text table with a header line. The
//! format is intentionally uncompressed so that spreadsheets and analysis
//! scripts can open recordings directly.
//!
//! Reading is forgiving: cells are trimmed of quotes, backslashes are dropped,
//! numbers are sniffed into `f32` and blank cells are simply absent from the
//! row. Writing goes through the closed [`Field`] enum so every rendering
//! rule lives in one `match`.

use crate::error::{EchoError, Result};
use crate::tracking::ActionKind;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const QUOTE: char = '"';
const LINE_TERMINATOR: &str = "\n";

// ============================================================================
// DIALECT
// ============================================================================

/// List and decimal separators of a file.
///
/// Passed explicitly everywhere instead of reading process-wide locale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    /// Separator between cells
    pub separator: char,

    /// Decimal mark of rendered floats
    pub decimal: char,
}

impl Dialect {
    /// `,` between cells, `.` as decimal mark.
    pub const fn english() -> Self {
        Self {
            separator: ',',
            decimal: '.',
        }
    }

    /// `;` between cells, `,` as decimal mark.
    pub const fn french() -> Self {
        Self {
            separator: ';',
            decimal: ',',
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::english()
    }
}

// ============================================================================
// READING
// ============================================================================

/// A single parsed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f32),
    Text(String),
}

impl Cell {
    /// Numeric value, if the cell parsed as a number.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(_) => None,
        }
    }

    /// The cell rendered back to a string (numbers use `.` as decimal mark).
    pub fn to_text(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// One data line of a table, keyed by header name.
///
/// Blank cells are not stored, so `get` distinguishes "empty" from "zero".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: BTreeMap<String, Cell>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    /// Numeric cell value.
    pub fn f32(&self, column: &str) -> Option<f32> {
        self.get(column).and_then(Cell::as_f32)
    }

    /// Numeric cell value as a non-negative integer.
    pub fn index(&self, column: &str) -> Option<usize> {
        self.f32(column)
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize)
    }

    /// Cell rendered as text, whatever its parsed type.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).map(Cell::to_text)
    }

    /// Reads `<prefix>.x`, `<prefix>.y`, `<prefix>.z`; missing components are 0.
    pub fn vec3(&self, prefix: &str) -> Vector3<f32> {
        let mut v = Vector3::zeros();
        for (i, axis) in ["x", "y", "z"].iter().enumerate() {
            if let Some(value) = self.f32(&format!("{prefix}.{axis}")) {
                v[i] = value;
            }
        }
        v
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn insert(&mut self, column: impl Into<String>, cell: Cell) {
        self.cells.insert(column.into(), cell);
    }
}

/// Reads a table from disk.
///
/// # Arguments
/// * `path` - File to read
/// * `dialect` - Separators the file was written with
/// * `filter` - Optional `(column, value)`; rows whose column is not exactly
///   `value` are dropped
///
/// # Errors
/// `EchoError::NotFound` when the file does not exist. The caller decides
/// whether that is fatal.
pub fn read_table(path: &Path, dialect: &Dialect, filter: Option<(&str, &str)>) -> Result<Vec<Row>> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EchoError::NotFound(path.to_path_buf()),
        _ => EchoError::Io(e),
    })?;
    Ok(parse_table(&text, dialect, filter))
}

/// Parses a whole table held in memory. See [`read_table`].
pub fn parse_table(text: &str, dialect: &Dialect, filter: Option<(&str, &str)>) -> Vec<Row> {
    let lines = split_lines(text);
    let Some((header_line, data_lines)) = lines.split_first() else {
        return Vec::new();
    };

    let header: Vec<String> = split_cells(header_line, dialect.separator)
        .iter()
        .map(|h| clean_cell(h))
        .collect();

    let mut rows = Vec::new();

    'lines: for line in data_lines {
        let values = split_cells(line, dialect.separator);
        if values.first().map_or(true, |v| v.is_empty()) {
            continue;
        }

        let mut row = Row::default();
        let mut filter_matched = filter.is_none();

        for (name, raw) in header.iter().zip(values.iter()) {
            let value = clean_cell(raw);

            if let Some((column, expected)) = filter {
                if name == column {
                    if value != expected {
                        continue 'lines;
                    }
                    filter_matched = true;
                }
            }

            if value.is_empty() {
                continue;
            }

            row.insert(name.clone(), sniff(&value, dialect));
        }

        if filter_matched {
            rows.push(row);
        }
    }

    rows
}

/// Splits on `\r\n`, `\n\r`, `\n` or `\r`.
fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' || b == b'\r' {
            lines.push(&text[start..i]);
            let pair = if b == b'\n' { b'\r' } else { b'\n' };
            i += if bytes.get(i + 1) == Some(&pair) { 2 } else { 1 };
            start = i;
        } else {
            i += 1;
        }
    }
    lines.push(&text[start..]);

    lines
}

/// Splits a line on `separator`, ignoring separators inside double quotes.
fn split_cells(line: &str, separator: char) -> Vec<&str> {
    let mut cells = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in line.char_indices() {
        if c == QUOTE {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            cells.push(&line[start..i]);
            start = i + c.len_utf8();
        }
    }
    cells.push(&line[start..]);

    cells
}

fn clean_cell(raw: &str) -> String {
    raw.trim_matches(QUOTE).replace('\\', "")
}

/// Numbers become `Cell::Number`, anything else stays text.
fn sniff(value: &str, dialect: &Dialect) -> Cell {
    let candidate = value.trim();
    let parsed = if dialect.decimal != '.' && !candidate.contains('.') {
        candidate.replace(dialect.decimal, ".").parse::<f32>()
    } else {
        candidate.parse::<f32>()
    };

    match parsed {
        Ok(n) if n.is_finite() => Cell::Number(n),
        _ => Cell::Text(value.to_string()),
    }
}

// ============================================================================
// WRITING
// ============================================================================

/// A value handed to [`TableWriter::write_line`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Str(&'a str),
    Int(i32),
    Float(f32),
    Long(i64),
    /// Three cells: x, y, z
    Vec3(Vector3<f32>),
    /// Three cells: Euler angles in degrees, each in `[0, 360)`
    Rotation(UnitQuaternion<f32>),
    /// Discriminant of an action kind
    Action(ActionKind),
    /// Three blank cells standing in for a vector that is not tracked
    EmptyVec3,
}

impl Field<'_> {
    fn render(&self, dialect: &Dialect, out: &mut String) {
        let sep = dialect.separator;
        match self {
            Field::Str(s) => {
                if s.contains(sep) {
                    out.push(QUOTE);
                    out.push_str(s);
                    out.push(QUOTE);
                } else {
                    out.push_str(s);
                }
            }
            Field::Int(i) => out.push_str(&i.to_string()),
            Field::Long(l) => out.push_str(&l.to_string()),
            Field::Float(f) => push_float(*f, dialect, out),
            Field::Vec3(v) => push_vec3(v, dialect, out),
            Field::Rotation(q) => push_vec3(&euler_degrees(q), dialect, out),
            Field::Action(kind) => out.push_str(&kind.index().to_string()),
            Field::EmptyVec3 => {
                out.push(sep);
                out.push(sep);
            }
        }
    }
}

fn push_float(f: f32, dialect: &Dialect, out: &mut String) {
    let rendered = f.to_string();
    if dialect.decimal == '.' {
        out.push_str(&rendered);
    } else {
        out.push_str(&rendered.replace('.', &dialect.decimal.to_string()));
    }
}

fn push_vec3(v: &Vector3<f32>, dialect: &Dialect, out: &mut String) {
    push_float(v.x, dialect, out);
    out.push(dialect.separator);
    push_float(v.y, dialect, out);
    out.push(dialect.separator);
    push_float(v.z, dialect, out);
}

/// Euler angles of a rotation in degrees, wrapped to `[0, 360)`.
pub fn euler_degrees(q: &UnitQuaternion<f32>) -> Vector3<f32> {
    let (roll, pitch, yaw) = q.euler_angles();
    Vector3::new(roll, pitch, yaw).map(|r| r.to_degrees().rem_euclid(360.0))
}

/// Line-oriented writer for one table file.
///
/// Keeps a running byte count so callers can display the size of a
/// recording without touching the filesystem.
pub struct TableWriter {
    out: BufWriter<File>,
    path: PathBuf,
    dialect: Dialect,
    size: usize,
}

impl TableWriter {
    /// Creates (or truncates) `path`.
    pub fn create(path: &Path, dialect: Dialect) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            dialect,
            size: 0,
        })
    }

    /// Writes one line of fields joined by the list separator.
    pub fn write_line(&mut self, fields: &[Field<'_>]) -> Result<()> {
        let mut line = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i != 0 {
                line.push(self.dialect.separator);
            }
            field.render(&self.dialect, &mut line);
        }
        line.push_str(LINE_TERMINATOR);

        self.out.write_all(line.as_bytes())?;
        self.size += line.len();
        Ok(())
    }

    /// Writes a header line of column names.
    pub fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        let fields: Vec<Field<'_>> = columns.iter().map(|c| Field::Str(c)).collect();
        self.write_line(&fields)
    }

    /// Bytes written so far.
    pub fn size_of_file(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes to disk. Dropping without closing also flushes but loses errors.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Flushes and closes the file.
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
