//! Record stream - step-tagged sparse records from line-delimited logs
//!
//! ## Accepted shapes
//!
//! ```text
//! {"train/loss": 0.8, "step": 100}                     flat
//! {"_i": 100, "out": {"train/loss": 0.8}}              wrapped
//! ```
//!
//! Both normalise to one flat [`Record`]: for the wrapped shape the inner
//! `out` mapping becomes the metric map and the remaining top-level fields
//! (the step fields) are hoisted next to it.
//!
//! ## Usage
//!
//! ```rust
//! use steplog::record::{RecordStream, StepPolicy};
//!
//! let log = "{\"_i\": 0, \"out\": {\"train/loss\": 1.0}}\n\n{\"_i\": 100, \"out\": {\"train/loss\": 0.8}}\n";
//! let records = RecordStream::from_reader(log.as_bytes())
//!     .collect::<steplog::Result<Vec<_>>>()?;
//!
//! assert_eq!(records.len(), 2);
//! assert_eq!(records[1].step(&StepPolicy::default()), Some(100));
//! # Ok::<(), steplog::Error>(())
//! ```

mod step;

pub use step::{StepPolicy, StepSource, LINE_INDEX_FIELD};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{Error, Result};

/// Metric keys that carry arrays instead of scalars unless configured otherwise.
pub const DEFAULT_VECTOR_KEYS: &[&str] = &["mins_snr_curve/t", "mins_snr_curve/weight"];

/// Key of the wrapped metric mapping.
const NESTED_KEY: &str = "out";

/// A logged value: a scalar, or a numeric vector for declared vector keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Scalar metric.
    Scalar(f64),
    /// Vector-valued metric (e.g. a weight curve).
    Vector(Vec<f64>),
}

impl Value {
    /// The scalar, if this is one.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Vector(_) => None,
        }
    }

    /// The vector, if this is one.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Scalar(_) => None,
            Self::Vector(v) => Some(v),
        }
    }
}

/// A single logged observation.
///
/// Records are immutable once parsed. They keep the physical line they came
/// from so a [`StepPolicy`] can fall back to line position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    line: usize,
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record from its line position and already-typed fields.
    #[must_use]
    pub fn new(line: usize, fields: BTreeMap<String, Value>) -> Self {
        Self { line, fields }
    }

    /// Create a builder for constructing a record field by field.
    #[must_use]
    pub fn builder(line: usize) -> RecordBuilder {
        RecordBuilder::new(line)
    }

    /// 0-based line position in the source file.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    /// All fields, metric keys and hoisted step fields alike.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a scalar field; `None` if absent or vector-valued.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_scalar)
    }

    /// Look up a vector field; `None` if absent or scalar.
    #[must_use]
    pub fn vector(&self, key: &str) -> Option<&[f64]> {
        self.fields.get(key).and_then(Value::as_vector)
    }

    /// Whether the record carries `key` at all.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Resolve this record's step under `policy`.
    #[must_use]
    pub fn step(&self, policy: &StepPolicy) -> Option<i64> {
        policy.resolve(self)
    }
}

/// Builder for `Record`.
#[derive(Debug)]
pub struct RecordBuilder {
    line: usize,
    fields: BTreeMap<String, Value>,
}

impl RecordBuilder {
    /// Create a new builder for the record at `line`.
    #[must_use]
    pub fn new(line: usize) -> Self {
        Self {
            line,
            fields: BTreeMap::new(),
        }
    }

    /// Add a scalar field.
    #[must_use]
    pub fn scalar(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), Value::Scalar(value));
        self
    }

    /// Add a vector field.
    #[must_use]
    pub fn vector(mut self, key: impl Into<String>, value: Vec<f64>) -> Self {
        self.fields.insert(key.into(), Value::Vector(value));
        self
    }

    /// Build the `Record`.
    #[must_use]
    pub fn build(self) -> Record {
        Record {
            line: self.line,
            fields: self.fields,
        }
    }
}

/// Lazy, file-ordered stream of [`Record`]s.
///
/// Blank lines are skipped but still advance the line position. The first
/// malformed line is yielded as [`Error::MalformedLog`] and ends the stream.
pub struct RecordStream<R> {
    lines: Lines<R>,
    source: PathBuf,
    vector_keys: FxHashSet<String>,
    line: usize,
    finished: bool,
}

impl RecordStream<BufReader<File>> {
    /// Open a log file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] naming the path if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::read(path, e))?;
        let mut stream = Self::from_reader(BufReader::new(file));
        stream.source = path.to_path_buf();
        Ok(stream)
    }
}

impl<R: BufRead> RecordStream<R> {
    /// Stream records from any buffered reader.
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            source: PathBuf::from("<reader>"),
            vector_keys: DEFAULT_VECTOR_KEYS.iter().map(|k| (*k).to_string()).collect(),
            line: 0,
            finished: false,
        }
    }

    /// Replace the set of keys whose array values are retained.
    #[must_use]
    pub fn with_vector_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vector_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Path (or `<reader>`) used in error messages.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(Error::read(self.source.clone(), e)));
                }
            };
            let line = self.line;
            self.line += 1;

            if text.trim().is_empty() {
                continue;
            }

            return Some(parse_record(&text, line, &self.vector_keys).map_err(|reason| {
                self.finished = true;
                Error::MalformedLog {
                    path: self.source.clone(),
                    line: line + 1,
                    reason,
                }
            }));
        }
    }
}

/// Read every record of a log file.
///
/// # Errors
///
/// Returns the first IO or [`Error::MalformedLog`] failure.
pub fn read_records<P, I, S>(path: P, vector_keys: I) -> Result<Vec<Record>>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let records = RecordStream::open(&path)?
        .with_vector_keys(vector_keys)
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        path = %path.as_ref().display(),
        records = records.len(),
        "read log"
    );
    Ok(records)
}

/// Parse one non-blank log line into a [`Record`].
///
/// Bare `NaN`/`Infinity` tokens, which Python's `json` writes, do not parse
/// as JSON; they are read as null so the affected field is dropped.
///
/// # Errors
///
/// Returns the parser diagnostic if the line is not a JSON object.
pub fn parse_record(
    text: &str,
    line: usize,
    vector_keys: &FxHashSet<String>,
) -> std::result::Result<Record, String> {
    let parsed: JsonValue = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(first) => {
            let sanitized = null_non_finite_tokens(text);
            if sanitized == text {
                return Err(first.to_string());
            }
            serde_json::from_str(&sanitized).map_err(|_| first.to_string())?
        }
    };

    let JsonValue::Object(object) = parsed else {
        return Err(format!("expected a JSON object, found {}", json_kind(&parsed)));
    };

    let fields = flatten(object)
        .into_iter()
        .filter_map(|(key, value)| {
            let typed = to_value(&key, value, vector_keys)?;
            Some((key, typed))
        })
        .collect();

    Ok(Record::new(line, fields))
}

fn flatten(mut object: Map<String, JsonValue>) -> Map<String, JsonValue> {
    match object.remove(NESTED_KEY) {
        Some(JsonValue::Object(mut inner)) => {
            // hoisted top-level fields win over same-named metrics
            for (key, value) in object {
                inner.insert(key, value);
            }
            inner
        }
        Some(other) => {
            object.insert(NESTED_KEY.to_string(), other);
            object
        }
        None => object,
    }
}

fn to_value(key: &str, value: JsonValue, vector_keys: &FxHashSet<String>) -> Option<Value> {
    match value {
        JsonValue::Number(n) => n.as_f64().map(Value::Scalar),
        JsonValue::Array(items) if vector_keys.contains(key) => items
            .iter()
            .map(JsonValue::as_f64)
            .collect::<Option<Vec<f64>>>()
            .map(Value::Vector),
        _ => None,
    }
}

const fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn null_non_finite_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if let Some(token) = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|t| rest.starts_with(t))
        {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}
