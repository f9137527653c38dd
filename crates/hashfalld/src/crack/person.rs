//! Password records as read from the input file.
//!
//! One record per line, `;`-separated:
//!
//! ```text
//! id;name;charset;password_length;password_hash;hint_hash;hint_hash;...
//! ```
//!
//! Each hint is the hash of a permutation of the char set with one character
//! left out; that character does not occur in the password.

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("line {line}: expected at least 5 fields, found {found}")]
    TooFewFields { line: usize, found: usize },

    #[error("line {line}: invalid {field}: {value:?}")]
    BadField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: u32,
    pub name: String,
    pub charset: Vec<char>,
    pub password_length: usize,
    pub password_hash: String,
    pub hint_hashes: Vec<String>,
    remaining: BTreeSet<char>,
}

impl Person {
    pub fn parse(line: &str, line_no: usize) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.trim().split(';').map(str::trim).collect();
        if fields.len() < 5 {
            return Err(RecordError::TooFewFields {
                line: line_no,
                found: fields.len(),
            });
        }

        let bad = |field: &'static str, value: &str| RecordError::BadField {
            line: line_no,
            field,
            value: value.to_string(),
        };

        let id = fields[0].parse().map_err(|_| bad("id", fields[0]))?;
        let charset: Vec<char> = fields[2].chars().collect();
        if charset.is_empty() {
            return Err(bad("charset", fields[2]));
        }
        let password_length = fields[3].parse().map_err(|_| bad("password length", fields[3]))?;
        let password_hash = fields[4].to_ascii_lowercase();
        if password_hash.is_empty() {
            return Err(bad("password hash", fields[4]));
        }
        let hint_hashes = fields[5..]
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase())
            .collect();

        Ok(Self {
            id,
            name: fields[1].to_string(),
            remaining: charset.iter().copied().collect(),
            charset,
            password_length,
            password_hash,
            hint_hashes,
        })
    }

    /// Characters not yet ruled out, in sorted order.
    pub fn remaining(&self) -> Vec<char> {
        self.remaining.iter().copied().collect()
    }

    /// Rule out a character. Returns false if it was already gone.
    pub fn drop_char(&mut self, c: char) -> bool {
        self.remaining.remove(&c)
    }

    /// Every hint has ruled out its character. Repeated characters in the
    /// char set count once.
    pub fn has_all_hints(&self) -> bool {
        let distinct = self.charset.iter().collect::<BTreeSet<_>>().len();
        self.remaining.len() + self.hint_hashes.len() == distinct
    }
}

/// Read all records from `reader`. Blank lines and a leading header line
/// (one whose first field is not a number) are skipped.
pub fn read_persons(reader: impl BufRead) -> Result<Vec<Person>, RecordError> {
    let mut persons = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| RecordError::Read {
            path: "<input>".into(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        if index == 0 && !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        persons.push(Person::parse(&line, line_no)?);
    }
    Ok(persons)
}

pub fn load_persons(path: &Path) -> Result<Vec<Person>, RecordError> {
    let file = std::fs::File::open(path).map_err(|source| RecordError::Read {
        path: path.display().to_string(),
        source,
    })?;
    read_persons(std::io::BufReader::new(file))
}
