//! # Picklists: restricting collections by identifier
//!
//! A picklist keeps the signatures whose chosen identifier appears in a
//! supplied value set, typically loaded from one column of a CSV file.
//! Matching is purely inclusive.

use std::collections::HashSet;
use std::convert::TryFrom;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::manifest::Record;
use crate::Error;
use crate::Result;

/// Which identifier a picklist matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickColumn {
    /// Full display name, exact match.
    #[default]
    Name,
    /// First whitespace-delimited token of the name.
    Ident,
    /// `Ident` with a trailing `.N` version stripped.
    IdentPrefix,
    /// Full 32-hex md5 digest.
    Md5,
    /// First 8 hex characters of the md5.
    Md5Prefix8,
    /// Alias for `Md5Prefix8`.
    Md5Short,
}

impl TryFrom<&str> for PickColumn {
    type Error = Error;

    fn try_from(coltype: &str) -> Result<Self> {
        match coltype {
            "name" => Ok(PickColumn::Name),
            "ident" => Ok(PickColumn::Ident),
            "identprefix" => Ok(PickColumn::IdentPrefix),
            "md5" => Ok(PickColumn::Md5),
            "md5prefix8" => Ok(PickColumn::Md5Prefix8),
            "md5short" => Ok(PickColumn::Md5Short),
            v => Err(Error::InvalidPicklistColumn { coltype: v.into() }),
        }
    }
}

impl std::fmt::Display for PickColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            PickColumn::Name => "name",
            PickColumn::Ident => "ident",
            PickColumn::IdentPrefix => "identprefix",
            PickColumn::Md5 => "md5",
            PickColumn::Md5Prefix8 => "md5prefix8",
            PickColumn::Md5Short => "md5short",
        };
        write!(f, "{}", name)
    }
}

/// First whitespace-delimited token of a display name.
fn ident_from_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

/// Strip a trailing `.N` version suffix from an identifier.
fn identprefix(ident: &str) -> &str {
    match ident.rsplit_once('.') {
        Some((prefix, version)) if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => {
            prefix
        }
        _ => ident,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Picklist {
    coltype: PickColumn,
    values: HashSet<String>,
}

impl Picklist {
    pub fn new(coltype: PickColumn, values: HashSet<String>) -> Self {
        Picklist { coltype, values }
    }

    pub fn coltype(&self) -> PickColumn {
        self.coltype
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Load values from the named column of a CSV file.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        column_name: &str,
        coltype: PickColumn,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Picklist::from_reader(file, column_name, coltype, path.as_ref().to_string_lossy().as_ref())
    }

    pub fn from_reader<R: Read>(
        rdr: R,
        column_name: &str,
        coltype: PickColumn,
        pickfile: &str,
    ) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(rdr);

        let col_idx = rdr
            .headers()?
            .iter()
            .position(|h| h == column_name)
            .ok_or_else(|| Error::NoSuchEntry {
                column: column_name.into(),
                pickfile: pickfile.into(),
            })?;

        let mut values = HashSet::new();
        for row in rdr.records() {
            let row = row?;
            if let Some(value) = row.get(col_idx) {
                if !value.is_empty() {
                    values.insert(value.to_string());
                }
            }
        }

        Ok(Picklist { coltype, values })
    }

    /// The key this picklist extracts for a (name, md5) pair.
    fn key<'a>(&self, name: &'a str, md5: &'a str) -> &'a str {
        match self.coltype {
            PickColumn::Name => name,
            PickColumn::Ident => ident_from_name(name),
            PickColumn::IdentPrefix => identprefix(ident_from_name(name)),
            PickColumn::Md5 => md5,
            PickColumn::Md5Prefix8 | PickColumn::Md5Short => {
                if md5.len() >= 8 {
                    &md5[..8]
                } else {
                    md5
                }
            }
        }
    }

    pub fn matches(&self, name: &str, md5: &str) -> bool {
        self.values.contains(self.key(name, md5))
    }

    pub fn matches_record(&self, record: &Record) -> bool {
        self.matches(record.name(), record.md5())
    }
}
