//! Batch member import from CSV.
//!
//! The expected header is `firstName,lastName,phone` (case-insensitive, any
//! column order). Rows are validated independently; valid rows are handed to
//! the store to insert in one transaction and invalid ones are reported with
//! their 1-based data row number. Blank lines are skipped and not counted.

use std::collections::HashSet;
use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::error::{TenantError, TenantResult};
use crate::model::NewMember;

/// Longest accepted first or last name, in characters.
pub const MAX_NAME_LEN: usize = 100;

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// Why one row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

/// Outcome of an import. `imported + failed == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<RowError>,
}

/// Validated import, ready to insert.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    /// Valid rows with their row numbers.
    pub accepted: Vec<(usize, NewMember)>,
    /// Rejected rows.
    pub rejected: Vec<RowError>,
}

impl ImportPlan {
    /// Number of data rows seen.
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    /// Members to insert.
    pub fn members(&self) -> impl Iterator<Item = &NewMember> {
        self.accepted.iter().map(|(_, m)| m)
    }

    /// Report after every accepted row was inserted.
    pub fn into_report(self) -> ImportReport {
        let total = self.total();
        ImportReport {
            imported: self.accepted.len(),
            failed: self.rejected.len(),
            total,
            errors: self.rejected,
        }
    }
}

struct Columns {
    first_name: usize,
    last_name: usize,
    phone: usize,
}

impl Columns {
    fn from_header(fields: &[String]) -> TenantResult<Self> {
        let find = |name: &str| {
            fields
                .iter()
                .position(|f| f.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    TenantError::invalid_input(
                        "file",
                        format!("CSV header must contain firstName, lastName and phone (missing {})", name),
                    )
                })
        };
        Ok(Self {
            first_name: find("firstName")?,
            last_name: find("lastName")?,
            phone: find("phone")?,
        })
    }
}

/// Validate a CSV upload.
///
/// `existing` holds normalized phones already present in the target group.
/// Fails as a whole only when the input has no usable header.
pub fn plan_import(input: &str, existing: &HashSet<String>) -> TenantResult<ImportPlan> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut records = Records::new(input);

    let header = records
        .next()
        .ok_or_else(|| TenantError::invalid_input("file", "CSV file is empty"))?;
    let columns = Columns::from_header(&header)?;

    let mut plan = ImportPlan::default();
    let mut seen = HashSet::new();

    for (index, fields) in records.enumerate() {
        let row = index + 1;
        match validate_row(&fields, &columns) {
            Ok(member) => {
                if existing.contains(&member.phone) || !seen.insert(member.phone.clone()) {
                    plan.rejected.push(RowError {
                        row,
                        reason: "duplicate phone".into(),
                    });
                } else {
                    plan.accepted.push((row, member));
                }
            }
            Err(reason) => plan.rejected.push(RowError { row, reason }),
        }
    }

    Ok(plan)
}

fn validate_row(fields: &[String], columns: &Columns) -> Result<NewMember, String> {
    let field = |i: usize| fields.get(i).map(|s| s.trim()).unwrap_or("");

    let first_name = validate_name("firstName", field(columns.first_name))?;
    let last_name = validate_name("lastName", field(columns.last_name))?;
    let phone = normalize_phone(field(columns.phone))
        .ok_or_else(|| format!("invalid phone '{}'", field(columns.phone)))?;

    Ok(NewMember {
        first_name,
        last_name,
        phone,
    })
}

/// Validate a member name.
pub fn validate_name(field: &str, value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{} is required", field));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(format!("{} exceeds {} characters", field, MAX_NAME_LEN));
    }
    Ok(value.to_string())
}

/// Normalize a phone number to an optional `+` followed by digits.
///
/// Spaces, dashes, dots and parentheses are dropped. Returns `None` unless
/// 7 to 15 digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (plus, rest) = match raw.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let mut digits = String::with_capacity(rest.len() + 1);
    if plus {
        digits.push('+');
    }
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    let count = digits.len() - usize::from(plus);
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS)
        .contains(&count)
        .then_some(digits)
}

/// CSV records, honoring double-quoted fields and `""` escapes.
///
/// A quoted field may span line breaks, so records are read from the whole
/// input rather than line by line. Blank lines yield nothing.
struct Records<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Records<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    /// Read up to the next unquoted line break. Also reports whether any
    /// field was quoted, since `""` alone is a record and not a blank line.
    fn read_record(&mut self) -> (Vec<String>, bool) {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut saw_quote = false;

        while let Some(c) = self.chars.next() {
            match c {
                '"' if quoted => {
                    if self.chars.peek() == Some(&'"') {
                        current.push('"');
                        self.chars.next();
                    } else {
                        quoted = false;
                    }
                }
                '"' if current.trim().is_empty() => {
                    current.clear();
                    quoted = true;
                    saw_quote = true;
                }
                ',' if !quoted => fields.push(std::mem::take(&mut current)),
                '\n' if !quoted => break,
                '\r' if !quoted => {}
                _ => current.push(c),
            }
        }
        fields.push(current);
        (fields, saw_quote)
    }
}

impl Iterator for Records<'_> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.chars.peek()?;
            let (fields, saw_quote) = self.read_record();
            let blank = !saw_quote && fields.len() == 1 && fields[0].trim().is_empty();
            if !blank {
                return Some(fields);
            }
        }
    }
}
