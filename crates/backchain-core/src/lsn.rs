//! Log sequence numbers.
//!
//! An LSN is only compared and ordered, never decomposed. Engines report them
//! as decimal strings up to 25 digits, so the value is held as a `u128` and
//! persisted as a fixed-width, zero-padded string whose byte order matches
//! numeric order.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Width of the persisted form (`u128::MAX` has 39 digits).
const SORTABLE_WIDTH: usize = 39;

/// Opaque, totally ordered position in a database's write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lsn(u128);

impl Lsn {
    #[must_use]
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u128 {
        self.0
    }

    /// Zero-padded form used as a catalog column so text ordering is numeric ordering.
    #[must_use]
    pub fn to_sortable(self) -> String {
        format!("{:0width$}", self.0, width = SORTABLE_WIDTH)
    }

    /// Parse either the display form or the sortable form.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the text is empty or not a decimal integer.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::parse_error(format!("Invalid LSN '{text}'")));
        }
        trimmed
            .parse::<u128>()
            .map(Self)
            .map_err(|e| Error::parse_error(format!("Invalid LSN '{text}': {e}")))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Lsn {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Lsn> for String {
    fn from(lsn: Lsn) -> Self {
        lsn.to_string()
    }
}
