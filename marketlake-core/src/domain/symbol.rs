//! Ticker symbols, uppercase-normalized.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest ticker accepted by any supported provider.
pub const MAX_SYMBOL_LEN: usize = 12;

/// A validated, uppercase ticker symbol such as `AAPL` or `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol '{0}' is longer than 12 characters")]
    TooLong(String),

    #[error("symbol '{symbol}' contains invalid character '{ch}'")]
    InvalidChar { symbol: String, ch: char },
}

impl Symbol {
    /// Trim, uppercase and validate a raw ticker string.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.chars().count() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(upper));
        }
        if let Some(ch) = upper
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
        {
            return Err(SymbolError::InvalidChar { symbol: upper, ch });
        }
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
