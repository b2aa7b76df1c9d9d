use core::fmt;

use thiserror::Error;

const PREFIX_CHARACTERS: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Longest prefix accepted.
pub const MAX_PREFIX_LENGTH: usize = 128;

/// Longest disambiguator or extension accepted.
pub const MAX_TOKEN_LENGTH: usize = 32;

/// A validated component of a backup name.
///
/// Prefixes may contain `[a-zA-Z0-9_\-]`. Tokens (disambiguators and
/// extensions) are restricted to `[a-zA-Z0-9]` so the fields around them can
/// always be split apart again.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamePart(String);

impl NamePart {
    /// Validate a series prefix.
    pub fn prefix(value: &str) -> Result<Self, NamePartError> {
        Self::validate(value, MAX_PREFIX_LENGTH, |byte| {
            PREFIX_CHARACTERS.contains(&byte)
        })
    }

    /// Validate a disambiguator or an extension.
    pub fn token(value: &str) -> Result<Self, NamePartError> {
        Self::validate(value, MAX_TOKEN_LENGTH, |byte| byte.is_ascii_alphanumeric())
    }

    /// The part as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(
        value: &str,
        limit: usize,
        is_valid: impl Fn(u8) -> bool,
    ) -> Result<Self, NamePartError> {
        if value.is_empty() {
            return Err(NamePartError::Empty);
        }

        if value.len() > limit {
            return Err(NamePartError::TooLong(value.len(), limit));
        }

        if let Some((index, byte)) = value
            .bytes()
            .enumerate()
            .find(|(_, byte)| !is_valid(*byte))
        {
            return Err(NamePartError::Invalid(index, char::from(byte)));
        }

        Ok(Self(value.to_string()))
    }
}

impl fmt::Debug for NamePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for NamePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical backup series: every backup sharing a prefix and an extension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Series {
    /// The series prefix, usually derived from the database name.
    pub prefix: NamePart,

    /// The dump format.
    pub extension: NamePart,
}

impl Series {
    /// Validate and create a series.
    pub fn new(prefix: &str, extension: &str) -> Result<Self, NamePartError> {
        Ok(Self {
            prefix: NamePart::prefix(prefix)?,
            extension: NamePart::token(extension)?,
        })
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_*.{}", self.prefix, self.extension)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamePartError {
    #[error("Input was empty")]
    Empty,

    /// `length, limit`
    #[error("Input was too long {0} > {1}")]
    TooLong(usize, usize),

    /// `index, char`
    #[error("Invalid character at index {0}: '{1}'")]
    Invalid(usize, char),
}
