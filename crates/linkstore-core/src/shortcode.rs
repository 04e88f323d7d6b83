use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::Display;
use xxhash_rust::xxh64::xxh64;

/// The compact identifier an original URL is stored under.
///
/// Codes must be 1-64 characters long and contain only alphanumeric
/// characters, hyphens, or underscores.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

const MIN_LENGTH: usize = 1;
const MAX_LENGTH: usize = 64;
const DERIVED_LENGTH: usize = 8;

impl ShortCode {
    /// Creates a new `ShortCode` after validating the input.
    ///
    /// Valid codes are 1-64 characters and contain only `[a-zA-Z0-9_-]`.
    pub fn new(code: impl Into<String>) -> Result<Self, CoreError> {
        let code = code.into();
        Self::validate(&code)?;
        Ok(Self(code))
    }

    /// Creates a `ShortCode` without validation.
    ///
    /// Use this only for codes read back from a backend or produced by
    /// [`ShortCode::derive`].
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Derives the deterministic code for an original URL.
    ///
    /// The same URL always yields the same code, which is what makes a
    /// second shortening of the same URL surface as a conflict.
    ///
    /// # Examples
    ///
    /// ```
    /// use linkstore_core::ShortCode;
    ///
    /// let a = ShortCode::derive("https://example.com");
    /// let b = ShortCode::derive("https://example.com");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 8);
    /// ```
    pub fn derive(original_url: &str) -> Self {
        let digest = xxh64(original_url.as_bytes(), 0).to_be_bytes();
        let mut encoded = bs58::encode(digest).into_string();
        encoded.truncate(DERIVED_LENGTH);
        Self(encoded)
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    fn validate(code: &str) -> Result<(), CoreError> {
        if code.len() < MIN_LENGTH || code.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortCode(format!(
                "length must be between {} and {}, got {}",
                MIN_LENGTH,
                MAX_LENGTH,
                code.len()
            )));
        }

        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidShortCode(format!(
                "must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                code
            )));
        }

        Ok(())
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ShortCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ShortCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
