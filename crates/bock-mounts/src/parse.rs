//! Lexical parsing of `--mount` specifications.
//!
//! A specification is a comma-separated list of `key` or `key=value`
//! tokens. This module only splits and classifies; each resolver decides
//! which keys it accepts.

use std::fmt;
use std::str::FromStr;

use bock_common::{BockError, BockResult};

/// The kind of mount a specification asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountKind {
    /// Expose a host, context, stage, or image path.
    #[default]
    Bind,
    /// Persistent host directory shared across builds.
    Cache,
    /// In-memory filesystem.
    Tmpfs,
}

impl MountKind {
    /// The name used in `type=`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Cache => "cache",
            Self::Tmpfs => "tmpfs",
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MountKind {
    type Err = BockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bind" => Ok(Self::Bind),
            "cache" => Ok(Self::Cache),
            "tmpfs" => Ok(Self::Tmpfs),
            other => Err(BockError::UnknownMountType {
                mount_type: other.to_string(),
            }),
        }
    }
}

/// One `key[=value]` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountArg {
    /// Text before the first `=`.
    pub key: String,
    /// Text after the first `=`, if there was one.
    pub value: Option<String>,
}

impl MountArg {
    /// Split a token at its first `=`.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: token.to_string(),
                value: None,
            },
        }
    }

    /// Whether the token carried `=value`.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// The value, failing with [`BockError::BadOptionArgument`] when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the token had no `=value`.
    pub fn required_value(&self) -> BockResult<&str> {
        self.value
            .as_deref()
            .ok_or_else(|| BockError::BadOptionArgument {
                option: self.key.clone(),
            })
    }

    /// Fail with [`BockError::BadOptionArgument`] if the token has a value.
    ///
    /// # Errors
    ///
    /// Returns an error for flag tokens written as `flag=value`.
    pub fn no_value(&self) -> BockResult<()> {
        if self.has_value() {
            return Err(BockError::BadOptionArgument {
                option: self.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for MountArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// A lexically split mount specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMount {
    /// The resolved mount type (bind when no `type=` was given).
    pub kind: MountKind,
    /// All tokens in order, including the `type=` token.
    pub args: Vec<MountArg>,
}

impl ParsedMount {
    /// Split a raw `--mount` string and determine its type.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::MalformedSpec`] for fewer than two tokens or a
    /// malformed `type=` token, and [`BockError::UnknownMountType`] for a
    /// type other than bind, cache, or tmpfs.
    pub fn parse(spec: &str) -> BockResult<Self> {
        let tokens: Vec<&str> = spec.split(',').collect();
        if tokens.len() < 2 {
            return Err(BockError::MalformedSpec {
                reason: format!("{spec:?} needs at least two comma-separated fields"),
            });
        }

        let mut kind = MountKind::default();
        for token in tokens.iter().filter(|t| t.starts_with("type=")) {
            let fields: Vec<&str> = token.split('=').collect();
            if fields.len() != 2 {
                return Err(BockError::MalformedSpec {
                    reason: format!("{token:?} is not a valid type field"),
                });
            }
            kind = fields[1].parse()?;
        }

        Ok(Self {
            kind,
            args: tokens.into_iter().map(MountArg::parse).collect(),
        })
    }
}
