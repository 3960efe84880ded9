//! Mount option sets.
//!
//! Readability is tracked separately from the remaining flags: `rw` and
//! `ro` may both be given, and the last one wins. Every other flag belongs
//! to a category of which at most one member may be present.

use bock_common::{BockError, BockResult};

/// Requested readability of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readability {
    /// `rw`
    ReadWrite,
    /// `ro`
    ReadOnly,
}

impl Readability {
    /// The option token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "rw",
            Self::ReadOnly => "ro",
        }
    }
}

/// Propagation modes accepted by `bind-propagation=` and as bare flags.
pub const PROPAGATION_MODES: &[&str] =
    &["shared", "rshared", "private", "rprivate", "slave", "rslave"];

/// Option categories; two flags from the same category conflict.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("'noexec' or 'exec'", &["noexec", "exec"]),
    ("'nodev' or 'dev'", &["nodev", "dev"]),
    ("'nosuid' or 'suid'", &["nosuid", "suid"]),
    (
        "root propagation",
        &[
            "private",
            "rprivate",
            "shared",
            "rshared",
            "slave",
            "rslave",
            "unbindable",
            "runbindable",
        ],
    ),
    ("'bind' or 'rbind'", &["bind", "rbind"]),
    ("'z' or 'Z'", &["z", "Z"]),
    ("'U'", &["U"]),
    ("'idmap'", &["idmap"]),
    ("'copy' or 'nocopy'", &["copy", "nocopy"]),
    ("'no-dereference'", &["no-dereference"]),
];

/// macOS-only consistency hints, accepted and dropped.
const IGNORED: &[&str] = &["cached", "delegated", "consistent"];

/// An ordered option set with an explicit readability field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    readability: Option<Readability>,
    flags: Vec<String>,
}

impl MountOptions {
    /// An empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an option set from a flat token list, as found after the
    /// second colon of a `--volume`.
    #[must_use]
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut options = Self::new();
        for token in tokens {
            match token {
                "" => {}
                "rw" => options.set_readability(Readability::ReadWrite),
                "ro" => options.set_readability(Readability::ReadOnly),
                flag => options.push(flag),
            }
        }
        options
    }

    /// Record a readability token; later calls override earlier ones.
    pub fn set_readability(&mut self, readability: Readability) {
        self.readability = Some(readability);
    }

    /// The explicitly requested readability, if any.
    #[must_use]
    pub const fn readability(&self) -> Option<Readability> {
        self.readability
    }

    /// Whether the mount ends up writable (no readability token means writable).
    #[must_use]
    pub fn is_read_write(&self) -> bool {
        self.readability != Some(Readability::ReadOnly)
    }

    /// Append a flag.
    pub fn push(&mut self, flag: impl Into<String>) {
        self.flags.push(flag.into());
    }

    /// Whether a flag is present.
    #[must_use]
    pub fn contains(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Whether any flag of the `bind`/`rbind` category is present.
    #[must_use]
    pub fn has_bind_type(&self) -> bool {
        self.contains("bind") || self.contains("rbind")
    }

    /// Check the set against the shared option rules and drop ignored hints.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::ConflictingOptions`] when two flags share a
    /// category and [`BockError::BadMountOption`] for unknown flags.
    pub fn validate(mut self) -> BockResult<Self> {
        let mut seen = [false; CATEGORIES.len()];
        for flag in &self.flags {
            if IGNORED.contains(&flag.as_str()) {
                continue;
            }
            let Some(idx) = CATEGORIES
                .iter()
                .position(|(_, members)| members.contains(&flag.as_str()))
            else {
                return Err(BockError::BadMountOption {
                    option: flag.clone(),
                });
            };
            if seen[idx] {
                return Err(BockError::ConflictingOptions {
                    options: self.to_vec().join(", "),
                    category: CATEGORIES[idx].0.to_string(),
                });
            }
            seen[idx] = true;
        }
        self.flags.retain(|flag| !IGNORED.contains(&flag.as_str()));
        Ok(self)
    }

    /// Render the set as OCI option strings, readability first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.readability
            .map(|r| r.as_str().to_string())
            .into_iter()
            .chain(self.flags.iter().cloned())
            .collect()
    }
}
