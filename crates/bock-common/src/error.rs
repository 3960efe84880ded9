//! Common error types for the Bock ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BockError`].
pub type BockResult<T> = Result<T, BockError>;

/// Common errors across the Bock ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum BockError {
    /// A mount or volume specification could not be resolved.
    ///
    /// Wraps the underlying failure together with the raw specification
    /// string that caused it.
    #[error("{spec}: {source}")]
    #[diagnostic(code(bock::mount::invalid))]
    Mount {
        /// The raw `--mount` or `--volume` string.
        spec: String,
        /// The underlying failure.
        #[source]
        source: Box<BockError>,
    },

    /// Mount specification does not follow the mount grammar.
    #[error("incorrect mount format: {reason}")]
    #[diagnostic(
        code(bock::mount::malformed),
        help("should be --mount type=<bind|cache|tmpfs>,[src=<host-dir>,]target=<ctr-dir>[,options]")
    )]
    MalformedSpec {
        /// What is wrong with the specification.
        reason: String,
    },

    /// Unrecognized mount option.
    #[error("invalid mount option: {option}")]
    #[diagnostic(code(bock::mount::bad_option))]
    BadMountOption {
        /// The offending option.
        option: String,
    },

    /// A mount option was given without its required argument, or the
    /// argument is not acceptable.
    #[error("must provide an argument for option: {option}")]
    #[diagnostic(code(bock::mount::bad_argument))]
    BadOptionArgument {
        /// The offending option.
        option: String,
    },

    /// Mount type other than bind, cache, or tmpfs.
    #[error("invalid filesystem type {mount_type:?}")]
    #[diagnostic(code(bock::mount::unknown_type), help("supported types are bind, cache and tmpfs"))]
    UnknownMountType {
        /// The requested type.
        mount_type: String,
    },

    /// Two options of the same category were given for one mount.
    #[error("invalid options {options:?}, can only specify 1 {category} option")]
    #[diagnostic(code(bock::mount::conflicting_options))]
    ConflictingOptions {
        /// The full option list.
        options: String,
        /// The option category that appears twice.
        category: String,
    },

    /// The mount has no destination.
    #[error("must set volume destination")]
    #[diagnostic(code(bock::mount::missing_destination), help("add target=<ctr-dir>"))]
    MissingDestination,

    /// The mount has no source.
    #[error("must set volume source")]
    #[diagnostic(code(bock::mount::missing_source), help("add src=<host-dir>"))]
    MissingSource,

    /// The mount type does not take a source.
    #[error("source is not supported with {mount_type} mounts")]
    #[diagnostic(code(bock::mount::source_not_supported))]
    SourceNotSupported {
        /// The mount type.
        mount_type: String,
    },

    /// Two mounts in one batch claim the same container path.
    #[error("duplicate mount destination: {destination}")]
    #[diagnostic(code(bock::mount::duplicate_destination))]
    DuplicateDestination {
        /// The contested destination.
        destination: String,
    },

    /// A `from=` target is unknown, or is an image where one is not allowed.
    #[error("no stage or additional build context found with name {name}")]
    #[diagnostic(code(bock::mount::unresolved_stage))]
    UnresolvedStage {
        /// The requested stage name.
        name: String,
    },

    /// Cache `sharing=` value other than `shared` or `locked`.
    #[error("unrecognized value {value:?} for field `sharing`")]
    #[diagnostic(code(bock::mount::sharing_mode), help("use sharing=shared or sharing=locked"))]
    UnrecognizedSharingMode {
        /// The requested sharing mode.
        value: String,
    },

    /// A cache `mode`, `uid`, or `gid` value failed to parse.
    #[error("unable to parse cache {attribute}: {value:?}")]
    #[diagnostic(
        code(bock::mount::cache_attribute),
        help("mode is octal (e.g. 0755), uid and gid are decimal")
    )]
    InvalidCacheAttribute {
        /// The attribute name.
        attribute: String,
        /// The value that failed to parse.
        value: String,
    },

    /// A host or container path is not acceptable.
    #[error("invalid path {path:?}: {reason}")]
    #[diagnostic(code(bock::mount::invalid_path))]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Image not found.
    #[error("Image not found: {reference}")]
    #[diagnostic(code(bock::image::not_found))]
    ImageNotFound {
        /// The image reference that was not found.
        reference: String,
    },

    /// Overlay setup or teardown failed.
    #[error("setting up overlay of {path:?}: {message}")]
    #[diagnostic(code(bock::mount::overlay))]
    Overlay {
        /// The path being overlaid.
        path: String,
        /// The failure.
        message: String,
    },

    /// A cache lock could not be acquired.
    #[error("unable to acquire lock {path:?}: {source}")]
    #[diagnostic(code(bock::mount::lock))]
    Lock {
        /// The lock file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bock::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(bock::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(bock::internal),
        help("This is a bug, please report it at https://github.com/bock-containers/bock/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl BockError {
    /// Attach the raw mount specification to an error.
    ///
    /// Errors that already carry a specification are returned unchanged.
    #[must_use]
    pub fn for_spec(self, spec: &str) -> Self {
        match self {
            Self::Mount { .. } => self,
            other => Self::Mount {
                spec: spec.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any [`BockError::Mount`] context removed.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Mount { source, .. } => source.root(),
            other => other,
        }
    }
}
