//! Legacy `--volume host:container[:options]` specifications.

use std::path::PathBuf;

use bock_common::{BockError, BockResult};
use bock_oci::Mount;

use crate::options::MountOptions;
use crate::validate::{clean_path, validate_container_dir, validate_host_dir};

/// Split on `:` unless it is escaped as `\:`.
///
/// A backslash that does not precede a colon is kept as is.
#[must_use]
pub fn split_escaped_colons(spec: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(3);
    let mut current = String::new();
    let mut chars = spec.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&':') => {
                current.push(':');
                chars.next();
            }
            ':' => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse a `--volume` string into a bind mount.
///
/// The mount is recursive unless the options name `bind` or `rbind`.
/// Readability is left as given.
///
/// # Errors
///
/// Returns an error if the string does not have two or three fields, a
/// path is invalid, or the options conflict.
pub fn parse_volume(spec: &str) -> BockResult<Mount> {
    let fields = split_escaped_colons(spec);
    let (host, container, raw_options) = match fields.as_slice() {
        [host, container] => (host, container, ""),
        [host, container, options] => (host, container, options.as_str()),
        _ => {
            return Err(BockError::MalformedSpec {
                reason: "volume must be host-dir:ctr-dir[:option]".to_string(),
            });
        }
    };

    validate_host_dir(host)?;
    let destination = PathBuf::from(container);
    validate_container_dir(&destination)?;

    let mut options = MountOptions::from_tokens(raw_options.split(','));
    if !options.has_bind_type() {
        options.push("rbind");
    }
    let options = options.validate()?;

    Ok(Mount::bind(host, clean_path(&destination), options.to_vec()))
}
