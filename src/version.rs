//! Configuration version encoding.
//!
//! A three-part (major, minor, revision) version is packed into one ordered
//! integer so persisted queue data can be stamped and compared with plain
//! integer comparison: `major * 1_000_000 + minor * 10_000 + revision`.
//! Two decimal digits are reserved for the major and minor components and
//! four for the revision.

use thiserror::Error;

/// Components of the current on-disk queue format version.
pub const FORMAT_MAJOR: u64 = 1;
pub const FORMAT_MINOR: u64 = 2;
pub const FORMAT_REVISION: u64 = 0;

/// The encoded format version stamped into the queue's `version` file.
pub const FORMAT_VERSION: u64 = FORMAT_MAJOR * 1_000_000 + FORMAT_MINOR * 10_000 + FORMAT_REVISION;

const MINOR_SPAN: u64 = 100;
const REVISION_SPAN: u64 = 10_000;
const MAJOR_SPAN: u64 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("version component {name} = {value} exceeds its span of {span}")]
    ComponentOutOfRange {
        name: &'static str,
        value: u64,
        span: u64,
    },
}

/// Pack a three-part version into a single ordered integer.
///
/// Components are bounded by their reserved digit spans (`major < 100`,
/// `minor < 100`, `revision < 10_000`).
pub fn encode(major: u64, minor: u64, revision: u64) -> Result<u64, VersionError> {
    if major >= MAJOR_SPAN {
        return Err(VersionError::ComponentOutOfRange {
            name: "major",
            value: major,
            span: MAJOR_SPAN,
        });
    }
    if minor >= MINOR_SPAN {
        return Err(VersionError::ComponentOutOfRange {
            name: "minor",
            value: minor,
            span: MINOR_SPAN,
        });
    }
    if revision >= REVISION_SPAN {
        return Err(VersionError::ComponentOutOfRange {
            name: "revision",
            value: revision,
            span: REVISION_SPAN,
        });
    }
    Ok(major * 1_000_000 + minor * 10_000 + revision)
}

/// Split an encoded version back into (major, minor, revision).
///
/// Total for any integer; the inverse of [`encode`] on its range.
pub fn decode(version: u64) -> (u64, u64, u64) {
    let major = version / 1_000_000;
    let remainder = version % 1_000_000;
    let minor = remainder / REVISION_SPAN;
    let revision = remainder % REVISION_SPAN;
    (major, minor, revision)
}
