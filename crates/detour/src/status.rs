//! Status codes for Detour operations
//!
//! A status is a bitmask: one of the high level bits [`Status::SUCCESS`],
//! [`Status::FAILURE`] or [`Status::IN_PROGRESS`], combined with any number
//! of detail bits describing what happened.

use std::fmt;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        /// Operation failed
        const FAILURE = 1 << 31;
        /// Operation succeeded
        const SUCCESS = 1 << 30;
        /// Operation still in progress
        const IN_PROGRESS = 1 << 29;

        /// Input data is not recognized
        const WRONG_MAGIC = 1 << 0;
        /// Input data is in wrong version
        const WRONG_VERSION = 1 << 1;
        /// Operation ran out of memory
        const OUT_OF_MEMORY = 1 << 2;
        /// An input parameter was invalid
        const INVALID_PARAM = 1 << 3;
        /// Result buffer for the query was too small to store all results
        const BUFFER_TOO_SMALL = 1 << 4;
        /// Query ran out of nodes during search
        const OUT_OF_NODES = 1 << 5;
        /// Query did not reach the end location, returning best guess
        const PARTIAL_RESULT = 1 << 6;
        /// A tile has already been assigned to the given x,y coordinate
        const ALREADY_OCCUPIED = 1 << 7;
    }
}

/// Result type for Detour operations
pub type Result<T> = std::result::Result<T, Status>;

impl Status {
    /// Mask of the detail bits
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;

    /// Failure carrying [`Status::INVALID_PARAM`]
    pub const fn invalid_param() -> Self {
        Self::FAILURE.union(Self::INVALID_PARAM)
    }

    pub fn is_success(self) -> bool {
        self.contains(Self::SUCCESS)
    }

    pub fn is_failure(self) -> bool {
        self.contains(Self::FAILURE)
    }

    pub fn is_in_progress(self) -> bool {
        self.contains(Self::IN_PROGRESS)
    }

    /// Returns true if any bit of `detail` is set
    pub fn has_detail(self, detail: Status) -> bool {
        self.intersects(detail)
    }

    /// Detail bits only
    pub fn detail(self) -> Status {
        Self::from_bits_truncate(self.bits() & Self::DETAIL_MASK)
    }

    /// Converts a status into a result, succeeding with `value` unless the
    /// failure bit is set.
    pub fn to_result<T>(self, value: T) -> Result<T> {
        if self.is_failure() {
            Err(self)
        } else {
            Ok(value)
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_failure() {
            write!(f, "failure")?;
        } else if self.is_in_progress() {
            write!(f, "in progress")?;
        } else if self.is_success() {
            write!(f, "success")?;
        } else {
            write!(f, "unknown status")?;
        }

        const DETAILS: [(Status, &str); 8] = [
            (Status::WRONG_MAGIC, "wrong magic"),
            (Status::WRONG_VERSION, "wrong version"),
            (Status::OUT_OF_MEMORY, "out of memory"),
            (Status::INVALID_PARAM, "invalid parameter"),
            (Status::BUFFER_TOO_SMALL, "buffer too small"),
            (Status::OUT_OF_NODES, "out of nodes"),
            (Status::PARTIAL_RESULT, "partial result"),
            (Status::ALREADY_OCCUPIED, "already occupied"),
        ];
        let details: Vec<&str> = DETAILS
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                Status::invalid_param()
            }
            _ => Status::FAILURE,
        }
    }
}

impl From<Status> for recast_common::Error {
    fn from(status: Status) -> Self {
        recast_common::Error::Detour(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_level_bits() {
        let s = Status::SUCCESS | Status::PARTIAL_RESULT;
        assert!(s.is_success());
        assert!(!s.is_failure());
        assert!(s.has_detail(Status::PARTIAL_RESULT));
        assert_eq!(s.detail(), Status::PARTIAL_RESULT);

        let f = Status::invalid_param();
        assert!(f.is_failure());
        assert!(f.to_result(()).is_err());
        assert!(s.to_result(1).is_ok());
    }

    #[test]
    fn test_display_lists_details() {
        let s = Status::FAILURE | Status::WRONG_MAGIC | Status::WRONG_VERSION;
        assert_eq!(s.to_string(), "failure (wrong magic, wrong version)");
        assert_eq!(Status::SUCCESS.to_string(), "success");
    }

    #[test]
    fn test_converts_into_pipeline_error() {
        let err: recast_common::Error = Status::invalid_param().into();
        assert!(matches!(err, recast_common::Error::Detour(_)));
    }
}
