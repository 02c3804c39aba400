use std::fmt;

use semver::{Version, VersionReq};

use super::tables::{pack_version, NP_VERSION_MAJOR, NP_VERSION_MINOR};

/// Version pair carried in the `version` field of both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableVersion {
    pub major: u8,
    pub minor: u8,
}

impl TableVersion {
    /// Version implemented by this host.
    pub const HOST: TableVersion = TableVersion {
        major: NP_VERSION_MAJOR,
        minor: NP_VERSION_MINOR,
    };

    pub fn from_packed(packed: u16) -> Self {
        Self {
            major: (packed >> 8) as u8,
            minor: (packed & 0xff) as u8,
        }
    }

    pub fn packed(&self) -> u16 {
        pack_version(self.major, self.minor)
    }

    /// Semver view used for requirement matching (`major.minor.0`).
    pub fn to_semver(&self) -> Version {
        Version::new(self.major as u64, self.minor as u64, 0)
    }

    /// Whether a module reporting this version may be driven by this host.
    ///
    /// A module from a newer major generation is never accepted; within that
    /// bound the configured requirement decides.
    pub fn is_accepted_by(&self, requirement: &VersionReq) -> bool {
        self.major <= Self::HOST.major && requirement.matches(&self.to_semver())
    }
}

impl fmt::Display for TableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
