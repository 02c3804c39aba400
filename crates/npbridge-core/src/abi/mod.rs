//! # Legacy Plugin ABI
//!
//! Binary-compatible definitions of everything that crosses the boundary
//! between the host and a legacy module:
//!
//! - **[`types`]**: status and reason codes, variable identifiers, and the
//!   per-instance, stream, byte-range, window and saved-data records.
//! - **[`tables`]**: the module table ([`NPPluginFuncs`]) the module fills in,
//!   the host table ([`NPNetscapeFuncs`]) handed to every module, and the
//!   signatures and names of the exported entry points.
//! - **[`version`]**: the version pair both tables carry.
//!
//! Nothing here has behavior beyond trivial accessors. The layout of both
//! tables is pinned by the tests in this module.
pub mod tables;
pub mod types;
pub mod version;

pub use tables::{NPNetscapeFuncs, NPPluginFuncs, NP_VERSION_MAJOR, NP_VERSION_MINOR};
pub use types::{NPBool, NPError, NPNVariable, NPPVariable, NPReason, NPStream, NPP, NPP_t};
pub use version::TableVersion;
