//! # Host Callbacks
//!
//! The process-wide half of the adapter:
//!
//! - **[`CallbackTable`]**: the single host function table every module
//!   receives in `NP_Initialize`. Built on first use, immutable afterwards.
//! - **[`SharedServices`]**: the host services the trampolines forward to,
//!   taken from the first [`BrowserServices`](crate::host::BrowserServices)
//!   bundle the process sees.
//! - **`trampolines`**: the `extern "C"` functions in the table's slots.
//!
//! Both singletons are initialized race-free and are never torn down.
pub mod services;
pub mod table;
pub mod trampolines;

pub use services::{active_config, SharedServices};
pub use table::CallbackTable;
pub use trampolines::np_get_java_class;
