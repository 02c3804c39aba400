//! Small helpers shared by the trampolines and the module-facing wrappers.
pub mod ffi;
pub mod sync;

pub use ffi::{panic_message, SendPtr};
pub use sync::lock;

#[cfg(test)]
mod tests;
