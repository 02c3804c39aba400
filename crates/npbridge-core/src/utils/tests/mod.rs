pub mod ffi_tests;
