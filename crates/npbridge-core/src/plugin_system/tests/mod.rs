pub mod fake_module;
pub mod support;

pub mod instance_tests;
pub mod notify_tests;
