#![cfg(test)]

use std::ffi::CString;
use std::ptr;

use crate::abi::types::NPByteRange;
use crate::utils::ffi::{collect_ranges, lossy_cstring, opt_nonempty_from_ptr, panic_message, string_from_ptr};

#[test]
fn test_string_from_ptr() {
    let owned = CString::new("hello").unwrap();
    assert_eq!(unsafe { string_from_ptr(owned.as_ptr()) }, Some("hello".to_string()));
    assert_eq!(unsafe { string_from_ptr(ptr::null()) }, None);

    let empty = CString::new("").unwrap();
    assert_eq!(unsafe { string_from_ptr(empty.as_ptr()) }, Some(String::new()));
    assert_eq!(unsafe { opt_nonempty_from_ptr(empty.as_ptr()) }, None);
}

#[test]
fn test_lossy_cstring_strips_nul() {
    assert_eq!(lossy_cstring("a\0b").to_str().unwrap(), "ab");
}

#[test]
fn test_collect_ranges_follows_links() {
    let mut second = NPByteRange { offset: -10, length: 10, next: ptr::null_mut() };
    let first = NPByteRange { offset: 0, length: 4, next: &mut second };
    let ranges = unsafe { collect_ranges(&first) };
    assert_eq!(ranges, vec![(0, 4), (-10, 10)]);
    assert!(unsafe { collect_ranges(ptr::null()) }.is_empty());
}

#[test]
fn test_panic_message_variants() {
    let static_payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
    assert_eq!(panic_message(static_payload.as_ref()), "static message");

    let formatted = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
    assert_eq!(panic_message(formatted.as_ref()), "code 7");
}
