//! C string conversions
//!
//! Strings passed in are borrowed for the duration of the call. Strings passed
//! out are allocated here and must be released with `boxlink_free_string`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Borrow a host string. Null and non-UTF-8 input both read as `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for `'a`.
pub unsafe fn borrow<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(text) => Some(text),
        Err(err) => {
            log::warn!("ignoring non UTF-8 argument: {}", err);
            None
        }
    }
}

/// Hand a string to the host. Interior NULs are dropped.
pub fn into_raw(text: impl Into<String>) -> *mut c_char {
    let mut bytes = text.into().into_bytes();
    bytes.retain(|b| *b != 0);
    match CString::new(bytes) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Take back a string produced by [`into_raw`]
///
/// # Safety
///
/// `ptr` must be null or come from [`into_raw`] and not have been freed.
pub unsafe fn release(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}
