//! FFI bindings for MoodSnap core
//!
//! This module provides C-compatible functions for embedding the analytics
//! pipeline in the mobile app. All functions use C strings (null-terminated)
//! and return allocated memory that must be freed by the caller using
//! `moodsnap_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::AnalyticsConfig;
use crate::pipeline::process_record_json;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Parse an optional config; NULL selects the defaults
unsafe fn config_from_ptr(config_json: *const c_char) -> Result<AnalyticsConfig, String> {
    if config_json.is_null() {
        return Ok(AnalyticsConfig::default());
    }
    let json = cstr_to_string(config_json).ok_or("Invalid config string")?;
    AnalyticsConfig::from_json(&json).map_err(|e| e.to_string())
}

// ============================================================================
// Processing
// ============================================================================

/// Process a store record JSON and return ProcessedData JSON.
///
/// # Safety
/// - `record_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL for the
///   default configuration.
/// - Returns a newly allocated string that must be freed with `moodsnap_free_string`.
/// - Returns NULL on error; call `moodsnap_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn moodsnap_process_record(
    record_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let record = match cstr_to_string(record_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return ptr::null_mut();
        }
    };

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    match process_record_json(&record, &config) {
        Ok(processed) => string_to_cstr(&processed),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Default analytics configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `moodsnap_free_string`.
#[no_mangle]
pub unsafe extern "C" fn moodsnap_default_config() -> *mut c_char {
    clear_last_error();

    match AnalyticsConfig::default().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by MoodSnap functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a MoodSnap function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn moodsnap_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next MoodSnap call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn moodsnap_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn moodsnap_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StoreRecord;
    use crate::types::{MoodLevels, MoodSnapshot, ProcessedData};
    use chrono::{TimeZone, Utc};

    fn sample_record_json() -> CString {
        let mut record = StoreRecord::fresh();
        record.mood_snapshots = (1..=3)
            .map(|d| {
                let ts = Utc.with_ymd_and_hms(2024, 1, d, 20, 0, 0).unwrap();
                let mut snap = MoodSnapshot::mood(ts, MoodLevels::new(2.0, 1.0, 0.0, 3.0));
                snap.notes = "slept badly #insomnia".to_string();
                snap
            })
            .collect();
        CString::new(record.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_ffi_process_record() {
        let json = sample_record_json();

        unsafe {
            let result = moodsnap_process_record(json.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let processed: ProcessedData = serde_json::from_str(result_str).unwrap();
            assert_eq!(processed.dates.len(), 3);
            assert_eq!(processed.hashtag_list, vec!["#insomnia".to_string()]);

            moodsnap_free_string(result);
        }
    }

    #[test]
    fn test_ffi_custom_config() {
        let json = sample_record_json();
        let config = CString::new(r#"{"short_window": 2}"#).unwrap();

        unsafe {
            let result = moodsnap_process_record(json.as_ptr(), config.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let processed: ProcessedData = serde_json::from_str(result_str).unwrap();
            assert_eq!(processed.hashtag_butterfly[0].elevation.len(), 5);

            moodsnap_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = moodsnap_process_record(invalid_json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = moodsnap_last_error();
            assert!(!error.is_null());
            assert!(!CStr::from_ptr(error).to_str().unwrap().is_empty());

            let bad_config = CString::new(r#"{"long_window": 0}"#).unwrap();
            let json = sample_record_json();
            let result = moodsnap_process_record(json.as_ptr(), bad_config.as_ptr());
            assert!(result.is_null());
            assert!(!moodsnap_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_oversized_window_is_an_error() {
        let json = sample_record_json();
        for config in [
            r#"{"sliding_average_window": 18446744073709551615}"#,
            r#"{"menstrual_window": 9223372036854775808}"#,
        ] {
            let config = CString::new(config).unwrap();
            unsafe {
                let result = moodsnap_process_record(json.as_ptr(), config.as_ptr());
                assert!(result.is_null());
                let error = CStr::from_ptr(moodsnap_last_error()).to_str().unwrap();
                assert!(error.contains("exceeds"), "{error}");
            }
        }
    }

    #[test]
    fn test_ffi_default_config_and_version() {
        unsafe {
            let config = moodsnap_default_config();
            assert!(!config.is_null());
            let config_str = CStr::from_ptr(config).to_str().unwrap();
            let parsed = AnalyticsConfig::from_json(config_str).unwrap();
            assert_eq!(parsed, AnalyticsConfig::default());
            moodsnap_free_string(config);

            let version = moodsnap_version();
            assert!(!CStr::from_ptr(version).to_str().unwrap().is_empty());
        }
    }
}
