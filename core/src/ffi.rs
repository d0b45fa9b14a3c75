//! C FFI exports for cross-platform integration
//!
//! This module exposes the repository contract to the mobile shells:
//! - Android via JNI
//! - iOS via Swift/Objective-C FFI
//!
//! Results cross the boundary as JSON strings with camelCase field names.
//! Point lookups that find nothing produce `null`. The bridge owns a
//! current-thread tokio runtime and blocks on each call.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::runtime::Runtime;

use crate::{init, ClientConfig, DictHandle, EntryRepository, Error, RegionRepository, Result};

/// Repositories plus the runtime that drives them
struct Bridge {
    runtime: Runtime,
    handle: DictHandle,
}

/// Global bridge storage for FFI
static BRIDGE: Mutex<Option<Arc<Bridge>>> = Mutex::new(None);

/// Error codes returned by FFI functions
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiError {
    /// Operation succeeded
    Success = 0,
    /// Null pointer passed as argument
    NullPointer = 1,
    /// Invalid UTF-8 string
    InvalidUtf8 = 2,
    /// Client initialization failed
    InitFailed = 3,
    /// Client not initialized
    NotInitialized = 4,
    /// No response and no cached data to fall back on
    NetworkUnavailable = 5,
    /// Any other request failure
    RequestFailed = 6,
    /// JSON serialization failed
    JsonFailed = 7,
}

impl From<&Error> for FfiError {
    fn from(err: &Error) -> Self {
        match err {
            e if e.is_network() => FfiError::NetworkUnavailable,
            Error::Json(_) => FfiError::JsonFailed,
            Error::NotInitialized => FfiError::NotInitialized,
            _ => FfiError::RequestFailed,
        }
    }
}

fn open_bridge(base_url: &str) -> Result<Bridge> {
    let config = ClientConfig::from_env()?.with_base_url(base_url);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    Ok(Bridge {
        runtime,
        handle: init(&config)?,
    })
}

fn install(base_url: &str) -> FfiError {
    match open_bridge(base_url) {
        Ok(bridge) => {
            let mut guard = BRIDGE.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = Some(Arc::new(bridge));
            log::info!("Dictionary client initialized for {base_url}");
            FfiError::Success
        }
        Err(e) => {
            log::error!("Failed to initialize dictionary client: {}", e);
            FfiError::InitFailed
        }
    }
}

/// Run `op` against the current bridge and serialize its result
fn call<T, F>(op: F) -> std::result::Result<String, FfiError>
where
    T: Serialize,
    F: FnOnce(&Bridge) -> Result<T>,
{
    // clone the Arc so the lock is not held while blocking on the network
    let bridge = BRIDGE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(FfiError::NotInitialized)?;

    let value = op(&bridge).map_err(|e| {
        log::error!("Dictionary request failed: {}", e);
        FfiError::from(&e)
    })?;
    serde_json::to_string(&value).map_err(|_| FfiError::JsonFailed)
}

fn all_entries(bridge: &Bridge) -> Result<Vec<crate::DictionaryEntry>> {
    let entries = bridge.runtime.block_on(bridge.handle.entries.get_all())?;
    Ok(entries.to_vec())
}

fn entry_by_id(bridge: &Bridge, id: &str) -> Result<Option<crate::DictionaryEntry>> {
    bridge.runtime.block_on(bridge.handle.entries.get_by_id(id))
}

fn entries_by_region(bridge: &Bridge, region_id: &str) -> Result<Vec<crate::DictionaryEntry>> {
    let entries = bridge
        .runtime
        .block_on(bridge.handle.entries.get_by_region(region_id))?;
    Ok(entries.to_vec())
}

fn search_entries(bridge: &Bridge, keyword: &str) -> Result<Vec<crate::DictionaryEntry>> {
    bridge.runtime.block_on(bridge.handle.entries.search(keyword))
}

fn all_regions(bridge: &Bridge) -> Result<Vec<crate::Region>> {
    let regions = bridge.runtime.block_on(bridge.handle.regions.get_all())?;
    Ok(regions.to_vec())
}

fn region_by_id(bridge: &Bridge, id: &str) -> Result<Option<crate::Region>> {
    bridge.runtime.block_on(bridge.handle.regions.get_by_id(id))
}

/// Read a C string argument
///
/// # Safety
///
/// `ptr` must be null or a valid null-terminated C string.
unsafe fn read_arg<'a>(ptr: *const c_char) -> std::result::Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| FfiError::InvalidUtf8)
}

/// Store `result` in `*out_json` and return its code
///
/// # Safety
///
/// `out_json` must be a valid, non-null pointer.
unsafe fn write_out(out_json: *mut *mut c_char, result: std::result::Result<String, FfiError>) -> c_int {
    let json = match result {
        Ok(json) => json,
        Err(code) => return code as c_int,
    };

    match CString::new(json) {
        Ok(c_string) => {
            *out_json = c_string.into_raw();
            FfiError::Success as c_int
        }
        Err(_) => FfiError::JsonFailed as c_int,
    }
}

/// Initialize the dictionary client
///
/// Other settings are read from `DICT_*` environment variables.
///
/// # Safety
///
/// `base_url` must be a valid null-terminated C string.
///
/// # Returns
///
/// 0 on success, non-zero error code on failure.
#[no_mangle]
pub unsafe extern "C" fn dict_init(base_url: *const c_char) -> c_int {
    match read_arg(base_url) {
        Ok(base_url) => install(base_url) as c_int,
        Err(code) => code as c_int,
    }
}

/// Get all dictionary entries
///
/// # Safety
///
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
///
/// # Returns
///
/// 0 on success, non-zero error code on failure.
/// On success, `*out_json` will be set to a JSON array of entries.
#[no_mangle]
pub unsafe extern "C" fn dict_entries_all(out_json: *mut *mut c_char) -> c_int {
    if out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    write_out(out_json, call(all_entries))
}

/// Get one dictionary entry by id
///
/// # Safety
///
/// - `id` must be a valid null-terminated C string
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
///
/// # Returns
///
/// 0 on success. If the entry does not exist, `*out_json` is set to "null".
#[no_mangle]
pub unsafe extern "C" fn dict_entry_by_id(id: *const c_char, out_json: *mut *mut c_char) -> c_int {
    if out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    let id = match read_arg(id) {
        Ok(id) => id,
        Err(code) => return code as c_int,
    };
    write_out(out_json, call(|bridge| entry_by_id(bridge, id)))
}

/// Get the entries of one region
///
/// # Safety
///
/// - `region_id` must be a valid null-terminated C string
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
#[no_mangle]
pub unsafe extern "C" fn dict_entries_by_region(
    region_id: *const c_char,
    out_json: *mut *mut c_char,
) -> c_int {
    if out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    let region_id = match read_arg(region_id) {
        Ok(id) => id,
        Err(code) => return code as c_int,
    };
    write_out(out_json, call(|bridge| entries_by_region(bridge, region_id)))
}

/// Search entries by keyword
///
/// # Safety
///
/// - `query` must be a valid null-terminated C string
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
///
/// # Returns
///
/// 0 on success, non-zero error code on failure.
/// On success, `*out_json` will be set to a JSON array of matching entries.
#[no_mangle]
pub unsafe extern "C" fn dict_search(query: *const c_char, out_json: *mut *mut c_char) -> c_int {
    if query.is_null() || out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    let query = match read_arg(query) {
        Ok(query) => query,
        Err(code) => return code as c_int,
    };
    write_out(out_json, call(|bridge| search_entries(bridge, query)))
}

/// Get all regions
///
/// # Safety
///
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
#[no_mangle]
pub unsafe extern "C" fn dict_regions_all(out_json: *mut *mut c_char) -> c_int {
    if out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    write_out(out_json, call(all_regions))
}

/// Get one region by id
///
/// # Safety
///
/// - `id` must be a valid null-terminated C string
/// - `out_json` must be a valid pointer to store the result
/// - The caller is responsible for freeing the returned string with `dict_free_string`
///
/// # Returns
///
/// 0 on success. If the region does not exist, `*out_json` is set to "null".
#[no_mangle]
pub unsafe extern "C" fn dict_region_by_id(id: *const c_char, out_json: *mut *mut c_char) -> c_int {
    if out_json.is_null() {
        return FfiError::NullPointer as c_int;
    }
    let id = match read_arg(id) {
        Ok(id) => id,
        Err(code) => return code as c_int,
    };
    write_out(out_json, call(|bridge| region_by_id(bridge, id)))
}

/// Drop every cache so the next call goes to the network
#[no_mangle]
pub extern "C" fn dict_clear_cache() -> c_int {
    match call(|bridge| {
        bridge.handle.clear_all();
        Ok(())
    }) {
        Ok(_) => FfiError::Success as c_int,
        Err(code) => code as c_int,
    }
}

/// Free a string returned by a dict_* function
///
/// # Safety
///
/// `ptr` must be a pointer returned by a dict_* function, or null.
#[no_mangle]
pub unsafe extern "C" fn dict_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Close the client and free resources
///
/// # Returns
///
/// 0 on success.
#[no_mangle]
pub extern "C" fn dict_close() -> c_int {
    let mut guard = BRIDGE.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = None;
    FfiError::Success as c_int
}

/// Get the library version
///
/// # Safety
///
/// Returns a pointer to a static string. Do not free this pointer.
#[no_mangle]
pub extern "C" fn dict_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// JNI bindings for Android
// ============================================================================

#[cfg(target_os = "android")]
mod android {
    use std::ptr;

    use jni::objects::{JClass, JString};
    use jni::sys::{jint, jstring};
    use jni::JNIEnv;

    use super::*;

    fn read_jstring(env: &mut JNIEnv, value: &JString) -> Option<String> {
        env.get_string(value).ok().map(Into::into)
    }

    fn to_jstring(env: &mut JNIEnv, result: std::result::Result<String, FfiError>) -> jstring {
        let Ok(json) = result else {
            return ptr::null_mut();
        };
        match env.new_string(&json) {
            Ok(s) => s.into_raw(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// JNI: Initialize the client
    ///
    /// Kotlin signature: external fun init(baseUrl: String): Int
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_init(
        mut env: JNIEnv,
        _class: JClass,
        base_url: JString,
    ) -> jint {
        match read_jstring(&mut env, &base_url) {
            Some(base_url) => install(&base_url) as jint,
            None => FfiError::InvalidUtf8 as jint,
        }
    }

    /// JNI: All entries
    ///
    /// Kotlin signature: external fun entries(): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_entries(
        mut env: JNIEnv,
        _class: JClass,
    ) -> jstring {
        let result = call(all_entries);
        to_jstring(&mut env, result)
    }

    /// JNI: Entry by id
    ///
    /// Kotlin signature: external fun entry(id: String): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_entry(
        mut env: JNIEnv,
        _class: JClass,
        id: JString,
    ) -> jstring {
        let Some(id) = read_jstring(&mut env, &id) else {
            return ptr::null_mut();
        };
        let result = call(|bridge| entry_by_id(bridge, &id));
        to_jstring(&mut env, result)
    }

    /// JNI: Entries of a region
    ///
    /// Kotlin signature: external fun entriesByRegion(regionId: String): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_entriesByRegion(
        mut env: JNIEnv,
        _class: JClass,
        region_id: JString,
    ) -> jstring {
        let Some(region_id) = read_jstring(&mut env, &region_id) else {
            return ptr::null_mut();
        };
        let result = call(|bridge| entries_by_region(bridge, &region_id));
        to_jstring(&mut env, result)
    }

    /// JNI: Search entries
    ///
    /// Kotlin signature: external fun search(query: String): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_search(
        mut env: JNIEnv,
        _class: JClass,
        query: JString,
    ) -> jstring {
        let Some(query) = read_jstring(&mut env, &query) else {
            return ptr::null_mut();
        };
        let result = call(|bridge| search_entries(bridge, &query));
        to_jstring(&mut env, result)
    }

    /// JNI: All regions
    ///
    /// Kotlin signature: external fun regions(): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_regions(
        mut env: JNIEnv,
        _class: JClass,
    ) -> jstring {
        let result = call(all_regions);
        to_jstring(&mut env, result)
    }

    /// JNI: Region by id
    ///
    /// Kotlin signature: external fun region(id: String): String?
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_region(
        mut env: JNIEnv,
        _class: JClass,
        id: JString,
    ) -> jstring {
        let Some(id) = read_jstring(&mut env, &id) else {
            return ptr::null_mut();
        };
        let result = call(|bridge| region_by_id(bridge, &id));
        to_jstring(&mut env, result)
    }

    /// JNI: Drop every cache
    ///
    /// Kotlin signature: external fun clearCache(): Int
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_clearCache(
        _env: JNIEnv,
        _class: JClass,
    ) -> jint {
        dict_clear_cache() as jint
    }

    /// JNI: Close the client
    ///
    /// Kotlin signature: external fun close()
    #[no_mangle]
    pub extern "system" fn Java_org_example_regionaldict_DictCore_close(_env: JNIEnv, _class: JClass) {
        dict_close();
    }

    /// Called when the native library is loaded by System.loadLibrary()
    ///
    /// This sets up:
    /// - Android logging (so log::* macros appear in logcat)
    /// - Panic hook (to log panics before they crash the app)
    #[no_mangle]
    pub extern "system" fn JNI_OnLoad(_vm: jni::JavaVM, _reserved: *mut std::ffi::c_void) -> jint {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("RegionalDict"),
        );

        std::panic::set_hook(Box::new(|info| {
            let msg = if let Some(s) = info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown".to_string());

            log::error!("PANIC at {}: {}", location, msg);
        }));

        log::info!("RegionalDict native library loaded");

        jni::sys::JNI_VERSION_1_6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_dict_version() {
        let version = dict_version();
        let version_str = unsafe { CStr::from_ptr(version) }.to_str().unwrap();
        assert!(!version_str.is_empty());
    }

    #[test]
    fn test_null_pointer_checks() {
        let query = CString::new("river").unwrap();
        unsafe {
            assert_eq!(dict_init(ptr::null()), FfiError::NullPointer as c_int);
            assert_eq!(
                dict_search(ptr::null(), ptr::null_mut()),
                FfiError::NullPointer as c_int
            );
            assert_eq!(
                dict_search(query.as_ptr(), ptr::null_mut()),
                FfiError::NullPointer as c_int
            );
            assert_eq!(dict_entries_all(ptr::null_mut()), FfiError::NullPointer as c_int);
        }
    }

    #[test]
    fn test_not_initialized() {
        let id = CString::new("43").unwrap();
        let mut out: *mut c_char = ptr::null_mut();

        unsafe {
            dict_close();

            assert_eq!(
                dict_region_by_id(id.as_ptr(), &mut out),
                FfiError::NotInitialized as c_int
            );
            assert!(out.is_null());
        }
        assert_eq!(dict_clear_cache(), FfiError::NotInitialized as c_int);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            FfiError::from(&Error::NetworkUnavailable("refused".into())),
            FfiError::NetworkUnavailable
        );
        assert_eq!(
            FfiError::from(&Error::Status {
                status: 500,
                path: "/entries".into()
            }),
            FfiError::RequestFailed
        );
    }
}
