use std::ffi::{CStr, CString};
use std::os::raw::c_char;

// Core modules
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::{ChatLinkConfig, PollingConfig, SocketConfig};
pub use context::SessionContext;
pub use error::{Error, ErrorCode, Result};
pub use supervisor::{ConnectionSupervisor, Subscription};
pub use transport::{BackoffPolicy, PollSource, PollingState, PollingTransport};
pub use types::{
    ConnectionStatus, DomainEvent, EventKind, Message, MessageDraft, Notification, PollingHealth,
    PresenceStatus, SessionCredential,
};

// Library version information
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;
pub const VERSION_STRING: &str = concat!(env!("CARGO_PKG_VERSION"), " (libchatlink)");

/// Borrow a C string argument, recording the error on failure
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::null_pointer());
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| Error::invalid_utf8())
}

/// Like [`str_arg`], but NULL maps to `None`
unsafe fn opt_str_arg<'a>(ptr: *const c_char) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        str_arg(ptr).map(Some)
    }
}

/// Store `error` as the last error and return its code
fn fail(error: Error) -> ErrorCode {
    let code = error.code;
    error::set_last_error(error);
    code
}

/// Serialize to a caller-owned C string; NULL (with last error) on failure
fn to_c_json<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(c_string) => c_string.into_raw(),
            Err(_) => {
                error::set_last_error(Error::new(ErrorCode::OutOfMemory, "Failed to allocate string"));
                std::ptr::null_mut()
            }
        },
        Err(e) => {
            error::set_last_error(Error::new(ErrorCode::Unknown, format!("Failed to serialize: {e}")));
            std::ptr::null_mut()
        }
    }
}

/// FFI function: Free a string allocated by this library
#[no_mangle]
pub extern "C" fn chatlink_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

// ============================================================================
// Library Initialization Pattern
// ============================================================================

/// FFI function: Initialize the library
/// Installs logging and starts the runtime; call once before anything else
#[no_mangle]
pub extern "C" fn chatlink_init() -> ErrorCode {
    error::clear_last_error();
    logging::init();

    match runtime::init_runtime() {
        Ok(()) => ErrorCode::Success,
        Err(e) => fail(e),
    }
}

/// FFI function: Cleanup the library
/// Destroy every supervisor before calling this
#[no_mangle]
pub extern "C" fn chatlink_cleanup() {
    error::clear_last_error();
    runtime::shutdown_runtime();
}

// ============================================================================
// Version Information
// ============================================================================

/// FFI function: Get the library version string
/// Returns a static string, do NOT free this pointer
#[no_mangle]
pub extern "C" fn chatlink_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), " (libchatlink)\0").as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn chatlink_version_major() -> u32 {
    VERSION_MAJOR
}

#[no_mangle]
pub extern "C" fn chatlink_version_minor() -> u32 {
    VERSION_MINOR
}

#[no_mangle]
pub extern "C" fn chatlink_version_patch() -> u32 {
    VERSION_PATCH
}

// ============================================================================
// Error Handling FFI
// ============================================================================

/// FFI function: Get the error code of the last error
/// Returns ErrorCode::Success (0) if no error has occurred
#[no_mangle]
pub extern "C" fn chatlink_last_error_code() -> ErrorCode {
    error::get_last_error()
        .map(|e| e.code)
        .unwrap_or(ErrorCode::Success)
}

/// FFI function: Get the error message of the last error
/// Returns a string that must be freed with chatlink_free_string(), or NULL
#[no_mangle]
pub extern "C" fn chatlink_last_error_message() -> *mut c_char {
    let error = match error::get_last_error() {
        Some(e) => e,
        None => return std::ptr::null_mut(),
    };

    match CString::new(error.message) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// FFI function: Get a human-readable description of an error code
/// Returns a static string, do NOT free this pointer
#[no_mangle]
pub extern "C" fn chatlink_error_code_string(code: ErrorCode) -> *const c_char {
    let s = match code {
        ErrorCode::Success => "Success\0",
        ErrorCode::Unknown => "Unknown error\0",
        ErrorCode::InvalidArgument => "Invalid argument\0",
        ErrorCode::NullPointer => "Null pointer\0",
        ErrorCode::OutOfMemory => "Out of memory\0",
        ErrorCode::InvalidUtf8 => "Invalid UTF-8 string\0",
        ErrorCode::NetworkError => "Network error\0",
        ErrorCode::AuthenticationFailed => "Authentication failed\0",
        ErrorCode::NotFound => "Not found\0",
        ErrorCode::PermissionDenied => "Permission denied\0",
        ErrorCode::Timeout => "Timeout\0",
        ErrorCode::InvalidState => "Invalid state\0",
        ErrorCode::Protocol => "Malformed payload\0",
        ErrorCode::RateLimited => "Rate limit exceeded\0",
    };
    s.as_ptr() as *const c_char
}

/// FFI function: Clear the last error
#[no_mangle]
pub extern "C" fn chatlink_clear_error() {
    error::clear_last_error();
}

// ============================================================================
// Opaque Handle Pattern - Supervisor
// ============================================================================

/// Supervisor plus the subscription drained by `chatlink_poll_notification`
pub struct FfiSupervisor {
    supervisor: ConnectionSupervisor,
    subscription: Subscription,
}

/// Opaque handle to a supervisor
pub type SupervisorHandle = *mut FfiSupervisor;

/// FFI function: Create a supervisor
/// `config_json` may be NULL for defaults. A NULL or blank `user_id`/`token`
/// creates a supervisor without credential, which stays disconnected.
/// The handle must be freed with chatlink_supervisor_destroy()
/// Returns NULL on error
#[no_mangle]
pub extern "C" fn chatlink_supervisor_create(
    config_json: *const c_char,
    user_id: *const c_char,
    token: *const c_char,
) -> SupervisorHandle {
    error::clear_last_error();

    let build = || -> Result<FfiSupervisor> {
        let (config_json, user_id, token) =
            unsafe { (opt_str_arg(config_json)?, opt_str_arg(user_id)?, opt_str_arg(token)?) };
        let config = match config_json {
            Some(json) => ChatLinkConfig::from_json(json)?,
            None => ChatLinkConfig::default(),
        };
        let mut context = SessionContext::new(config)?;
        if let (Some(user_id), Some(token)) = (user_id, token) {
            if let Some(credential) = SessionCredential::new(user_id, token) {
                context = context.with_credential(credential);
            }
        }
        let supervisor = ConnectionSupervisor::new(context);
        let subscription = supervisor.subscribe();
        Ok(FfiSupervisor {
            supervisor,
            subscription,
        })
    };

    match build() {
        Ok(ffi) => Box::into_raw(Box::new(ffi)),
        Err(e) => {
            fail(e);
            std::ptr::null_mut()
        }
    }
}

/// FFI function: Start transport activity
/// Requires chatlink_init(); a supervisor without credential stays disconnected
#[no_mangle]
pub extern "C" fn chatlink_supervisor_start(handle: SupervisorHandle) -> ErrorCode {
    error::clear_last_error();

    if handle.is_null() {
        return fail(Error::null_pointer());
    }
    let ffi = unsafe { &mut *handle };

    let rt = match runtime::handle() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };
    let _guard = rt.enter();
    match ffi.supervisor.start() {
        Ok(()) => ErrorCode::Success,
        Err(e) => fail(e),
    }
}

/// FFI function: Get the connection status
/// Returns Disconnected for a NULL handle
#[no_mangle]
pub extern "C" fn chatlink_supervisor_status(handle: SupervisorHandle) -> ConnectionStatus {
    if handle.is_null() {
        error::set_last_error(Error::null_pointer());
        return ConnectionStatus::Disconnected;
    }
    let ffi = unsafe { &*handle };
    ffi.supervisor.status()
}

/// FFI function: Check if the socket is connected
/// Returns 1 if connected, 0 if not (or on NULL handle)
#[no_mangle]
pub extern "C" fn chatlink_supervisor_is_connected(handle: SupervisorHandle) -> i32 {
    if handle.is_null() {
        return 0;
    }
    let ffi = unsafe { &*handle };
    ffi.supervisor.is_connected() as i32
}

/// FFI function: Take the next notification
/// Returns a JSON string `{"type": ..., "data": ...}` that must be freed with
/// chatlink_free_string(), or NULL when none is queued
#[no_mangle]
pub extern "C" fn chatlink_supervisor_poll_notification(handle: SupervisorHandle) -> *mut c_char {
    error::clear_last_error();

    if handle.is_null() {
        error::set_last_error(Error::null_pointer());
        return std::ptr::null_mut();
    }
    let ffi = unsafe { &mut *handle };

    match ffi.subscription.try_recv() {
        Some(notification) => to_c_json(&notification),
        None => std::ptr::null_mut(),
    }
}

/// Run a command taking one room id; 1 if accepted, 0 otherwise
fn room_command(
    handle: SupervisorHandle,
    room_id: *const c_char,
    command: impl FnOnce(&ConnectionSupervisor, &str) -> bool,
) -> i32 {
    error::clear_last_error();

    if handle.is_null() {
        error::set_last_error(Error::null_pointer());
        return 0;
    }
    let room_id = match unsafe { str_arg(room_id) } {
        Ok(room_id) => room_id,
        Err(e) => {
            fail(e);
            return 0;
        }
    };
    let ffi = unsafe { &*handle };
    command(&ffi.supervisor, room_id) as i32
}

/// FFI function: Join a room
/// Returns 1 if the command was accepted, 0 otherwise
#[no_mangle]
pub extern "C" fn chatlink_supervisor_join_room(handle: SupervisorHandle, room_id: *const c_char) -> i32 {
    room_command(handle, room_id, |supervisor, room_id| supervisor.join_room(room_id))
}

/// FFI function: Leave a room
/// Returns 1 if the command was accepted, 0 otherwise
#[no_mangle]
pub extern "C" fn chatlink_supervisor_leave_room(handle: SupervisorHandle, room_id: *const c_char) -> i32 {
    room_command(handle, room_id, |supervisor, room_id| supervisor.leave_room(room_id))
}

/// FFI function: Send a message
/// `reply_to` may be NULL
/// Returns 1 if the command was accepted, 0 otherwise
#[no_mangle]
pub extern "C" fn chatlink_supervisor_send_message(
    handle: SupervisorHandle,
    room_id: *const c_char,
    body: *const c_char,
    reply_to: *const c_char,
) -> i32 {
    let args = unsafe { str_arg(body).and_then(|body| Ok((body, opt_str_arg(reply_to)?))) };
    let (body, reply_to) = match args {
        Ok(args) => args,
        Err(e) => {
            fail(e);
            return 0;
        }
    };
    room_command(handle, room_id, |supervisor, room_id| {
        let mut draft = MessageDraft::new(body);
        if let Some(reply_to) = reply_to {
            draft = draft.replying_to(reply_to);
        }
        supervisor.send_message(room_id, draft)
    })
}

/// FFI function: Send a typing indicator
/// Returns 1 if the command was accepted, 0 otherwise
#[no_mangle]
pub extern "C" fn chatlink_supervisor_send_typing(
    handle: SupervisorHandle,
    room_id: *const c_char,
    is_typing: i32,
) -> i32 {
    room_command(handle, room_id, |supervisor, room_id| {
        supervisor.send_typing(room_id, is_typing != 0)
    })
}

/// FFI function: Mark a message as read
/// Returns 1 if the command was accepted, 0 otherwise
#[no_mangle]
pub extern "C" fn chatlink_supervisor_mark_read(
    handle: SupervisorHandle,
    room_id: *const c_char,
    message_id: *const c_char,
) -> i32 {
    let message_id = match unsafe { str_arg(message_id) } {
        Ok(message_id) => message_id,
        Err(e) => {
            fail(e);
            return 0;
        }
    };
    room_command(handle, room_id, |supervisor, room_id| {
        supervisor.mark_read(room_id, message_id)
    })
}

/// FFI function: Tell the supervisor whether the host is in the foreground
#[no_mangle]
pub extern "C" fn chatlink_supervisor_set_active(handle: SupervisorHandle, is_foreground: i32) -> ErrorCode {
    error::clear_last_error();

    if handle.is_null() {
        return fail(Error::null_pointer());
    }
    let ffi = unsafe { &mut *handle };
    ffi.supervisor.set_active(is_foreground != 0);
    ErrorCode::Success
}

/// FFI function: Drop the socket and connect again
#[no_mangle]
pub extern "C" fn chatlink_supervisor_force_reconnect(handle: SupervisorHandle) -> ErrorCode {
    error::clear_last_error();

    if handle.is_null() {
        return fail(Error::null_pointer());
    }
    let ffi = unsafe { &mut *handle };

    let rt = match runtime::handle() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };
    let _guard = rt.enter();
    match ffi.supervisor.force_reconnect() {
        Ok(()) => ErrorCode::Success,
        Err(e) => fail(e),
    }
}

/// FFI function: Replace the session credential
/// A started supervisor reconnects with the new credential
#[no_mangle]
pub extern "C" fn chatlink_supervisor_set_credential(
    handle: SupervisorHandle,
    user_id: *const c_char,
    token: *const c_char,
) -> ErrorCode {
    error::clear_last_error();

    if handle.is_null() {
        return fail(Error::null_pointer());
    }
    let (user_id, token) = match unsafe { str_arg(user_id).and_then(|u| Ok((u, str_arg(token)?))) } {
        Ok(args) => args,
        Err(e) => return fail(e),
    };
    let Some(credential) = SessionCredential::new(user_id, token) else {
        return fail(Error::invalid_argument("user_id and token must not be blank"));
    };
    let ffi = unsafe { &mut *handle };

    let rt = match runtime::handle() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };
    let _guard = rt.enter();
    match ffi.supervisor.set_credential(Some(credential)) {
        Ok(()) => ErrorCode::Success,
        Err(e) => fail(e),
    }
}

/// FFI function: Remove the session credential and disconnect
#[no_mangle]
pub extern "C" fn chatlink_supervisor_clear_credential(handle: SupervisorHandle) -> ErrorCode {
    error::clear_last_error();

    if handle.is_null() {
        return fail(Error::null_pointer());
    }
    let ffi = unsafe { &mut *handle };
    match ffi.supervisor.set_credential(None) {
        Ok(()) => ErrorCode::Success,
        Err(e) => fail(e),
    }
}

/// FFI function: Shut down and free a supervisor
/// After calling this, the handle is invalid and must not be used
#[no_mangle]
pub extern "C" fn chatlink_supervisor_destroy(handle: SupervisorHandle) {
    if !handle.is_null() {
        unsafe {
            let mut ffi = Box::from_raw(handle);
            ffi.supervisor.shutdown();
        }
    }
}
