//! The C ABI surface over `brypt-core`. Every `extern "C"`
//! function here does three things and nothing else: validates its
//! arguments, calls into `brypt-core` (via `BryptService`), and maps the
//! result to a `ResultCode`. No business logic lives in this crate — it is
//! a translation layer, and every entry point catches panics at the
//! boundary so a bug here never unwinds into a C caller.

pub mod options;
pub mod result_code;
pub mod service;

use std::ffi::{c_char, c_void, CStr, CString};
use std::os::raw::c_uint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use brypt_core::endpoint::Endpoint;
use brypt_core::identifier::ExternalIdentifier;
use brypt_core::message::NextAction;
use brypt_core::{Destination, NodeIdentifier, Parcel, RuntimeEvent, StatusCode};

pub use options::{options_from_json, ServiceOptions};
pub use result_code::ResultCode;
pub use service::BryptService;

/// Upper bound on a route reply a `brypt_next_respond` call may carry, to
/// keep a misbehaving callback from exhausting memory on a malformed size.
pub const MAX_ROUTE_REPLY_SIZE: usize = 65_536;

/// An opaque handle returned by `brypt_service_create`. Ownership transfers
/// to the caller, which must eventually pass it to `brypt_service_destroy`.
pub struct BryptServiceHandle(Arc<BryptService>);

/// The handle a route callback (registered through
/// `brypt_service_register_route`) receives in place of a return value.
/// Only valid for the duration of the callback; call `brypt_next_respond`,
/// `brypt_next_dispatch`, or `brypt_next_defer` on it exactly once.
pub type NextHandle = brypt_core::Next;

fn guard<F: FnOnce() -> ResultCode>(f: F) -> ResultCode {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => code,
        Err(_) => ResultCode::Unspecified,
    }
}

fn result_code<T>(result: brypt_core::Result<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Success,
        Err(error) => ResultCode::from(&error),
    }
}

unsafe fn str_from_c(ptr: *const c_char) -> Option<&'static str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn bytes_from_c(ptr: *const u8, len: usize) -> Option<Vec<u8>> {
    if ptr.is_null() && len > 0 {
        return None;
    }
    Some(if len == 0 { Vec::new() } else { std::slice::from_raw_parts(ptr, len).to_vec() })
}

/// Resolves a nullable, NUL-terminated peer identifier into the real
/// `NodeIdentifier` the service has on file for it (identifiers are
/// reconstructed by lookup, not by parsing alone, since the internal handle
/// half of a `NodeIdentifier` is process-local and can't be recovered from
/// the printable string). Returns `Ok(None)` for a null pointer, meaning
/// "the whole network" to callers that accept that as a destination.
unsafe fn peer_from_c(service: &BryptService, ptr: *const c_char) -> Result<Option<NodeIdentifier>, ResultCode> {
    let Some(raw) = str_from_c(ptr) else { return Ok(None) };
    ExternalIdentifier::parse(raw).map_err(|e| ResultCode::from(&e))?;
    match service.proxies().find_by_external(raw) {
        Some(proxy) => Ok(Some(proxy.identifier().clone())),
        None => Err(ResultCode::NotFound),
    }
}

unsafe fn peers_from_c(
    service: &BryptService,
    peer_ids: *const *const c_char,
    peer_count: usize,
) -> Result<Vec<NodeIdentifier>, ResultCode> {
    if peer_ids.is_null() && peer_count > 0 {
        return Err(ResultCode::InvalidArgument);
    }
    let mut peers = Vec::with_capacity(peer_count);
    for i in 0..peer_count {
        let ptr = *peer_ids.add(i);
        match peer_from_c(service, ptr)? {
            Some(peer) => peers.push(peer),
            None => return Err(ResultCode::InvalidArgument),
        }
    }
    Ok(peers)
}

fn write_tracker_key(key: brypt_core::TrackerKey, out_tracker_key: *mut u8) {
    if !out_tracker_key.is_null() {
        unsafe { std::ptr::copy_nonoverlapping(key.as_bytes().as_ptr(), out_tracker_key, 16) };
    }
}

/// Hands a heap-allocated buffer to the caller; must be released with
/// `brypt_free_buffer`.
unsafe fn leak_buffer(bytes: Vec<u8>, out_ptr: *mut *mut u8, out_len: *mut usize) {
    let mut bytes = bytes;
    bytes.shrink_to_fit();
    *out_len = bytes.len();
    *out_ptr = if bytes.is_empty() { std::ptr::null_mut() } else { bytes.as_mut_ptr() };
    std::mem::forget(bytes);
}

/// Releases a buffer returned through an `out_ptr`/`out_len` pair by any
/// function in this crate (`brypt_service_connect`'s assigned identifier,
/// in particular).
///
/// # Safety
/// `ptr`/`len` must be exactly the pair most recently returned by such a
/// function, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn brypt_free_buffer(ptr: *mut u8, len: usize) {
    if ptr.is_null() {
        return;
    }
    drop(Vec::from_raw_parts(ptr, len, len));
}

/// An `Endpoint` that forwards every scheduled send to a host-supplied C
/// callback instead of driving a transport itself — the host owns the
/// actual socket/stream, `brypt-core` just calls back with bytes to send.
struct CallbackEndpoint {
    protocol: String,
    remote_address: String,
    send: extern "C" fn(*const u8, usize, *mut c_void),
    user_data: *mut c_void,
}

// Safety: the host guarantees `user_data` may be handed to `send` from
// whatever thread schedules a send, which may not be the thread that
// registered the endpoint.
unsafe impl Send for CallbackEndpoint {}
unsafe impl Sync for CallbackEndpoint {}

impl Endpoint for CallbackEndpoint {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn schedule_send(&self, bytes: Vec<u8>) {
        (self.send)(bytes.as_ptr(), bytes.len(), self.user_data);
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}

/// Creates a service from a JSON options blob (or defaults, if `options_json`
/// is null), returning an opaque handle through `out_handle`.
///
/// # Safety
/// `options_json`, if non-null, must be a valid NUL-terminated UTF-8 string.
/// `out_handle` must point to writable memory for one pointer.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_create(
    options_json: *const c_char,
    out_handle: *mut *mut BryptServiceHandle,
) -> ResultCode {
    guard(|| {
        if out_handle.is_null() {
            return ResultCode::InvalidArgument;
        }
        let options = match str_from_c(options_json) {
            Some(json) => match options_from_json(json) {
                Ok(options) => options,
                Err(error) => return ResultCode::from(&error),
            },
            None => ServiceOptions::default(),
        };
        let service = BryptService::create(options);
        let handle = Box::new(BryptServiceHandle(service));
        *out_handle = Box::into_raw(handle);
        ResultCode::Success
    })
}

/// # Safety
/// `handle` must be a live pointer returned by `brypt_service_create` and
/// not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_start(handle: *mut BryptServiceHandle) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        result_code(handle.0.start())
    })
}

/// # Safety
/// Same as `brypt_service_start`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_stop(handle: *mut BryptServiceHandle) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        result_code(handle.0.stop())
    })
}

/// # Safety
/// Same as `brypt_service_start`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_restart(handle: *mut BryptServiceHandle) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        result_code(handle.0.restart())
    })
}

/// Runs one scheduler tick (housekeeping: deferred peer detachment, tracker
/// sweeps). A host embeds this in its own event loop however it likes.
///
/// # Safety
/// Same as `brypt_service_start`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_tick(handle: *mut BryptServiceHandle) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        result_code(handle.0.tick())
    })
}

/// Dispatches `payload` to the network (every active peer), fire-and-forget.
///
/// # Safety
/// `handle` as above; `payload` must point to `payload_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_notify(
    handle: *mut BryptServiceHandle,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let Some(bytes) = bytes_from_c(payload, payload_len) else { return ResultCode::InvalidArgument };
        let parcel = Parcel::new(handle.0.identifier().clone(), Destination::Network, "/notify", bytes);
        result_code(handle.0.dispatch(parcel, false).map(|_| ()))
    })
}

/// Establishes an endpoint for a peer directly (no handshake is run here —
/// the host is expected to have authenticated the peer itself, or to be
/// reattaching a peer whose cipher package survives from an earlier
/// session). `peer_id`, if non-null, must be a previously-issued external
/// identifier; if null, a fresh peer identity is generated and returned
/// through `out_peer_id`/`out_peer_id_len` (release with
/// `brypt_free_buffer`). Every send scheduled to this endpoint invokes
/// `send_callback` with `user_data`.
///
/// # Safety
/// `handle` must be live. `peer_id`, if non-null, must be a valid
/// NUL-terminated UTF-8 string, as must `protocol` and `remote_address`.
/// `send_callback` must be safe to call from any thread the core schedules
/// sends on, with `user_data` valid for as long as the endpoint is
/// registered.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_connect(
    handle: *mut BryptServiceHandle,
    peer_id: *const c_char,
    protocol: *const c_char,
    remote_address: *const c_char,
    send_callback: extern "C" fn(*const u8, usize, *mut c_void),
    user_data: *mut c_void,
    out_peer_id: *mut *mut u8,
    out_peer_id_len: *mut usize,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let Some(protocol) = str_from_c(protocol) else { return ResultCode::InvalidArgument };
        let remote_address = str_from_c(remote_address).unwrap_or_default();

        let peer = match str_from_c(peer_id) {
            Some(external) => match ExternalIdentifier::parse(external) {
                Ok(external) => match handle.0.proxies().find_by_external(external.as_str()) {
                    Some(existing) => existing.identifier().clone(),
                    None => NodeIdentifier { internal: brypt_core::identifier::InternalIdentifier::generate(), external },
                },
                Err(error) => return ResultCode::from(&error),
            },
            None => NodeIdentifier::generate(),
        };

        let endpoint = Arc::new(CallbackEndpoint {
            protocol: protocol.to_string(),
            remote_address: remote_address.to_string(),
            send: send_callback,
            user_data,
        });
        let proxy = handle.0.connect(peer, protocol, endpoint);

        if !out_peer_id.is_null() && !out_peer_id_len.is_null() {
            leak_buffer(proxy.identifier().external.as_str().as_bytes().to_vec(), out_peer_id, out_peer_id_len);
        }
        ResultCode::Success
    })
}

/// # Safety
/// `handle` and `peer_id` must be valid as documented on `brypt_service_connect`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_disconnect_by_identifier(
    handle: *mut BryptServiceHandle,
    peer_id: *const c_char,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let peer = match peer_from_c(&handle.0, peer_id) {
            Ok(Some(peer)) => peer,
            Ok(None) => return ResultCode::InvalidArgument,
            Err(code) => return code,
        };
        result_code(handle.0.disconnect_by_identifier(&peer))
    })
}

/// # Safety
/// `handle`, `protocol`, `remote_address` must be valid as documented above.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_disconnect_by_address(
    handle: *mut BryptServiceHandle,
    protocol: *const c_char,
    remote_address: *const c_char,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let (Some(protocol), Some(remote_address)) = (str_from_c(protocol), str_from_c(remote_address)) else {
            return ResultCode::InvalidArgument;
        };
        result_code(handle.0.disconnect_by_address(protocol, remote_address))
    })
}

unsafe fn resolve_destination(
    handle: &BryptServiceHandle,
    peer_id: *const c_char,
) -> Result<Destination, ResultCode> {
    match peer_from_c(&handle.0, peer_id)? {
        Some(peer) => Ok(Destination::Direct(peer)),
        None => Ok(Destination::Network),
    }
}

unsafe fn resolve_cluster(
    handle: &BryptServiceHandle,
    peer_ids: *const *const c_char,
    peer_count: usize,
    sample_size: Option<usize>,
) -> Result<Destination, ResultCode> {
    let mut peers = peers_from_c(&handle.0, peer_ids, peer_count)?;
    if let Some(sample_size) = sample_size {
        peers.truncate(sample_size);
    }
    Ok(Destination::Cluster(peers))
}

unsafe fn do_dispatch(
    handle: *mut BryptServiceHandle,
    destination: Result<Destination, ResultCode>,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
    expects_reply: bool,
    out_has_tracker: *mut u8,
    out_tracker_key: *mut u8,
) -> ResultCode {
    let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
    let destination = match destination {
        Ok(destination) => destination,
        Err(code) => return code,
    };
    let Some(route) = str_from_c(route) else { return ResultCode::InvalidArgument };
    let Some(bytes) = bytes_from_c(payload, payload_len) else { return ResultCode::InvalidArgument };

    let parcel = Parcel::new(handle.0.identifier().clone(), destination, route, bytes);
    match handle.0.dispatch(parcel, expects_reply) {
        Ok(key) => {
            if !out_has_tracker.is_null() {
                *out_has_tracker = key.is_some() as u8;
            }
            if let Some(key) = key {
                write_tracker_key(key, out_tracker_key);
            }
            ResultCode::Success
        }
        Err(error) => ResultCode::from(&error),
    }
}

/// Dispatches `payload` to a single peer (or the network, if `peer_id` is
/// null), without waiting for a reply.
///
/// # Safety
/// As documented on `brypt_service_connect`; `route` must be a valid
/// NUL-terminated string; `payload` must point to `payload_len` readable
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_dispatch(
    handle: *mut BryptServiceHandle,
    peer_id: *const c_char,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_destination(handle_ref, peer_id);
        do_dispatch(handle, destination, route, payload, payload_len, false, std::ptr::null_mut(), std::ptr::null_mut())
    })
}

/// Dispatches `payload` to every peer named in `peer_ids`, without waiting
/// for a reply.
///
/// # Safety
/// As `brypt_service_dispatch`; `peer_ids` must point to `peer_count` valid
/// NUL-terminated identifier strings.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_dispatch_cluster(
    handle: *mut BryptServiceHandle,
    peer_ids: *const *const c_char,
    peer_count: usize,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_cluster(handle_ref, peer_ids, peer_count, None);
        do_dispatch(handle, destination, route, payload, payload_len, false, std::ptr::null_mut(), std::ptr::null_mut())
    })
}

/// Like `brypt_service_dispatch_cluster`, but only the first `sample_size`
/// entries of `peer_ids` are dispatched to.
///
/// # Safety
/// As `brypt_service_dispatch_cluster`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_dispatch_cluster_sample(
    handle: *mut BryptServiceHandle,
    peer_ids: *const *const c_char,
    peer_count: usize,
    sample_size: usize,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_cluster(handle_ref, peer_ids, peer_count, Some(sample_size));
        do_dispatch(handle, destination, route, payload, payload_len, false, std::ptr::null_mut(), std::ptr::null_mut())
    })
}

/// Dispatches `payload` to a single peer (or the network, if `peer_id` is
/// null) and stages a tracker over the peers actually reached. The tracker
/// key is written to `out_tracker_key` (16 bytes) iff `out_has_tracker` is
/// written non-zero.
///
/// # Safety
/// As `brypt_service_dispatch`; `out_tracker_key` must point to 16 writable
/// bytes if non-null; `out_has_tracker` must point to one writable byte if
/// non-null.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_request(
    handle: *mut BryptServiceHandle,
    peer_id: *const c_char,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
    out_has_tracker: *mut u8,
    out_tracker_key: *mut u8,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_destination(handle_ref, peer_id);
        do_dispatch(handle, destination, route, payload, payload_len, true, out_has_tracker, out_tracker_key)
    })
}

/// Like `brypt_service_request`, fanning out to every peer in `peer_ids`.
///
/// # Safety
/// As `brypt_service_request` and `brypt_service_dispatch_cluster`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_request_cluster(
    handle: *mut BryptServiceHandle,
    peer_ids: *const *const c_char,
    peer_count: usize,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
    out_has_tracker: *mut u8,
    out_tracker_key: *mut u8,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_cluster(handle_ref, peer_ids, peer_count, None);
        do_dispatch(handle, destination, route, payload, payload_len, true, out_has_tracker, out_tracker_key)
    })
}

/// Like `brypt_service_request_cluster`, but only the first `sample_size`
/// entries of `peer_ids` are sent to.
///
/// # Safety
/// As `brypt_service_request_cluster`.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_request_cluster_sample(
    handle: *mut BryptServiceHandle,
    peer_ids: *const *const c_char,
    peer_count: usize,
    sample_size: usize,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
    out_has_tracker: *mut u8,
    out_tracker_key: *mut u8,
) -> ResultCode {
    guard(|| {
        let Some(handle_ref) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let destination = resolve_cluster(handle_ref, peer_ids, peer_count, Some(sample_size));
        do_dispatch(handle, destination, route, payload, payload_len, true, out_has_tracker, out_tracker_key)
    })
}

/// Routes an inbound parcel to its registered handler (if any) and carries
/// out whatever `Next` action the handler recorded on the callback's
/// `NextHandle`: a `Respond` (or an already-known `Defer` response) is
/// returned through `out_ptr`/`out_len` (release with `brypt_free_buffer`,
/// `out_has_response` written non-zero iff a payload came back); a
/// `Dispatch` is carried out directly and produces no payload here. A
/// route with no registered handler is not an error — `out_has_response` is
/// simply written zero.
///
/// # Safety
/// `handle` and `route` as above; `source_peer_id`, if non-null, must be a
/// previously-issued external identifier; `payload` must point to
/// `payload_len` readable bytes; `out_has_response` must point to one
/// writable byte if non-null.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_handle(
    handle: *mut BryptServiceHandle,
    route: *const c_char,
    source_peer_id: *const c_char,
    payload: *const u8,
    payload_len: usize,
    out_has_response: *mut u8,
    out_ptr: *mut *mut u8,
    out_len: *mut usize,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let Some(route) = str_from_c(route) else { return ResultCode::InvalidArgument };
        let Some(bytes) = bytes_from_c(payload, payload_len) else { return ResultCode::InvalidArgument };
        let source = match peer_from_c(&handle.0, source_peer_id) {
            Ok(Some(peer)) => peer,
            Ok(None) => handle.0.identifier().clone(),
            Err(code) => return code,
        };

        let parcel = Parcel::new(source, Destination::Network, route, bytes);
        let Some(action) = handle.0.handle(route, &parcel) else {
            if !out_has_response.is_null() {
                *out_has_response = 0;
            }
            return ResultCode::Success;
        };
        match handle.0.resolve_next_action(action) {
            Ok(Some(response)) => {
                if !out_has_response.is_null() {
                    *out_has_response = 1;
                }
                leak_buffer(response, out_ptr, out_len);
                ResultCode::Success
            }
            Ok(None) => {
                if !out_has_response.is_null() {
                    *out_has_response = 0;
                }
                ResultCode::Success
            }
            Err(error) => ResultCode::from(&error),
        }
    })
}

/// Registers a handler for inbound parcels addressed to `route`. `callback`
/// receives the parcel's payload, the sender's external identifier, and a
/// `NextHandle` to record a decision on (`brypt_next_respond`,
/// `brypt_next_dispatch`, or `brypt_next_defer`) before returning; any
/// decision recorded is carried out once the callback returns.
///
/// # Safety
/// `handle` and `route` as above. `callback` must be safe to call from
/// whatever thread parcels for this route are handled on, with `user_data`
/// valid for as long as the route stays registered.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_register_route(
    handle: *mut BryptServiceHandle,
    route: *const c_char,
    callback: extern "C" fn(*const u8, usize, *const c_char, *mut NextHandle, *mut c_void),
    user_data: *mut c_void,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let Some(route) = str_from_c(route) else { return ResultCode::InvalidArgument };

        struct CallbackContext {
            callback: extern "C" fn(*const u8, usize, *const c_char, *mut NextHandle, *mut c_void),
            user_data: *mut c_void,
        }
        unsafe impl Send for CallbackContext {}
        unsafe impl Sync for CallbackContext {}
        let context = CallbackContext { callback, user_data };
        handle.0.register_route(
            route.to_string(),
            Box::new(move |parcel, next| {
                let context = &context;
                let source = CString::new(parcel.source.to_string()).unwrap_or_default();
                (context.callback)(parcel.payload.as_ptr(), parcel.payload.len(), source.as_ptr(), next as *mut NextHandle, context.user_data);
            }),
        );
        ResultCode::Success
    })
}

/// Records an immediate reply on a route callback's `Next`.
///
/// # Safety
/// `next` must be the handle the current route callback invocation
/// received; `payload` must point to `payload_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn brypt_next_respond(
    next: *mut NextHandle,
    status: c_uint,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let Some(next) = next.as_mut() else { return ResultCode::InvalidArgument };
        if payload_len > MAX_ROUTE_REPLY_SIZE {
            return ResultCode::PayloadTooLarge;
        }
        let Some(bytes) = bytes_from_c(payload, payload_len) else { return ResultCode::InvalidArgument };
        next.respond(StatusCode::from_u16(status as u16), bytes);
        ResultCode::Success
    })
}

/// Records a forwarding dispatch on a route callback's `Next`: the parcel
/// is sent on to `peer_id` (or the network, if null) under `route` instead
/// of being answered directly.
///
/// # Safety
/// As `brypt_next_respond`, plus `peer_id` and `route` must be valid
/// NUL-terminated strings (`peer_id` may be null).
#[no_mangle]
pub unsafe extern "C" fn brypt_next_dispatch(
    handle: *mut BryptServiceHandle,
    next: *mut NextHandle,
    peer_id: *const c_char,
    route: *const c_char,
    payload: *const u8,
    payload_len: usize,
) -> ResultCode {
    guard(|| {
        let (Some(handle), Some(next)) = (handle.as_ref(), next.as_mut()) else { return ResultCode::InvalidArgument };
        let destination = match resolve_destination(handle, peer_id) {
            Ok(destination) => destination,
            Err(code) => return code,
        };
        let Some(route) = str_from_c(route) else { return ResultCode::InvalidArgument };
        let Some(bytes) = bytes_from_c(payload, payload_len) else { return ResultCode::InvalidArgument };
        next.dispatch(destination, route, bytes);
        ResultCode::Success
    })
}

/// Records a deferred decision on a route callback's `Next`. `response`,
/// if non-null, is a reply already known and carried immediately once this
/// parcel resumes; the tracker key `Next::defer` generates is written to
/// `out_tracker_key` (16 bytes).
///
/// # Safety
/// As `brypt_next_respond`; `notice` and `response` (if non-null) must
/// point to their declared lengths of readable bytes; `out_tracker_key`
/// must point to 16 writable bytes if non-null.
#[no_mangle]
pub unsafe extern "C" fn brypt_next_defer(
    next: *mut NextHandle,
    notice: *const u8,
    notice_len: usize,
    response: *const u8,
    response_len: usize,
    out_tracker_key: *mut u8,
) -> ResultCode {
    guard(|| {
        let Some(next) = next.as_mut() else { return ResultCode::InvalidArgument };
        let Some(notice) = bytes_from_c(notice, notice_len) else { return ResultCode::InvalidArgument };
        let response = if response.is_null() {
            None
        } else {
            match bytes_from_c(response, response_len) {
                Some(bytes) => Some(bytes),
                None => return ResultCode::InvalidArgument,
            }
        };
        let key = next.defer(notice, response);
        write_tracker_key(key, out_tracker_key);
        ResultCode::Success
    })
}

/// Destroys a service created by `brypt_service_create`, freeing its handle.
///
/// # Safety
/// `handle` must not be used again after this call.
#[no_mangle]
pub unsafe extern "C" fn brypt_service_destroy(handle: *mut BryptServiceHandle) -> ResultCode {
    guard(|| {
        if handle.is_null() {
            return ResultCode::InvalidArgument;
        }
        drop(Box::from_raw(handle));
        ResultCode::Success
    })
}

/// Spawns a background thread draining `rx` and invoking `on_event` for
/// every item until the channel closes (the service was destroyed) or the
/// caller's filter simply never matches. Shared by every `brypt_subscribe_*`
/// function so each only has to describe its own filter and payload.
fn spawn_event_listener<T, F>(mut rx: tokio::sync::broadcast::Receiver<T>, mut on_event: F)
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        runtime.block_on(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => on_event(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    });
}

struct EventCallbackContext<F> {
    callback: F,
    user_data: *mut c_void,
}
unsafe impl<F> Send for EventCallbackContext<F> {}

macro_rules! subscribe_fn {
    ($name:ident, $variant:pat => $body:expr) => {
        /// Subscribes to one `RuntimeEvent` variant; `callback` is invoked
        /// on a background thread for every matching event until the
        /// service is destroyed.
        ///
        /// # Safety
        /// `handle` must be live; `callback` must be safe to call from an
        /// arbitrary thread with `user_data` valid for the service's
        /// lifetime.
        #[no_mangle]
        pub unsafe extern "C" fn $name(
            handle: *mut BryptServiceHandle,
            callback: extern "C" fn(*const c_char, *const c_char, *mut c_void),
            user_data: *mut c_void,
        ) -> ResultCode {
            guard(|| {
                let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
                let rx = handle.0.events().subscribe();
                let context = EventCallbackContext { callback, user_data };
                spawn_event_listener(rx, move |event: RuntimeEvent| {
                    let context = &context;
                    if let $variant = event {
                        $body(context.callback, context.user_data);
                    }
                });
                ResultCode::Success
            })
        }
    };
}

fn invoke_two(callback: extern "C" fn(*const c_char, *const c_char, *mut c_void), user_data: *mut c_void, a: &str, b: &str) {
    let a = CString::new(a).unwrap_or_default();
    let b = CString::new(b).unwrap_or_default();
    callback(a.as_ptr(), b.as_ptr(), user_data);
}

subscribe_fn!(brypt_subscribe_peer_connected, RuntimeEvent::PeerConnected { peer, protocol } => (|cb, ud| invoke_two(cb, ud, &peer.to_string(), &protocol)));
subscribe_fn!(brypt_subscribe_peer_disconnected, RuntimeEvent::PeerDisconnected { peer, protocol } => (|cb, ud| invoke_two(cb, ud, &peer.to_string(), &protocol)));
subscribe_fn!(brypt_subscribe_binding_failed, RuntimeEvent::BindingFailed { protocol, reason } => (|cb, ud| invoke_two(cb, ud, &protocol, &reason)));
subscribe_fn!(brypt_subscribe_connection_failed, RuntimeEvent::ConnectionFailed { protocol, address, reason: _ } => (|cb, ud| invoke_two(cb, ud, &protocol, &address)));
subscribe_fn!(brypt_subscribe_endpoint_started, RuntimeEvent::EndpointStarted { protocol, remote_address } => (|cb, ud| invoke_two(cb, ud, &protocol, &remote_address)));
subscribe_fn!(brypt_subscribe_endpoint_stopped, RuntimeEvent::EndpointStopped { protocol, remote_address } => (|cb, ud| invoke_two(cb, ud, &protocol, &remote_address)));
subscribe_fn!(brypt_subscribe_runtime_started, RuntimeEvent::RuntimeStarted => (|cb, ud| invoke_two(cb, ud, "", "")));
subscribe_fn!(brypt_subscribe_runtime_stopped, RuntimeEvent::RuntimeStopped => (|cb, ud| invoke_two(cb, ud, "", "")));

/// Registers a callback invoked for every log record emitted by the core.
/// The callback receives the level, target, and message as NUL-terminated
/// strings, valid only for the duration of the call, on a background
/// thread spawned for the lifetime of the service.
///
/// # Safety
/// `handle` must be live; `callback` must be safe to call from an
/// arbitrary thread with `user_data` valid for the service's lifetime.
#[no_mangle]
pub unsafe extern "C" fn brypt_register_logger(
    handle: *mut BryptServiceHandle,
    callback: extern "C" fn(level: *const c_char, target: *const c_char, message: *const c_char, user_data: *mut c_void),
    user_data: *mut c_void,
) -> ResultCode {
    guard(|| {
        let Some(handle) = handle.as_ref() else { return ResultCode::InvalidArgument };
        let rx = handle.0.subscribe_logs();
        struct LogCallbackContext {
            callback: extern "C" fn(*const c_char, *const c_char, *const c_char, *mut c_void),
            user_data: *mut c_void,
        }
        unsafe impl Send for LogCallbackContext {}
        let context = LogCallbackContext { callback, user_data };
        spawn_event_listener(rx, move |record: brypt_core::log_bridge::LogRecord| {
            let context = &context;
            let level = CString::new(record.level.clone()).unwrap_or_default();
            let target = CString::new(record.target.clone()).unwrap_or_default();
            let message = CString::new(record.message.clone()).unwrap_or_default();
            (context.callback)(level.as_ptr(), target.as_ptr(), message.as_ptr(), context.user_data);
        });
        ResultCode::Success
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn create_start_tick_destroy_round_trips() {
        unsafe {
            let mut handle: *mut BryptServiceHandle = ptr::null_mut();
            assert_eq!(brypt_service_create(ptr::null(), &mut handle), ResultCode::Success);
            assert!(!handle.is_null());
            assert_eq!(brypt_service_start(handle), ResultCode::Success);
            assert_eq!(brypt_service_tick(handle), ResultCode::Success);
            assert_eq!(brypt_service_destroy(handle), ResultCode::Success);
        }
    }

    #[test]
    fn null_out_handle_is_rejected() {
        unsafe {
            assert_eq!(brypt_service_create(ptr::null(), ptr::null_mut()), ResultCode::InvalidArgument);
        }
    }

    extern "C" fn noop_send(_bytes: *const u8, _len: usize, _user_data: *mut c_void) {}

    #[test]
    fn connect_without_a_peer_id_generates_one_and_returns_it() {
        unsafe {
            let mut handle: *mut BryptServiceHandle = ptr::null_mut();
            assert_eq!(brypt_service_create(ptr::null(), &mut handle), ResultCode::Success);
            assert_eq!(brypt_service_start(handle), ResultCode::Success);

            let protocol = CString::new("tcp").unwrap();
            let address = CString::new("10.0.0.5:9000").unwrap();
            let mut out_ptr: *mut u8 = ptr::null_mut();
            let mut out_len: usize = 0;
            let code = brypt_service_connect(
                handle,
                ptr::null(),
                protocol.as_ptr(),
                address.as_ptr(),
                noop_send,
                ptr::null_mut(),
                &mut out_ptr,
                &mut out_len,
            );
            assert_eq!(code, ResultCode::Success);
            assert!(!out_ptr.is_null());
            assert!(out_len > 0);

            let identifier = String::from_utf8(std::slice::from_raw_parts(out_ptr, out_len).to_vec()).unwrap();
            brypt_free_buffer(out_ptr, out_len);

            let peer_id = CString::new(identifier).unwrap();
            assert_eq!(brypt_service_disconnect_by_identifier(handle, peer_id.as_ptr()), ResultCode::Success);
            assert_eq!(brypt_service_destroy(handle), ResultCode::Success);
        }
    }

    static ROUTE_REPLY_SEEN: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn echo_route(
        _payload: *const u8,
        _payload_len: usize,
        _source: *const c_char,
        next: *mut NextHandle,
        _user_data: *mut c_void,
    ) {
        ROUTE_REPLY_SEEN.fetch_add(1, Ordering::SeqCst);
        unsafe {
            brypt_next_respond(next, 200, ptr::null(), 0);
        }
    }

    #[test]
    fn registered_route_runs_when_a_parcel_is_handled() {
        unsafe {
            let mut handle: *mut BryptServiceHandle = ptr::null_mut();
            assert_eq!(brypt_service_create(ptr::null(), &mut handle), ResultCode::Success);
            let route = CString::new("/ping").unwrap();
            assert_eq!(brypt_service_register_route(handle, route.as_ptr(), echo_route, ptr::null_mut()), ResultCode::Success);

            let service = &(*handle).0;
            let parcel = brypt_core::Parcel::new(service.identifier().clone(), brypt_core::Destination::Network, "/ping", b"hi".to_vec());
            let action = service.handle("/ping", &parcel);
            assert!(matches!(action, Some(NextAction::Respond { .. })));
            assert_eq!(ROUTE_REPLY_SEEN.load(Ordering::SeqCst), 1);

            brypt_service_destroy(handle);
        }
    }

    #[test]
    fn handle_carries_a_respond_action_back_through_an_owned_buffer() {
        unsafe {
            let mut handle: *mut BryptServiceHandle = ptr::null_mut();
            assert_eq!(brypt_service_create(ptr::null(), &mut handle), ResultCode::Success);
            let route = CString::new("/echo").unwrap();
            assert_eq!(brypt_service_register_route(handle, route.as_ptr(), echo_route, ptr::null_mut()), ResultCode::Success);

            let mut has_response: u8 = 0;
            let mut out_ptr: *mut u8 = ptr::null_mut();
            let mut out_len: usize = 0;
            let code = brypt_service_handle(
                handle,
                route.as_ptr(),
                ptr::null(),
                b"hi".as_ptr(),
                2,
                &mut has_response,
                &mut out_ptr,
                &mut out_len,
            );
            assert_eq!(code, ResultCode::Success);
            assert_eq!(has_response, 1);
            assert_eq!(out_len, 0);
            brypt_free_buffer(out_ptr, out_len);

            brypt_service_destroy(handle);
        }
    }
}
