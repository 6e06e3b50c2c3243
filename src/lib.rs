//! # Restaurant Offline Core
//!
//! Offline data layer for a restaurant reviews client: a read-through
//! snapshot cache per collection, a write-behind queue for reviews created
//! while offline, and a response cache in front of the REST backend. All
//! persistence is LMDB; when no storage is available everything degrades to
//! network-only.
//!
//! ```text
//!   render layer ──► SyncCoordinator ──► DurableStore (collections.lmdb)
//!                         │   │
//!                         │   └────────► PendingWriteQueue (outbox.lmdb)
//!                         ▼
//!                    RestBackend ──► CachingFetcher (responses.lmdb) ──► reqwest
//! ```
//!
//! ## Reads
//!
//! [`SyncCoordinator::fetch_collection`] serves the stored snapshot when it
//! is non-empty and otherwise fetches the whole collection, stores it and
//! returns it. [`SyncCoordinator::refetch`] clears and refills.
//!
//! ## Writes
//!
//! [`SyncCoordinator::submit_review`] queues the review, stores it
//! optimistically and drains the queue when online. Draining stops at the
//! first failure and keeps the rest queued in order. Going back online
//! drains and then refetches reviews.
//!
//! ## FFI Functions
//!
//! The C ABI mirrors the coordinator; every call returns an [`AppResponse`]
//! as a JSON C string that must be handed back to [`release_response`]:
//!
//! - [`create_core`] / [`close_core`]
//! - [`fetch_restaurants`], [`fetch_reviews`], [`fetch_restaurant_by_id`],
//!   [`fetch_reviews_by_restaurant`],
//!   [`fetch_restaurants_by_cuisine_and_neighborhood`],
//!   [`fetch_neighborhoods`], [`fetch_cuisines`]
//! - [`submit_review`], [`refetch_collection`], [`set_connectivity`],
//!   [`pending_review_count`]

pub mod app_error;
pub mod app_response;
pub mod config;
pub mod durable_store;
pub mod local_db_model;
pub mod local_db_state;
pub mod notifier;
pub mod pending_queue;
pub mod response_cache;
pub mod session;
pub mod sync_coordinator;
pub mod transport;

pub use crate::app_error::{CoreError, CoreResult};
pub use crate::app_response::AppResponse;
pub use crate::config::CoreConfig;
pub use crate::durable_store::{DurableStore, StorageCapability};
pub use crate::local_db_model::{Collection, Record, Restaurant, Review};
pub use crate::pending_queue::{DrainOutcome, PendingWriteQueue};
pub use crate::session::RestaurantSession;
pub use crate::sync_coordinator::{Connectivity, SyncCoordinator, Transition};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};

/// Opaque state behind the pointer returned by [`create_core`].
///
/// Calls are served one at a time on a current-thread runtime, so queued
/// work only advances while a call is in progress.
pub struct CoreHandle {
    runtime: tokio::runtime::Runtime,
    coordinator: SyncCoordinator,
}

impl CoreHandle {
    pub fn new(config: &CoreConfig) -> CoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CoreError::Config(format!("cannot start runtime: {e}")))?;
        let coordinator = runtime.block_on(SyncCoordinator::from_config(config));
        Ok(Self { runtime, coordinator })
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Creates the core from a JSON [`CoreConfig`] (`"{}"` for defaults).
///
/// Returns a null pointer when the pointer is null, the string is not UTF-8
/// or the configuration is invalid. Storage problems do not fail creation;
/// they degrade the core to network-only.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_core(config_json: *const c_char) -> *mut CoreHandle {
    if config_json.is_null() {
        warn!("Null config pointer passed to create_core");
        return std::ptr::null_mut();
    }

    let json = match unsafe { CStr::from_ptr(config_json).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in config parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = match CoreConfig::from_json(json) {
        Ok(config) => config,
        Err(e) => {
            warn!("❌ Rejected configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    match CoreHandle::new(&config) {
        Ok(handle) => {
            info!("✅ Core initialized against {}", config.base_url);
            Box::into_raw(Box::new(handle))
        }
        Err(e) => {
            warn!("❌ Failed to initialize core: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Releases a handle from [`create_core`]. The pointer must not be used
/// afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_core(handle: *mut CoreHandle) -> *const c_char {
    if handle.is_null() {
        let error = AppResponse::BadRequest("Null core pointer passed to close_core".to_string());
        return response_to_c_string(&error);
    }
    drop(unsafe { Box::from_raw(handle) });
    response_to_c_string(&AppResponse::success("Core closed"))
}

/// Frees a string returned by any other function of this library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn release_response(response: *const c_char) {
    if !response.is_null() {
        drop(unsafe { CString::from_raw(response as *mut c_char) });
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_restaurants(handle: *mut CoreHandle) -> *const c_char {
    with_core(handle, "fetch_restaurants", |core| {
        AppResponse::from_result(core.block_on(core.coordinator.restaurants()))
    })
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_reviews(handle: *mut CoreHandle) -> *const c_char {
    with_core(handle, "fetch_reviews", |core| {
        AppResponse::from_result(core.block_on(core.coordinator.reviews()))
    })
}

/// `id` is the raw text taken from the page URL.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_restaurant_by_id(handle: *mut CoreHandle, id: *const c_char) -> *const c_char {
    with_core(handle, "fetch_restaurant_by_id", |core| {
        let id = match c_ptr_to_string(id, "id") {
            Ok(id) => id,
            Err(error) => return error,
        };
        AppResponse::from_result(core.block_on(core.coordinator.restaurant_by_id(id)))
    })
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_reviews_by_restaurant(
    handle: *mut CoreHandle,
    restaurant_id: *const c_char,
) -> *const c_char {
    with_core(handle, "fetch_reviews_by_restaurant", |core| {
        let restaurant_id = match c_ptr_to_string(restaurant_id, "restaurant_id") {
            Ok(id) => id,
            Err(error) => return error,
        };
        AppResponse::from_result(core.block_on(core.coordinator.reviews_by_restaurant(restaurant_id)))
    })
}

/// Either argument may be `"all"`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_restaurants_by_cuisine_and_neighborhood(
    handle: *mut CoreHandle,
    cuisine: *const c_char,
    neighborhood: *const c_char,
) -> *const c_char {
    with_core(handle, "fetch_restaurants_by_cuisine_and_neighborhood", |core| {
        let cuisine = match c_ptr_to_string(cuisine, "cuisine") {
            Ok(s) => s,
            Err(error) => return error,
        };
        let neighborhood = match c_ptr_to_string(neighborhood, "neighborhood") {
            Ok(s) => s,
            Err(error) => return error,
        };
        AppResponse::from_result(core.block_on(
            core.coordinator
                .restaurants_by_cuisine_and_neighborhood(&cuisine, &neighborhood),
        ))
    })
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_neighborhoods(handle: *mut CoreHandle) -> *const c_char {
    with_core(handle, "fetch_neighborhoods", |core| {
        AppResponse::from_result(core.block_on(core.coordinator.neighborhoods()))
    })
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_cuisines(handle: *mut CoreHandle) -> *const c_char {
    with_core(handle, "fetch_cuisines", |core| {
        AppResponse::from_result(core.block_on(core.coordinator.cuisines()))
    })
}

/// Submits a review given as JSON:
///
/// ```json
/// { "restaurant_id": 3, "name": "Ana", "rating": 4, "comments": "Great" }
/// ```
///
/// Answers with the optimistic record, or the backend's copy when the
/// platform has no persistent queue.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn submit_review(handle: *mut CoreHandle, json_ptr: *const c_char) -> *const c_char {
    with_core(handle, "submit_review", |core| {
        let json = match c_ptr_to_string(json_ptr, "JSON") {
            Ok(json) => json,
            Err(error) => return error,
        };
        let review: Review = match serde_json::from_str(&json) {
            Ok(review) => review,
            Err(e) => return AppResponse::SerializationError(format!("Invalid review JSON: {e}")),
        };
        AppResponse::from_result(core.block_on(core.coordinator.submit_review(review)))
    })
}

/// Clears and refills `"restaurants"` or `"reviews"`; answers with the new
/// record count.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn refetch_collection(handle: *mut CoreHandle, name: *const c_char) -> *const c_char {
    with_core(handle, "refetch_collection", |core| {
        let name = match c_ptr_to_string(name, "collection") {
            Ok(name) => name,
            Err(error) => return error,
        };
        let Some(collection) = Collection::from_name(&name) else {
            return AppResponse::BadRequest(format!("Unknown collection: {name}"));
        };
        AppResponse::from_result(core.block_on(core.coordinator.refetch_collection(collection)))
    })
}

/// Platform connectivity event. Answers with the resulting [`Transition`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_connectivity(handle: *mut CoreHandle, online: bool) -> *const c_char {
    with_core(handle, "set_connectivity", |core| {
        let transition = core.block_on(
            core.coordinator
                .set_connectivity(Connectivity::from_online(online)),
        );
        AppResponse::ok_json(&transition)
    })
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn pending_review_count(handle: *mut CoreHandle) -> *const c_char {
    with_core(handle, "pending_review_count", |core| {
        AppResponse::from_result(core.coordinator.queue().len())
    })
}

/// Resolves the handle or answers `BadRequest` for a null pointer.
fn with_core<F>(handle: *mut CoreHandle, operation: &str, f: F) -> *const c_char
where
    F: FnOnce(&CoreHandle) -> AppResponse,
{
    match unsafe { handle.as_ref() } {
        Some(core) => response_to_c_string(&f(core)),
        None => {
            let error = AppResponse::BadRequest(format!("Null core pointer passed to {operation}"));
            response_to_c_string(&error)
        }
    }
}

/// Serializes the response into a C string owned by the caller, to be freed
/// with [`release_response`]. Null if serialization fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Null and invalid UTF-8 become `BadRequest`.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, AppResponse> {
    if ptr.is_null() {
        return Err(AppResponse::BadRequest(format!("Null {field_name} pointer")));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"))),
    }
}
