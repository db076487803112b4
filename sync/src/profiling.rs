//! Profiling support via Tracy.
//!
//! Enabled with the `profiling` Cargo feature. Without it every macro here
//! compiles to nothing.
//!
//! Spans and plots are only emitted while a Tracy [`Client`] is running, so a
//! fence can be profiled from an application that starts the client without
//! forcing every test or tool to start one.
//!
//! ```ignore
//! use redlilium_sync::{profile_scope, plot_in_flight};
//!
//! fn wait_for_gpu() {
//!     profile_scope!("wait_for_gpu");
//!     // ... block ...
//!     plot_in_flight!("frames in flight", 2);
//! }
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, plot_name, span_location};

/// Create a profiling span for the current scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::Client::running()
            .map(|client| client.span($crate::profiling::span_location!($name), 0));
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Plot the number of batches in flight.
///
/// `$value` is only evaluated while a client is running.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! plot_in_flight {
    ($name:literal, $value:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.plot($crate::profiling::plot_name!($name), $value as f64);
        }
    };
}

/// Plot the number of batches in flight (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! plot_in_flight {
    ($name:literal, $value:expr) => {};
}
