//! REST control plane under `/mockserver/*`.
//!
//! Shares the listener with mock traffic; the server dispatches here for
//! any path under the control prefix.

pub mod handlers;
pub mod router;
pub mod types;

pub use router::{dispatch, CONTROL_PREFIX};
