//! Client for the remote rendering/staging API.
//!
//! - `protocol`: request/response bodies shared with the simulator
//! - `client`: reqwest-based client implementing the poller and reorder seams

pub mod client;
pub mod protocol;

pub use client::{ApiClient, ApiError};
pub use protocol::{CreateJobRequest, ErrorBody, PersistOrderRequest};
