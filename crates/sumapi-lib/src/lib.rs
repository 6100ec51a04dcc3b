//! Sum API library entry points.
//!
//! This crate holds the transport-independent core of the service: the
//! request and response models, the input validation rules, the sum
//! computation and the health check evaluation. The HTTP crates only decode,
//! dispatch and serialize; they should call into the functions exported here
//! instead of reimplementing behavior.
//!

#![deny(warnings)]

pub mod error;
pub mod health;
pub mod sum;

pub use error::{Error, Result, ValidationError};
pub use health::{
    check_memory, check_tasks, check_uptime, format_uptime, CheckOutcomes, HealthResponse,
    HealthStatus, HealthThresholds, CHECK_OK,
};
pub use sum::{SumRequest, SumResponse, MAX_NUMBERS, MIN_NUMBERS};
