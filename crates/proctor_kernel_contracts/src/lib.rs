#![forbid(unsafe_code)]

pub mod capability;
pub mod common;
pub mod escalation;
pub mod presence;
pub mod resource;
pub mod violation;

pub use common::{
    ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, UnixTimeMs, Validate,
};
