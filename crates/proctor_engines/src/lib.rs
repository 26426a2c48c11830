#![forbid(unsafe_code)]

pub mod classifier;
pub mod environment;
pub mod escalation;
pub mod presence;
pub mod reporter;
