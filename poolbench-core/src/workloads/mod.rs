//! Built-in workloads
//!
//! Each module registers its [`WorkloadDef`](crate::WorkloadDef)s with the
//! global registry; nothing here needs to be called directly.

pub mod data_pass;
pub mod fib;
pub mod nbody;
