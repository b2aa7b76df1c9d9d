//! # db-backup
//! Dump a database into an object store and/or a local directory and thin out
//! old backups with a tiered retention policy.
//!
//! Every invocation is one independent run: produce a dump, store it, clean up.
//! Runs share no state besides the stores themselves and take no locks, so
//! invocations against the same store must be serialized by the scheduler
//! that starts them.
//!

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod source;
pub mod store;
