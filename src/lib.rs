//! granary - a durable, directory-backed job queue for cluster operations.
//!
//! Jobs are ordered lists of operations persisted one JSON file per job in
//! a queue directory (lock, version, serial, drain flag, archive). The
//! [`queue_store::QueueStore`] owns the directory; the
//! [`scheduler::QueueScheduler`] drives queued jobs through their ops.

pub mod executor;
pub mod job;
pub mod layout;
pub mod params;
pub mod queue_store;
pub mod scheduler;
pub mod settings;
pub mod trace;
pub mod version;
