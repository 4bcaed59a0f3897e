//! Background Tasks Module
//!
//! Contains background work spawned by the admin surface.
//!
//! # Tasks
//! - Maintenance: memory reclamation and keyspace introspection on demand

mod maintenance;

pub use maintenance::spawn_maintenance;
