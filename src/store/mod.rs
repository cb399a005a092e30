//! Collaborator implementations: Postgres-backed for production, in-memory
//! for tests and demos.

pub mod memory;
pub mod postgres;
