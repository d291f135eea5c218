//! Routed, size-bounded ingestion of financial indicator values into
//! per-entity-kind results databases.

pub mod pipeline;
