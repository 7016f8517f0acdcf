//! Interaction data: line parsing, the in-memory dataset and random partitioning.

/// Typed review records and the line parser.
pub mod record;

/// Immutable columnar dataset built from parsed records.
pub mod dataset;

/// Probabilistic train/test partitioning.
pub mod split;
