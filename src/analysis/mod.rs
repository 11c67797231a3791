//! Content analysis: chunked classification, roster reconciliation, and
//! cross-chat aggregation.

pub mod aggregator;
pub mod analyzer;
pub mod participants;
