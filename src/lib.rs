//! Recuento - Batch attribution of traced resource usage to call-stack paths
//!
//! This library correlates raw resource lifecycle events (allocate, free,
//! resize, container teardown) into lifetime records, attributes each
//! record's windowed net size change to its creating call stack, and
//! accumulates the results in mergeable, diffable aggregation trees with a
//! compact nested JSON wire form.

pub mod analysis;
pub mod cli;
pub mod correlator;
pub mod event;
pub mod impact;
pub mod stack;
pub mod tree;
