//! The producer core: accumulator, request builder, sender loop, and facade.
//! Four small modules, leaves first.

pub mod accumulator;
pub mod builder;
pub mod facade;
pub mod sender;

pub use accumulator::{Completion, ProduceOutcome, RecordAccumulator};
pub use facade::Producer;
