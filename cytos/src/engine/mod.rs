//! Lazy partitioned execution.
//!
//! A [`Bag`] is a handle on a node of a [`TaskGraph`]: a source of items split
//! into partitions, or a transform applied to every partition of its input.
//! Building a bag only records the node. Nothing runs until
//! [`Bag::compute`], which walks back from the requested node to its source
//! and hands one task per partition to an [`Executor`].

mod executor;
mod graph;
mod worker;

#[cfg(test)]
mod tests;

pub use executor::{
    CancelToken, Executor, PartitionOutput, PartitionTask, SequentialExecutor, ThreadedExecutor,
};
pub(crate) use graph::BoxError;
pub use graph::{Bag, GraphError, NodeId, RealizeStats, StageStats, TaskGraph};
pub use worker::{Device, WorkerContext, WorkerLocal};
