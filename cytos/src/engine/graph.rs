use std::any::Any;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;

use super::executor::{Executor, PartitionOutput};
use super::worker::WorkerContext;

pub(crate) type Partition = Box<dyn Any + Send>;
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

type SourceFn = Arc<dyn Fn(usize) -> std::result::Result<Partition, BoxError> + Send + Sync>;
type PartitionFn =
    Arc<dyn Fn(Partition, &WorkerContext) -> std::result::Result<Partition, BoxError> + Send + Sync>;

// === Error Types ===

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Stage `{stage}` failed on partition {partition}: {source}")]
    Stage {
        stage: String,
        partition: usize,
        #[source]
        source: BoxError,
    },
    #[error("Stage `{stage}` produced a partition of an unexpected type")]
    TypeMismatch { stage: String },
    #[error("Node {node_id:?} is not part of this graph")]
    UnknownNode { node_id: NodeId },
    #[error("Cycle detected while planning execution at node {node_id:?}")]
    CycleDetected { node_id: NodeId },
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl GraphError {
    /// The stage failure's source, if it is an `E`.
    pub fn stage_source<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            GraphError::Stage { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

// === Nodes ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

enum NodeKind {
    Source { load: SourceFn },
    Map { input: NodeId, func: PartitionFn },
}

struct TaskNode {
    name: String,
    kind: NodeKind,
}

impl TaskNode {
    fn input(&self) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Source { .. } => None,
            NodeKind::Map { input, .. } => Some(*input),
        }
    }
}

/// Traversal state while planning.
///
/// ```text
/// Unvisited ──► Visiting ──► Resolved
///                  │
///                  └──► (cycle if revisited while Visiting)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ProcessState {
    #[default]
    Unvisited,
    Visiting,
    Resolved,
}

#[derive(Debug)]
enum VisitCause {
    Terminal,
    Input,
    Done,
}

#[derive(Debug)]
struct Visit {
    node_idx: usize,
    cause: VisitCause,
}

/// One step of a realized chain, detached from the graph lock.
#[derive(Clone)]
enum Step {
    Load(SourceFn),
    Apply(PartitionFn),
}

#[derive(Clone)]
struct PlannedStep {
    name: String,
    step: Step,
}

// === Task Graph ===

/// Append-only DAG of partition transforms.
///
/// Nodes are shared by every [`Bag`] derived from the same source. Adding a
/// node never runs anything; realizing a node recomputes its whole chain, so
/// two bags branching off one node each pay for the shared prefix.
#[derive(Default)]
pub struct TaskGraph {
    nodes: RwLock<Vec<TaskNode>>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.nodes.read().iter().map(|n| n.name.clone()).collect();
        f.debug_struct("TaskGraph").field("nodes", &names).finish()
    }
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn node_name(&self, node_id: NodeId) -> Option<String> {
        self.nodes.read().get(node_id.0).map(|n| n.name.clone())
    }

    fn add_node(&self, name: String, kind: NodeKind) -> NodeId {
        let mut nodes = self.nodes.write();
        if let NodeKind::Map { input, .. } = &kind {
            assert!(input.0 < nodes.len(), "input node must already exist");
        }
        nodes.push(TaskNode { name, kind });
        NodeId(nodes.len() - 1)
    }

    /// Nodes needed to produce `terminal`, in dependency order.
    fn walk_backward_collect_order(&self, terminal: NodeId) -> Result<Vec<PlannedStep>> {
        let nodes = self.nodes.read();
        if terminal.0 >= nodes.len() {
            return Err(GraphError::UnknownNode { node_id: terminal });
        }

        let mut states = vec![ProcessState::Unvisited; nodes.len()];
        let mut order = Vec::new();
        let mut stack = vec![Visit {
            node_idx: terminal.0,
            cause: VisitCause::Terminal,
        }];

        while let Some(visit) = stack.pop() {
            match visit.cause {
                VisitCause::Terminal | VisitCause::Input => {}
                VisitCause::Done => {
                    assert_eq!(states[visit.node_idx], ProcessState::Visiting);
                    states[visit.node_idx] = ProcessState::Resolved;
                    order.push(visit.node_idx);
                    continue;
                }
            }

            match states[visit.node_idx] {
                ProcessState::Unvisited => {}
                ProcessState::Visiting => {
                    return Err(GraphError::CycleDetected {
                        node_id: NodeId(visit.node_idx),
                    });
                }
                ProcessState::Resolved => continue,
            }

            states[visit.node_idx] = ProcessState::Visiting;
            stack.push(Visit {
                node_idx: visit.node_idx,
                cause: VisitCause::Done,
            });
            if let Some(input) = nodes[visit.node_idx].input() {
                stack.push(Visit {
                    node_idx: input.0,
                    cause: VisitCause::Input,
                });
            }
        }

        Ok(order
            .into_iter()
            .map(|idx| {
                let node = &nodes[idx];
                let step = match &node.kind {
                    NodeKind::Source { load } => Step::Load(load.clone()),
                    NodeKind::Map { func, .. } => Step::Apply(func.clone()),
                };
                PlannedStep {
                    name: node.name.clone(),
                    step,
                }
            })
            .collect())
    }
}

/// Run a planned chain on one partition.
fn run_chain(
    plan: &[PlannedStep],
    partition: usize,
    ctx: &WorkerContext,
) -> Result<PartitionOutput> {
    let mut data: Option<Partition> = None;
    let mut stage_secs = Vec::with_capacity(plan.len());

    for planned in plan {
        let start = Instant::now();
        data = Some(match &planned.step {
            Step::Load(load) => load(partition).map_err(|source| GraphError::Stage {
                stage: planned.name.clone(),
                partition,
                source,
            })?,
            Step::Apply(func) => {
                let input = data.take().ok_or_else(|| GraphError::TypeMismatch {
                    stage: planned.name.clone(),
                })?;
                func(input, ctx).map_err(|source| GraphError::Stage {
                    stage: planned.name.clone(),
                    partition,
                    source,
                })?
            }
        });
        stage_secs.push(start.elapsed().as_secs_f64());
    }

    let data = data.ok_or_else(|| GraphError::TypeMismatch {
        stage: "<empty plan>".to_string(),
    })?;
    tracing::trace!(partition, worker = ctx.ordinal(), "Partition done");
    Ok(PartitionOutput { data, stage_secs })
}

// === Stats ===

#[derive(Debug, Clone)]
pub struct StageStats {
    pub name: String,
    /// Summed over partitions.
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone)]
pub struct RealizeStats {
    pub elapsed_secs: f64,
    pub partitions: usize,
    pub items: usize,
    pub stages: Vec<StageStats>,
}

// === Bag ===

/// Lazy, partitioned collection of `T`.
pub struct Bag<T> {
    graph: Arc<TaskGraph>,
    node: NodeId,
    partitions: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Bag<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            node: self.node,
            partitions: self.partitions,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bag")
            .field("node", &self.node)
            .field("partitions", &self.partitions)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Bag<T> {
    /// Split `items` into partitions of at most `partition_size`, in order.
    ///
    /// The items stay in memory until the bag is dropped; use
    /// [`Bag::from_loader`] for data that should be read per partition.
    pub fn from_sequence(items: Vec<T>, partition_size: usize) -> Self {
        assert!(partition_size > 0, "partition_size must be > 0");

        let chunks: Arc<Vec<Vec<T>>> = Arc::new(
            items
                .chunks(partition_size)
                .map(|chunk| chunk.to_vec())
                .collect(),
        );
        let partitions = chunks.len();
        Self::from_loader("from_sequence", partitions, move |idx| {
            Ok::<_, Infallible>(chunks[idx].clone())
        })
    }
}

impl<T: Send + 'static> Bag<T> {
    /// Source node whose partition `idx` is produced by `load(idx)`.
    ///
    /// `load` runs inside the partition task, once per realization, so only
    /// the partitions in flight are ever held in memory.
    pub fn from_loader<E, F>(name: &str, partitions: usize, load: F) -> Self
    where
        E: Into<BoxError>,
        F: Fn(usize) -> std::result::Result<Vec<T>, E> + Send + Sync + 'static,
    {
        let load: SourceFn = Arc::new(move |idx| {
            let items = load(idx).map_err(|e| -> BoxError { e.into() })?;
            Ok(Box::new(items) as Partition)
        });

        let graph = Arc::new(TaskGraph::default());
        let node = graph.add_node(name.to_string(), NodeKind::Source { load });
        Self {
            graph,
            node,
            partitions,
            _marker: PhantomData,
        }
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Record a transform applied to each partition. Nothing runs yet.
    pub fn map_partitions<U, E, F>(&self, name: &str, f: F) -> Bag<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(Vec<T>, &WorkerContext) -> std::result::Result<Vec<U>, E> + Send + Sync + 'static,
    {
        let stage = name.to_string();
        let func: PartitionFn = Arc::new(move |input, ctx| {
            let items = input
                .downcast::<Vec<T>>()
                .map_err(|_| -> BoxError { format!("unexpected input type at `{stage}`").into() })?;
            let out = f(*items, ctx).map_err(|e| -> BoxError { e.into() })?;
            Ok(Box::new(out) as Partition)
        });

        let node = self.graph.add_node(
            name.to_string(),
            NodeKind::Map {
                input: self.node,
                func,
            },
        );
        Bag {
            graph: self.graph.clone(),
            node,
            partitions: self.partitions,
            _marker: PhantomData,
        }
    }

    /// Record a per-item transform.
    pub fn map<U, E, F>(&self, name: &str, f: F) -> Bag<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T, &WorkerContext) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        self.map_partitions(name, move |items: Vec<T>, ctx| {
            items
                .into_iter()
                .map(|item| f(item, ctx))
                .collect::<std::result::Result<Vec<U>, E>>()
        })
    }

    /// Realize the bag, concatenating partitions in order.
    pub fn compute(&self, executor: &dyn Executor) -> Result<Vec<T>> {
        self.compute_with_stats(executor).map(|(items, _)| items)
    }

    pub fn compute_with_stats(&self, executor: &dyn Executor) -> Result<(Vec<T>, RealizeStats)> {
        let start = Instant::now();
        let plan = self.graph.walk_backward_collect_order(self.node)?;
        let terminal = plan.last().map(|p| p.name.clone()).unwrap_or_default();
        tracing::info!(
            stage = %terminal,
            partitions = self.partitions,
            workers = executor.num_workers(),
            "Realizing"
        );

        let task = |partition: usize, ctx: &WorkerContext| run_chain(&plan, partition, ctx);
        let outputs = executor.execute(self.partitions, &task)?;

        let mut stages: Vec<StageStats> = plan
            .iter()
            .map(|p| StageStats {
                name: p.name.clone(),
                elapsed_secs: 0.0,
            })
            .collect();
        let mut items = Vec::new();
        for output in outputs {
            for (stage, secs) in stages.iter_mut().zip(&output.stage_secs) {
                stage.elapsed_secs += secs;
            }
            let part = output
                .data
                .downcast::<Vec<T>>()
                .map_err(|_| GraphError::TypeMismatch {
                    stage: terminal.clone(),
                })?;
            items.extend(*part);
        }

        let stats = RealizeStats {
            elapsed_secs: start.elapsed().as_secs_f64(),
            partitions: self.partitions,
            items: items.len(),
            stages,
        };
        tracing::info!(
            stage = %terminal,
            items = stats.items,
            elapsed_secs = stats.elapsed_secs,
            "Realized"
        );
        Ok((items, stats))
    }
}
