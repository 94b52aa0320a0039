// Combining tree: a binary tree, laid out as a flat array the way a binary
// heap is, that lets threads paired two-to-a-leaf by thread id batch their
// increments of a shared counter on the way up and distribute the results on
// the way down. This is Herlihy & Shavit's classic combining tree; the
// protocol is inherently blocking (each combine depends on its partner's
// arrival) and is not a candidate for a lock-free rewrite.

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, ToolkitError};
use crate::thread_id;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    Idle,
    First,
    Second,
    ResultReady,
    Root,
}

struct NodeState {
    status: Status,
    locked: bool,
    first_value: u64,
    second_value: u64,
    result: u64,
}

struct Node {
    parent: Option<usize>,
    state: Mutex<NodeState>,
    condvar: Condvar,
}

impl Node {
    fn new(parent: Option<usize>) -> Self {
        Self {
            parent,
            state: Mutex::new(NodeState {
                status: if parent.is_none() { Status::Root } else { Status::Idle },
                locked: false,
                first_value: 0,
                second_value: 0,
                result: 0,
            }),
            condvar: Condvar::new(),
        }
    }
}

/// Binary combining tree. Supports up to `2 * leaves` threads, paired
/// two-to-a-leaf on `tid / 2`. Built with a flat array: node 0 is the
/// permanent root, node `i` (`i >= 1`) has parent `(i - 1) / 2`.
pub struct CombiningTree {
    nodes: Vec<Node>,
    leaves: Vec<usize>,
}

impl CombiningTree {
    /// `width` is the tree's total node count (root included), matching the
    /// constructor contract of the algorithm this is ported from. Must be at
    /// least 1; a width of 1 degenerates to a single node that is root, leaf,
    /// and stop node for every call, serializing all threads through it.
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(ToolkitError::InvalidArgument(
                "combining tree width must be >= 1".to_string(),
            ));
        }
        let nodes: Vec<Node> = (0..width)
            .map(|i| Node::new(if i == 0 { None } else { Some((i - 1) / 2) }))
            .collect();
        let num_leaves = (width + 1) / 2;
        let leaves: Vec<usize> = (0..num_leaves).map(|k| width - 1 - k).collect();
        Ok(Self { nodes, leaves })
    }

    /// Maximum number of distinct thread ids this tree can serve.
    pub fn capacity(&self) -> usize {
        self.leaves.len() * 2
    }

    /// The counter's current value.
    pub fn get(&self) -> u64 {
        self.nodes[0].state.lock().result
    }

    /// Increments the counter using the calling thread's stable id
    /// ([`thread_id::current`]).
    pub fn increment(&self) -> Result<u64> {
        self.get_and_increment(thread_id::current())
    }

    /// Increments the shared counter, returning the value it held *before*
    /// this call. `tid` must be a stable id in `[0, capacity())`: the same
    /// logical thread must always present the same id, or the pairing at
    /// each node breaks down.
    pub fn get_and_increment(&self, tid: usize) -> Result<u64> {
        let leaf_slot = tid / 2;
        let leaf = *self.leaves.get(leaf_slot).ok_or_else(|| {
            ToolkitError::InvalidArgument(format!(
                "thread id {tid} exceeds combining tree capacity {}",
                self.capacity()
            ))
        })?;

        // Pre-combine: climb until we find a node nobody else has reached yet
        // this round (our stop node), recording FIRST at every node we pass.
        let mut node = leaf;
        while self.pre_combine(node)? {
            node = self.nodes[node].parent.expect("non-root node has a parent");
        }
        let stop = node;

        // Combine: climb again, folding in whatever a partner already left at
        // each node, up to (but excluding) the stop node.
        let mut node = leaf;
        let mut combined = 1u64;
        let mut stack = Vec::new();
        while node != stop {
            combined = self.combine(node, combined)?;
            stack.push(node);
            node = self.nodes[node].parent.expect("non-root node has a parent");
        }

        let prior = self.op(stop, combined)?;

        // Distribute: hand the result back down, waking any partner blocked
        // in `op` at a SECOND node and resetting FIRST nodes to IDLE.
        while let Some(node) = stack.pop() {
            self.distribute(node, prior)?;
        }
        Ok(prior)
    }

    /// Returns `true` if the caller should keep climbing, `false` if `idx` is
    /// the stop node for this call.
    fn pre_combine(&self, idx: usize) -> Result<bool> {
        let node = &self.nodes[idx];
        let mut state = node.state.lock();
        while state.locked {
            node.condvar.wait(&mut state);
        }
        match state.status {
            Status::Idle => {
                state.status = Status::First;
                Ok(true)
            }
            Status::First => {
                state.locked = true;
                state.status = Status::Second;
                Ok(false)
            }
            Status::Root => Ok(false),
            other => Err(unexpected_status(other, "pre-combine")),
        }
    }

    fn combine(&self, idx: usize, combined: u64) -> Result<u64> {
        let node = &self.nodes[idx];
        let mut state = node.state.lock();
        while state.locked {
            node.condvar.wait(&mut state);
        }
        state.locked = true;
        state.first_value = combined;
        match state.status {
            Status::First => Ok(state.first_value),
            Status::Second => Ok(state.first_value + state.second_value),
            other => Err(unexpected_status(other, "combine")),
        }
    }

    fn op(&self, idx: usize, combined: u64) -> Result<u64> {
        let node = &self.nodes[idx];
        let mut state = node.state.lock();
        match state.status {
            Status::Root => {
                let prior = state.result;
                state.result += combined;
                Ok(prior)
            }
            Status::Second => {
                state.second_value = combined;
                state.locked = false;
                node.condvar.notify_all();
                while state.status != Status::ResultReady {
                    node.condvar.wait(&mut state);
                }
                state.locked = false;
                node.condvar.notify_all();
                state.status = Status::Idle;
                Ok(state.result)
            }
            other => Err(unexpected_status(other, "op")),
        }
    }

    fn distribute(&self, idx: usize, prior: u64) -> Result<()> {
        let node = &self.nodes[idx];
        let mut state = node.state.lock();
        match state.status {
            Status::First => {
                state.status = Status::Idle;
                state.locked = false;
            }
            Status::Second => {
                state.result = prior + state.first_value;
                state.status = Status::ResultReady;
            }
            other => return Err(unexpected_status(other, "distribute")),
        }
        node.condvar.notify_all();
        Ok(())
    }
}

fn unexpected_status(status: Status, phase: &str) -> ToolkitError {
    ToolkitError::LogicError(format!("unexpected combining-tree node status {status:?} during {phase}"))
}
