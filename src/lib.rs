// Concurrency toolkit
//
// Safe memory reclamation (hazard pointers, epoch-based reclamation),
// futures/promises with continuations and whenAll, lock-free counting
// networks, a combining tree, and a token-bucket rate limiter.

pub mod combining_tree;
pub mod concurrent;
pub mod counting_network;
pub mod error;
pub mod futures;
pub mod rate_limiter;
pub mod thread_id;

pub use error::{Result, ToolkitError};
