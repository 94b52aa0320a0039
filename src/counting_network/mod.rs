//! Counting networks: lock-free structures that distribute a stream of
//! tokens across w outputs so the output counts form a *step sequence*
//! (no two outputs ever differ by more than one), without any single
//! linearization point.

mod balancer;
mod bitonic;
mod merger;

pub use balancer::Balancer;
pub use bitonic::Bitonic;
pub use merger::Merger;
