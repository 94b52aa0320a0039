//! Futures and promises: a single-value-or-exception channel with
//! continuation chaining (`then`/`then_flatten`) and join combinators
//! (`when_all2`, `when_all3`, `when_all_vec`).

mod promise;
mod shared_state;
mod when_all;

pub use promise::{make_exceptional_future, make_future, Future, Promise};
pub use when_all::{when_all2, when_all3, when_all_vec};
