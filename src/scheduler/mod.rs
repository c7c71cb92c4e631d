//! Load scheduling: priority ordering and the single-read load queue.

mod load_queue;
mod priority;

pub use load_queue::LoadQueue;
pub use priority::{PrioritizedItem, Priority, PriorityQueue};
