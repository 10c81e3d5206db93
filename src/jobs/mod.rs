//! Background enhancement jobs.

mod pool;
mod processor;
mod store;

pub use pool::{SharedPool, POOL_STATE_KEY};
pub use processor::JobProcessor;
pub use store::{JobRecord, JobStore};
