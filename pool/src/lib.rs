//! Bounded, reusable pool of renderer resources.
//!
//! Resources are pages wrapped with an identity and a work counter. The
//! pool enforces the capacity bound, validates on every acquire, retires
//! resources past their work limit, reaps idle ones, and drains cleanly on
//! shutdown.

mod error;
mod factory;
mod pool;
mod resource;
mod stats;

pub use error::{PoolError, Result};
pub use factory::ResourceFactory;
pub use pool::WorkerPool;
pub use resource::PoolResource;
pub use stats::PoolStats;
