//! Dispatch pool for task attempts
//!
//! This module provides:
//! - [`DispatchPool`] - Bounded pool of execution slots shared by all tenants
//! - [`AdmissionQueue`] - Tenant-fair bounded queue feeding the pool
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DispatchPool                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │              AdmissionQueue                          │    │
//! │  │  tenant-a: [j1][j2][j3]   tenant-b: [j1]   ...      │    │
//! │  │  (round-robin across lanes, bounded)                │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Execution slots (Semaphore-limited)         │    │
//! │  │  [Attempt 1] [Attempt 2] ... [Attempt N]            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod admission;
mod pool;

pub use admission::AdmissionQueue;
pub use pool::{DispatchPool, DispatchPoolConfig, Job, PoolError, PoolStats};
