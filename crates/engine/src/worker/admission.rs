//! Tenant-fair admission queue
//!
//! Jobs wait here until the dispatch pool has a free slot. Each tenant has
//! its own FIFO lane and lanes are served round-robin, so one tenant's
//! backlog cannot delay another tenant's ready work by more than one job per
//! busy tenant.

use std::collections::{HashMap, VecDeque};

/// Bounded multi-lane FIFO
#[derive(Debug)]
pub struct AdmissionQueue<J> {
    lanes: HashMap<String, VecDeque<J>>,
    rotation: VecDeque<String>,
    len: usize,
    capacity: usize,
}

impl<J> AdmissionQueue<J> {
    /// Create a queue holding at most `capacity` jobs across all tenants
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: HashMap::new(),
            rotation: VecDeque::new(),
            len: 0,
            capacity,
        }
    }

    /// Append a job to the tenant's lane
    ///
    /// Returns the job back when the queue is full.
    pub fn push(&mut self, tenant_id: &str, job: J) -> Result<(), J> {
        if self.len >= self.capacity {
            return Err(job);
        }

        let lane = self.lanes.entry(tenant_id.to_string()).or_default();
        if lane.is_empty() {
            self.rotation.push_back(tenant_id.to_string());
        }
        lane.push_back(job);
        self.len += 1;
        Ok(())
    }

    /// Take the next job, rotating to the next tenant afterwards
    pub fn pop(&mut self) -> Option<(String, J)> {
        let tenant_id = self.rotation.pop_front()?;
        let lane = self.lanes.get_mut(&tenant_id)?;
        let job = lane.pop_front()?;
        self.len -= 1;

        if lane.is_empty() {
            self.lanes.remove(&tenant_id);
        } else {
            self.rotation.push_back(tenant_id.clone());
        }
        Some((tenant_id, job))
    }

    /// Remove every queued job
    pub fn drain(&mut self) -> Vec<(String, J)> {
        let mut drained = Vec::with_capacity(self.len);
        while let Some(entry) = self.pop() {
            drained.push(entry);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs queued for one tenant
    pub fn tenant_len(&self, tenant_id: &str) -> usize {
        self.lanes.get(tenant_id).map_or(0, VecDeque::len)
    }
}
