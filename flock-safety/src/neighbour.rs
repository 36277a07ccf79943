//! Neighbour table over the fixed-array balanced tree.

use crate::{Result, SafetyError};
use flock_proto::safety::SafetyReport;
use flock_proto::NodeId;
use flock_shm::{ArrayAvl, ShmError};

/// Upper bound on tracked one-hop neighbours.
pub const MAX_NEIGHBOURS: usize = 64;

/// Reception state of one neighbour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighbourState {
    pub report: SafetyReport,
    pub last_seqno: u32,
    /// EWMA of the sequence-number gap between consecutive reports; a value
    /// near 1.0 means lossless reception.
    pub avg_seqno_gap: f64,
    pub last_heard_ms: i64,
}

impl Default for NeighbourState {
    fn default() -> Self {
        NeighbourState {
            report: SafetyReport::default(),
            last_seqno: 0,
            avg_seqno_gap: 0.0,
            last_heard_ms: 0,
        }
    }
}

/// Table of all currently heard neighbours, keyed by node identifier.
pub struct NeighbourTable {
    tree: ArrayAvl<NodeId, NeighbourState, MAX_NEIGHBOURS>,
    gap_alpha: f64,
}

impl NeighbourTable {
    pub fn new(gap_alpha: f64) -> Result<NeighbourTable> {
        if !(0.0..=1.0).contains(&gap_alpha) {
            return Err(SafetyError::Config(format!(
                "gap EWMA alpha {gap_alpha} outside [0, 1]"
            )));
        }
        Ok(NeighbourTable {
            tree: ArrayAvl::new().map_err(SafetyError::Shm)?,
            gap_alpha,
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, node: &NodeId) -> Option<&NeighbourState> {
        self.tree.get(node)
    }

    /// Folds a received report into the table.
    ///
    /// A known neighbour has its gap estimator updated from the
    /// sequence-number distance to the previous report; an unknown one is
    /// inserted, which fails with `TableFull` when all slots are taken.
    pub fn observe(&mut self, report: SafetyReport, now_ms: i64) -> Result<()> {
        if let Some(state) = self.tree.get_mut(&report.node) {
            let gap = report.seqno.wrapping_sub(state.last_seqno) as f64;
            state.avg_seqno_gap = if state.avg_seqno_gap == 0.0 {
                gap
            } else {
                self.gap_alpha * state.avg_seqno_gap + (1.0 - self.gap_alpha) * gap
            };
            state.last_seqno = report.seqno;
            state.report = report;
            state.last_heard_ms = now_ms;
            return Ok(());
        }

        let state = NeighbourState {
            report,
            last_seqno: report.seqno,
            avg_seqno_gap: 0.0,
            last_heard_ms: now_ms,
        };
        match self.tree.insert(report.node, state) {
            Ok(()) => {
                tracing::debug!(node = %report.node, "new neighbour");
                Ok(())
            }
            Err(ShmError::TreeFull) => Err(SafetyError::TableFull),
            Err(e) => Err(SafetyError::Shm(e)),
        }
    }

    /// Removes every neighbour not heard from since `cutoff_ms`. Returns
    /// how many were aged out.
    pub fn purge_stale(&mut self, cutoff_ms: i64) -> Result<usize> {
        let stale = self.tree.keys_where(|_, s| s.last_heard_ms < cutoff_ms);
        let count = stale.len();
        for node in stale {
            tracing::debug!(%node, "aging out neighbour");
            self.tree.remove(&node).map_err(SafetyError::Shm)?;
        }
        Ok(count)
    }

    /// Snapshot of all neighbours, ascending by node identifier.
    pub fn snapshot(&self) -> Vec<NeighbourState> {
        let mut out = Vec::with_capacity(self.tree.len());
        self.tree.walk(&mut |_, state| out.push(*state));
        out
    }
}
