//! Bubble-up combining of leaf chaining values.
//!
//! Workers complete leaves in arbitrary order. The combiner stores each
//! arriving chaining value under its node id and, whenever both children of a
//! parent are present, merges them upward: [`parent_cv`] below the root,
//! [`root_hash`] at the root. A merge fires only when the second sibling
//! lands, so the process is race-free under any completion order and performs
//! exactly `num_leaves - 1` merges.

use riptide_primitives::{parent_cv, root_hash, ChainingValue, Digest};

use crate::error::{HashError, Result};
use crate::plan::{NodeId, NodeKind, TreePlan};

/// Combines chaining values up a planned tree.
#[derive(Debug)]
pub struct Combiner<'a> {
    plan: &'a TreePlan,
    cvs: Vec<Option<ChainingValue>>,
    stored: usize,
}

impl<'a> Combiner<'a> {
    /// Create a combiner over `plan` with an empty CV map.
    #[must_use]
    pub fn new(plan: &'a TreePlan) -> Self {
        Self {
            plan,
            cvs: vec![None; plan.num_nodes()],
            stored: 0,
        }
    }

    /// Deliver the chaining value of a completed leaf (or, during bubbling,
    /// an inner node) and merge as far up as both siblings allow.
    ///
    /// Returns `Some(digest)` once the delivery completes the root.
    ///
    /// # Errors
    ///
    /// [`HashError::TreeCorrupted`] when a node's chaining value is delivered
    /// twice, or when a non-root chaining value is delivered for the root.
    /// Either indicates a dispatcher bug, never an input condition.
    pub fn deliver(&mut self, node_id: NodeId, cv: ChainingValue) -> Result<Option<Digest>> {
        let mut id = node_id;
        let mut cv = cv;
        loop {
            self.store(id, cv)?;

            let Some(parent_id) = self.plan.node(id).parent else {
                // Single-leaf plans are finalized by the orchestrator with
                // hash_single and never routed here.
                return Err(HashError::TreeCorrupted(format!(
                    "non-root chaining value delivered for root node {}",
                    id.index()
                )));
            };

            let parent = self.plan.node(parent_id);
            let NodeKind::Inner { left, right } = parent.kind else {
                return Err(HashError::TreeCorrupted(format!(
                    "leaf node {} recorded as a parent",
                    parent_id.index()
                )));
            };
            let (Some(left_cv), Some(right_cv)) =
                (self.cvs[left.index()], self.cvs[right.index()])
            else {
                // The sibling is still in flight; its arrival triggers the
                // merge.
                return Ok(None);
            };

            if parent.parent.is_none() {
                let digest = root_hash(&left_cv, &right_cv);
                self.store(parent_id, *digest.as_bytes())?;
                return Ok(Some(digest));
            }
            cv = parent_cv(&left_cv, &right_cv);
            id = parent_id;
        }
    }

    fn store(&mut self, id: NodeId, cv: ChainingValue) -> Result<()> {
        let entry = &mut self.cvs[id.index()];
        if entry.is_some() {
            return Err(HashError::TreeCorrupted(format!(
                "chaining value for node {} delivered twice",
                id.index()
            )));
        }
        *entry = Some(cv);
        self.stored += 1;
        Ok(())
    }

    /// Number of chaining values stored so far (leaves plus merged parents).
    ///
    /// Equals `2 * num_leaves - 1` exactly when the root has completed.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.stored
    }

    /// Whether every node of the plan has a chaining value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stored == self.plan.num_nodes()
    }
}
