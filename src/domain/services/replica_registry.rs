//! Replica Registry
//!
//! The declared topology of one replicated resource: one primary and any
//! number of secondaries. Pure data plus the role transitions the coordinator
//! is allowed to perform on it.

use crate::domain::entities::Replica;
use crate::domain::errors::FailoverError;
use crate::domain::value_objects::ReplicaRole;
use std::collections::HashSet;

/// Transient markers written at the start of a promotion transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionMarker {
    /// Replica that was primary, now `Demoted`
    pub old_primary: String,
    /// Replica being promoted, now `Promoting`
    pub candidate: String,
}

/// Ordered set of replicas sharing one coordinator.
///
/// Invariants: non-empty, unique ids, unique regions, at most one `Primary`,
/// at most one `Promoting` and one `Demoted`.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    id: String,
    replicas: Vec<Replica>,
}

impl Topology {
    /// Build a topology from static configuration.
    ///
    /// A freshly declared topology must have exactly one primary and no
    /// transient roles.
    pub fn new(id: impl Into<String>, replicas: Vec<Replica>) -> Result<Self, FailoverError> {
        let id = id.into();
        if id.is_empty() {
            return Err(FailoverError::InvalidTopology("topology id is empty".to_string()));
        }

        let topology = Self { id, replicas };
        topology.check_structure()?;

        if let Some(r) = topology.replicas.iter().find(|r| r.role.is_transient()) {
            return Err(FailoverError::InvalidTopology(format!(
                "replica {} declared with transient role {}",
                r.id, r.role
            )));
        }
        if topology.count_role(ReplicaRole::Primary) != 1 {
            return Err(FailoverError::InvalidTopology(format!(
                "topology {} must declare exactly one primary",
                topology.id
            )));
        }

        Ok(topology)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn get(&self, replica_id: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.id == replica_id)
    }

    pub fn contains(&self, replica_id: &str) -> bool {
        self.get(replica_id).is_some()
    }

    /// The current primary, if any.
    pub fn primary(&self) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.role == ReplicaRole::Primary)
    }

    /// Replicas currently in role `Secondary`.
    pub fn secondaries(&self) -> impl Iterator<Item = &Replica> {
        self.replicas
            .iter()
            .filter(|r| r.role == ReplicaRole::Secondary)
    }

    pub fn count_role(&self, role: ReplicaRole) -> usize {
        self.replicas.iter().filter(|r| r.role == role).count()
    }

    /// Structural invariants that hold at every point in time.
    fn check_structure(&self) -> Result<(), FailoverError> {
        if self.replicas.is_empty() {
            return Err(FailoverError::InvalidTopology(format!(
                "topology {} has no replicas",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        let mut regions = HashSet::new();
        for r in &self.replicas {
            if r.id.is_empty() {
                return Err(FailoverError::InvalidTopology(format!(
                    "topology {} has a replica with an empty id",
                    self.id
                )));
            }
            if !ids.insert(r.id.as_str()) {
                return Err(FailoverError::InvalidTopology(format!(
                    "duplicate replica id {} in topology {}",
                    r.id, self.id
                )));
            }
            if !regions.insert(r.region.as_str()) {
                return Err(FailoverError::InvalidTopology(format!(
                    "duplicate region {} in topology {}",
                    r.region, self.id
                )));
            }
        }

        for role in [ReplicaRole::Primary, ReplicaRole::Promoting, ReplicaRole::Demoted] {
            if self.count_role(role) > 1 {
                return Err(FailoverError::InvalidTopology(format!(
                    "topology {} has more than one {} replica",
                    self.id, role
                )));
            }
        }

        Ok(())
    }

    /// Steady-state invariant: exactly one primary and no transient markers.
    pub fn check_steady(&self) -> Result<(), FailoverError> {
        let primaries = self.count_role(ReplicaRole::Primary);
        if primaries != 1 {
            return Err(FailoverError::InvariantViolation {
                topology_id: self.id.clone(),
                detail: format!("expected exactly one primary, found {}", primaries),
            });
        }
        if let Some(r) = self.replicas.iter().find(|r| r.role.is_transient()) {
            return Err(FailoverError::InvariantViolation {
                topology_id: self.id.clone(),
                detail: format!("replica {} left in transient role {}", r.id, r.role),
            });
        }
        Ok(())
    }

    /// Markers left behind by an interrupted promotion, if any.
    pub fn in_flight(&self) -> Option<PromotionMarker> {
        let candidate = self
            .replicas
            .iter()
            .find(|r| r.role == ReplicaRole::Promoting)?;
        let old_primary = self
            .replicas
            .iter()
            .find(|r| r.role == ReplicaRole::Demoted)?;
        Some(PromotionMarker {
            old_primary: old_primary.id.clone(),
            candidate: candidate.id.clone(),
        })
    }

    fn role_mut(&mut self, replica_id: &str) -> Result<&mut ReplicaRole, FailoverError> {
        let topology_id = self.id.clone();
        self.replicas
            .iter_mut()
            .find(|r| r.id == replica_id)
            .map(|r| &mut r.role)
            .ok_or_else(|| FailoverError::UnknownReplica {
                topology_id,
                replica_id: replica_id.to_string(),
            })
    }

    /// Mark the current primary `Demoted` and `candidate_id` `Promoting`.
    pub fn begin_promotion(&mut self, candidate_id: &str) -> Result<PromotionMarker, FailoverError> {
        self.check_steady()?;

        let candidate_role = *self.role_mut(candidate_id)?;
        if candidate_role != ReplicaRole::Secondary {
            return Err(FailoverError::IneligibleCandidate {
                topology_id: self.id.clone(),
                replica_id: candidate_id.to_string(),
            });
        }

        let old_primary = self
            .primary()
            .map(|r| r.id.clone())
            .ok_or_else(|| FailoverError::InvariantViolation {
                topology_id: self.id.clone(),
                detail: "no primary".to_string(),
            })?;

        *self.role_mut(&old_primary)? = ReplicaRole::Demoted;
        *self.role_mut(candidate_id)? = ReplicaRole::Promoting;

        Ok(PromotionMarker {
            old_primary,
            candidate: candidate_id.to_string(),
        })
    }

    /// Finish a promotion: candidate becomes `Primary`, old primary `Secondary`.
    pub fn commit_promotion(&mut self, marker: &PromotionMarker) -> Result<(), FailoverError> {
        *self.role_mut(&marker.candidate)? = ReplicaRole::Primary;
        *self.role_mut(&marker.old_primary)? = ReplicaRole::Secondary;
        self.check_steady()
    }

    /// Undo a promotion: restore the pre-transition roles.
    pub fn rollback_promotion(&mut self, marker: &PromotionMarker) -> Result<(), FailoverError> {
        *self.role_mut(&marker.candidate)? = ReplicaRole::Secondary;
        *self.role_mut(&marker.old_primary)? = ReplicaRole::Primary;
        self.check_steady()
    }

    /// Make `primary_id` the only primary, as reported by an external source
    /// of truth. Every other primary or transient marker becomes `Secondary`;
    /// `Unreachable` replicas keep their marking.
    pub fn adopt_primary(&mut self, primary_id: &str) -> Result<(), FailoverError> {
        if !self.contains(primary_id) {
            return Err(FailoverError::UnknownReplica {
                topology_id: self.id.clone(),
                replica_id: primary_id.to_string(),
            });
        }

        for r in self.replicas.iter_mut() {
            if r.id == primary_id {
                r.role = ReplicaRole::Primary;
            } else if r.role != ReplicaRole::Unreachable {
                r.role = ReplicaRole::Secondary;
            }
        }
        self.check_steady()
    }

    /// Toggle a secondary between `Secondary` and `Unreachable`.
    ///
    /// Primaries and transient roles are never touched. Returns whether the
    /// role changed.
    pub fn mark_reachability(&mut self, replica_id: &str, reachable: bool) -> bool {
        let Some(replica) = self.replicas.iter_mut().find(|r| r.id == replica_id) else {
            return false;
        };
        match (replica.role, reachable) {
            (ReplicaRole::Secondary, false) => {
                replica.role = ReplicaRole::Unreachable;
                true
            }
            (ReplicaRole::Unreachable, true) => {
                replica.role = ReplicaRole::Secondary;
                true
            }
            _ => false,
        }
    }

    /// Add a secondary to the topology.
    pub fn add_secondary(&mut self, mut replica: Replica) -> Result<(), FailoverError> {
        if replica.role != ReplicaRole::Secondary && replica.role != ReplicaRole::Unreachable {
            return Err(FailoverError::InvalidTopology(format!(
                "replica {} must be added as a secondary, not {}",
                replica.id, replica.role
            )));
        }
        replica.role = ReplicaRole::Secondary;
        self.replicas.push(replica);
        if let Err(e) = self.check_structure() {
            self.replicas.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Remove a non-primary replica from the topology.
    pub fn remove_secondary(&mut self, replica_id: &str) -> Result<Replica, FailoverError> {
        let idx = self
            .replicas
            .iter()
            .position(|r| r.id == replica_id)
            .ok_or_else(|| FailoverError::UnknownReplica {
                topology_id: self.id.clone(),
                replica_id: replica_id.to_string(),
            })?;

        let role = self.replicas[idx].role;
        if role == ReplicaRole::Primary || role.is_transient() {
            return Err(FailoverError::InvalidTopology(format!(
                "cannot remove replica {} in role {}",
                replica_id, role
            )));
        }
        Ok(self.replicas.remove(idx))
    }
}
