//! Deployment binding
//!
//! Which incident a volunteer is currently deployed to is owned by another
//! part of the platform. The publisher only needs "some incident id, or none".

use muster_core::{IncidentId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Supplies the incident a volunteer is currently deployed to
pub trait DeploymentResolver: Send + Sync {
    /// Active deployment for `user_id`, if any
    fn current_incident(&self, user_id: &UserId) -> Option<IncidentId>;
}

/// Resolver with no deployments; samples fall back to the default room
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeployments;

impl DeploymentResolver for NoDeployments {
    fn current_incident(&self, _user_id: &UserId) -> Option<IncidentId> {
        None
    }
}

/// In-memory deployment table
#[derive(Debug, Default)]
pub struct StaticDeployments {
    assignments: RwLock<HashMap<UserId, IncidentId>>,
}

impl StaticDeployments {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy `user_id` to `incident_id`, replacing any previous deployment
    pub fn assign(&self, user_id: UserId, incident_id: IncidentId) {
        self.assignments.write().insert(user_id, incident_id);
    }

    /// End `user_id`'s deployment
    pub fn release(&self, user_id: &UserId) -> Option<IncidentId> {
        self.assignments.write().remove(user_id)
    }
}

impl DeploymentResolver for StaticDeployments {
    fn current_incident(&self, user_id: &UserId) -> Option<IncidentId> {
        self.assignments.read().get(user_id).cloned()
    }
}
