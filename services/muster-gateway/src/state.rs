use muster_attendance::{
    AttendanceStateMachine, AttendanceStore, MemoryAttendanceStore, SqliteAttendanceStore,
};
use muster_authz::{CapabilityTable, IdentityResolver, PermissionChecker, StaticIdentityResolver};
use muster_broadcast::{BroadcastHub, NoDeployments};
use muster_core::Config;
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub config: Config,
    pub attendance: AttendanceStateMachine,
    pub authz: Arc<dyn PermissionChecker>,
    pub identities: Arc<dyn IdentityResolver>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    /// Wire every collaborator from configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn AttendanceStore> = match &config.attendance.database_path {
            Some(path) => Arc::new(SqliteAttendanceStore::open(path)?),
            None => {
                info!("Using in-memory attendance store");
                Arc::new(MemoryAttendanceStore::new())
            }
        };

        let authz: Arc<dyn PermissionChecker> = Arc::new(CapabilityTable::with_defaults());
        let identities: Arc<dyn IdentityResolver> =
            Arc::new(StaticIdentityResolver::from_entries(&config.identities));

        Ok(Self::with_parts(config, store, authz, identities))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn AttendanceStore>,
        authz: Arc<dyn PermissionChecker>,
        identities: Arc<dyn IdentityResolver>,
    ) -> Self {
        let attendance = AttendanceStateMachine::new(store);
        let hub = BroadcastHub::new(
            config.broadcast.clone(),
            Arc::clone(&authz),
            Arc::new(attendance.clone()),
            Arc::new(NoDeployments),
        );

        Self {
            config,
            attendance,
            authz,
            identities,
            hub,
        }
    }
}
