use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::SmcError;
use crate::model::{ConnectionRecord, Family, NetNsId};
use crate::output::{ConnReportReader, LinkReportReader, RecordFilter};
use crate::registry::LinkGroupRegistry;
use crate::sysctl::{NetTunables, Tunables};
use crate::table::ConnectionTable;

/// Per-namespace state: its tunables.
pub struct NetNamespace {
    id: NetNsId,
    tunables: NetTunables,
}

impl NetNamespace {
    pub fn id(&self) -> NetNsId {
        self.id
    }

    pub fn tunables(&self) -> &NetTunables {
        &self.tunables
    }
}

/// The SMC service object: one connection table per address family, the
/// link-group registry and the registered namespaces.
pub struct SmcNet {
    v4: ConnectionTable,
    v6: ConnectionTable,
    link_groups: LinkGroupRegistry,
    namespaces: RwLock<FxHashMap<NetNsId, Arc<NetNamespace>>>,
    /// Upper bound on registered namespaces, the initial one included.
    max_namespaces: Option<usize>,
}

impl Default for SmcNet {
    fn default() -> Self {
        Self::new()
    }
}

impl SmcNet {
    /// Create the service with the initial namespace registered.
    pub fn new() -> Self {
        let mut namespaces = FxHashMap::default();
        namespaces.insert(
            NetNsId::INIT,
            Arc::new(NetNamespace {
                id: NetNsId::INIT,
                tunables: NetTunables::default(),
            }),
        );
        Self {
            v4: ConnectionTable::new(),
            v6: ConnectionTable::new(),
            link_groups: LinkGroupRegistry::new(),
            namespaces: RwLock::new(namespaces),
            max_namespaces: None,
        }
    }

    /// Cap the number of namespaces that may be registered at once.
    /// Registrations past the cap fail with `ResourceExhausted`.
    pub fn with_namespace_limit(mut self, max: usize) -> Self {
        self.max_namespaces = Some(max);
        self
    }

    /// Register a namespace with its own copy of the tunables. On failure
    /// the namespace gets no reports or tunables; others are unaffected.
    pub fn register_namespace(
        &self,
        id: NetNsId,
        tunables: Tunables,
    ) -> Result<Arc<NetNamespace>, SmcError> {
        tunables.validate()?;
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(&id) {
            return Err(SmcError::NamespaceExists(id));
        }
        let at_limit = self.max_namespaces.is_some_and(|max| namespaces.len() >= max);
        if at_limit || namespaces.try_reserve(1).is_err() {
            log::warn!("no room to register network namespace {id}");
            return Err(SmcError::ResourceExhausted(id));
        }
        let ns = Arc::new(NetNamespace {
            id,
            tunables: NetTunables::new(tunables),
        });
        namespaces.insert(id, Arc::clone(&ns));
        log::info!("registered network namespace {id}");
        Ok(ns)
    }

    pub fn unregister_namespace(&self, id: NetNsId) -> Option<Arc<NetNamespace>> {
        let ns = self.namespaces.write().remove(&id);
        if ns.is_some() {
            log::info!("unregistered network namespace {id}");
        }
        ns
    }

    pub fn namespace(&self, id: NetNsId) -> Result<Arc<NetNamespace>, SmcError> {
        self.namespaces
            .read()
            .get(&id)
            .cloned()
            .ok_or(SmcError::UnknownNamespace(id))
    }

    pub fn table(&self, family: Family) -> &ConnectionTable {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    pub fn link_groups(&self) -> &LinkGroupRegistry {
        &self.link_groups
    }

    /// Establish a connection: size its buffers from the namespace tunables
    /// in effect now and add it to the table of its family.
    pub fn insert_connection(
        &self,
        record: ConnectionRecord,
    ) -> Result<Arc<ConnectionRecord>, SmcError> {
        let ns = self.namespace(record.netns())?;
        let record = Arc::new(record.with_buffers(ns.tunables().load().buffers()));
        self.table(record.family()).insert(Arc::clone(&record));
        Ok(record)
    }

    /// Tear a connection down: unlink it and release its link accounting.
    pub fn close_connection(&self, record: &Arc<ConnectionRecord>) -> bool {
        let removed = self.table(record.family()).remove(record);
        record.unbind_link();
        removed
    }

    /// Open a paginated connection report for one namespace.
    pub fn conn_report(
        &self,
        netns: NetNsId,
        family: Family,
    ) -> Result<ConnReportReader<'_>, SmcError> {
        self.namespace(netns)?;
        let filter: RecordFilter<'_> = Box::new(move |r: &ConnectionRecord| r.netns() == netns);
        Ok(ConnReportReader::new(self.table(family), family, filter))
    }

    /// Open the link-group report. Link groups are not namespaced, but the
    /// report is only available to registered namespaces.
    pub fn link_report(&self, netns: NetNsId) -> Result<LinkReportReader, SmcError> {
        self.namespace(netns)?;
        Ok(LinkReportReader::new(&self.link_groups))
    }
}
