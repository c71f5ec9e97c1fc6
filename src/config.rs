//! JSON description of live SMC state, used to populate an [`SmcNet`].
//!
//! ```json
//! {
//!   "namespaces": [{ "id": 1, "sysctl": { "wmem_default": 524288 } }],
//!   "link_groups": [{
//!     "id": "0A0B0C0D", "role": "client",
//!     "links": [{ "index": 0, "dev": "mlx5_0", "port": 1, "qp_num": 300, "peer_qpn": 301 }]
//!   }],
//!   "connections": [{
//!     "local": "10.0.0.1:5000", "remote": "10.0.0.2:80", "sock": 1, "clc_sock": 2,
//!     "link_group": "0A0B0C0D", "link": 0
//!   }]
//! }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Deserialize;

use crate::error::SmcError;
use crate::model::link::{
    LgrId, LinkCredits, LinkFlags, LinkGroup, LinkIdentity, LinkState, Role,
};
use crate::model::{ConnectionRecord, Family, NetNsId, SmcState};
use crate::state::SmcNet;
use crate::sysctl::Tunables;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateFile {
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
    #[serde(default)]
    pub link_groups: Vec<LinkGroupConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceConfig {
    pub id: NetNsId,
    #[serde(default)]
    pub sysctl: Tunables,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkGroupConfig {
    pub id: LgrId,
    pub role: Role,
    #[serde(default)]
    pub smcd: bool,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

fn default_link_state() -> LinkState {
    LinkState::Active
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub index: usize,
    #[serde(default = "default_link_state")]
    pub state: LinkState,
    #[serde(default)]
    pub dev: String,
    #[serde(default)]
    pub port: u8,
    #[serde(default)]
    pub qp_num: Option<u32>,
    #[serde(default)]
    pub peer_qpn: u32,
    #[serde(default)]
    pub wr_tx: u32,
    #[serde(default)]
    pub wr_rx: u32,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub flags: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CreditsConfig {
    pub enabled: bool,
    pub local: i32,
    pub peer: i32,
    pub watermark_high: u32,
    pub watermark_low: u32,
}

fn default_smc_state() -> SmcState {
    SmcState::Active
}

fn default_clc_state() -> u8 {
    // TCP_ESTABLISHED
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub netns: NetNsId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub sock: u64,
    #[serde(default)]
    pub clc_sock: Option<u64>,
    #[serde(default)]
    pub inode: u64,
    #[serde(default = "default_smc_state")]
    pub state: SmcState,
    #[serde(default = "default_clc_state")]
    pub clc_state: u8,
    /// Fallback reason code; present means the connection fell back.
    #[serde(default)]
    pub fallback: Option<u32>,
    #[serde(default)]
    pub link_group: Option<LgrId>,
    #[serde(default)]
    pub link: usize,
    #[serde(default)]
    pub tx_cnt: u64,
    #[serde(default)]
    pub tx_bytes: u64,
    #[serde(default)]
    pub tx_corked_cnt: u64,
    #[serde(default)]
    pub tx_corked_bytes: u64,
}

impl StateFile {
    pub fn from_path(path: &Path) -> Result<Self, SmcError> {
        let text = std::fs::read_to_string(path).map_err(SmcError::Io)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SmcError> {
        serde_json::from_str(text).map_err(|e| SmcError::Config(e.to_string()))
    }

    /// Register namespaces, link groups and connections with `net`.
    pub fn apply(&self, net: &SmcNet) -> Result<(), SmcError> {
        for ns in &self.namespaces {
            if ns.id == NetNsId::INIT {
                ns.sysctl.validate()?;
                let init = net.namespace(NetNsId::INIT)?;
                for t in crate::sysctl::Tunable::ALL {
                    init.tunables().write(t.name(), &ns.sysctl.get(t).to_string())?;
                }
            } else {
                net.register_namespace(ns.id, ns.sysctl)?;
            }
        }

        for cfg in &self.link_groups {
            net.link_groups().add(build_group(cfg)?)?;
        }

        for cfg in &self.connections {
            if Family::of(&cfg.local) != Family::of(&cfg.remote) {
                return Err(SmcError::Config(format!(
                    "connection {:#x}: local {} and remote {} differ in address family",
                    cfg.sock, cfg.local, cfg.remote
                )));
            }
            let mut record = ConnectionRecord::new(cfg.netns, cfg.local, cfg.remote, cfg.sock)
                .with_inode(cfg.inode);
            if let Some(clc) = cfg.clc_sock {
                record = record.with_clc_sock(clc);
            }
            let record = net.insert_connection(record)?;
            record.set_state(cfg.state);
            record.set_clc_state(cfg.clc_state);
            let c = &record.counters;
            c.tx_cnt.store(cfg.tx_cnt, Ordering::Relaxed);
            c.tx_bytes.store(cfg.tx_bytes, Ordering::Relaxed);
            c.tx_corked_cnt.store(cfg.tx_corked_cnt, Ordering::Relaxed);
            c.tx_corked_bytes.store(cfg.tx_corked_bytes, Ordering::Relaxed);

            if let Some(reason) = cfg.fallback {
                // Fallback connections never hold a link.
                record.set_fallback(reason);
            } else if let Some(id) = cfg.link_group {
                let group = net
                    .link_groups()
                    .get(id)
                    .ok_or_else(|| SmcError::UnknownLinkGroup(id.to_string()))?;
                if group.link(cfg.link).is_none() {
                    return Err(SmcError::InvalidLinkIndex(cfg.link));
                }
                record.bind_link(group, cfg.link);
            }
        }

        log::info!(
            "loaded {} namespace(s), {} link group(s), {} connection(s)",
            self.namespaces.len(),
            self.link_groups.len(),
            self.connections.len()
        );
        Ok(())
    }
}

fn build_group(cfg: &LinkGroupConfig) -> Result<Arc<LinkGroup>, SmcError> {
    let group = Arc::new(LinkGroup::new(cfg.id, cfg.role, cfg.smcd));
    for lc in &cfg.links {
        let link = group
            .link(lc.index)
            .ok_or(SmcError::InvalidLinkIndex(lc.index))?;
        link.activate(LinkIdentity {
            ibname: lc.dev.clone(),
            ibport: lc.port,
            qp_num: lc.qp_num,
            peer_qpn: lc.peer_qpn,
        });
        link.set_state(lc.state);
        link.set_credits(LinkCredits {
            enabled: lc.credits.enabled,
            local_rq: lc.credits.local,
            peer_rq: lc.credits.peer,
            local_watermark_high: lc.credits.watermark_high,
            peer_watermark_low: lc.credits.watermark_low,
        });
        link.set_flags(LinkFlags::from_bits_retain(lc.flags));
        link.record_wr(lc.wr_tx, lc.wr_rx);
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "namespaces": [{ "id": 1, "sysctl": { "wmem_default": 524288 } }],
        "link_groups": [{
            "id": "0A0B0C0D", "role": "server",
            "links": [
                { "index": 0, "dev": "mlx5_0", "port": 1, "qp_num": 300, "peer_qpn": 301 },
                { "index": 2, "state": "unusable", "dev": "mlx5_1" }
            ]
        }],
        "connections": [
            { "local": "10.0.0.1:5000", "remote": "10.0.0.2:80", "sock": 1, "clc_sock": 2,
              "link_group": "0A0B0C0D", "link": 0, "tx_cnt": 3, "tx_bytes": 900 },
            { "netns": 1, "local": "[::1]:5000", "remote": "[::2]:80", "sock": 3, "clc_sock": 4,
              "fallback": 50331648 }
        ]
    }"#;

    #[test]
    fn sample_state_loads() {
        let net = SmcNet::new();
        StateFile::from_json(SAMPLE).unwrap().apply(&net).unwrap();

        assert_eq!(net.table(Family::V4).len(), 1);
        assert_eq!(net.table(Family::V6).len(), 1);
        assert_eq!(net.link_groups().len(), 1);
        let ns1 = net.namespace(NetNsId(1)).unwrap();
        assert_eq!(ns1.tunables().load().wmem_default, 524288);

        let group = net.link_groups().get("0A0B0C0D".parse().unwrap()).unwrap();
        assert_eq!(group.conns_num(), 1);
        assert!(group.links()[0].usable());
        assert!(!group.links()[1].usable());
        assert!(!group.links()[2].usable());

        let v4 = net
            .conn_report(NetNsId::INIT, Family::V4)
            .unwrap()
            .read_to_string(4096);
        assert!(v4.contains("0A0B0C0D"));
        let v6 = net
            .conn_report(NetNsId(1), Family::V6)
            .unwrap()
            .read_to_string(4096);
        assert!(v6.lines().nth(1).unwrap().contains(" Y "));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = StateFile::from_json(r#"{ "conections": [] }"#).unwrap_err();
        assert!(matches!(err, SmcError::Config(_)));
    }

    #[test]
    fn unknown_link_group_is_an_error() {
        let net = SmcNet::new();
        let state = StateFile::from_json(
            r#"{ "connections": [{ "local": "10.0.0.1:1", "remote": "10.0.0.2:2",
                 "sock": 1, "link_group": "DEADBEEF" }] }"#,
        )
        .unwrap();
        assert!(matches!(
            state.apply(&net),
            Err(SmcError::UnknownLinkGroup(_))
        ));
    }

    #[test]
    fn duplicate_link_group_is_an_error() {
        let net = SmcNet::new();
        let state = StateFile::from_json(
            r#"{ "link_groups": [
                   { "id": "00000001", "role": "client" },
                   { "id": "00000001", "role": "server" }
                 ] }"#,
        )
        .unwrap();
        assert!(matches!(
            state.apply(&net),
            Err(SmcError::LinkGroupExists(_))
        ));
        assert_eq!(net.link_groups().len(), 1);
    }

    #[test]
    fn mixed_address_families_are_rejected() {
        let net = SmcNet::new();
        let state = StateFile::from_json(
            r#"{ "connections": [{ "local": "10.0.0.1:1", "remote": "[::2]:2",
                 "sock": 1, "clc_sock": 2 }] }"#,
        )
        .unwrap();
        assert!(matches!(state.apply(&net), Err(SmcError::Config(_))));
        assert!(net.table(Family::V4).is_empty());
        assert!(net.table(Family::V6).is_empty());
    }

    #[test]
    fn fallback_connection_holds_no_link() {
        let net = SmcNet::new();
        StateFile::from_json(
            r#"{ "link_groups": [{ "id": "00000002", "role": "client",
                   "links": [{ "index": 0 }] }],
                 "connections": [{ "local": "10.0.0.1:1", "remote": "10.0.0.2:2",
                   "sock": 1, "clc_sock": 2, "link_group": "00000002", "fallback": 5 }] }"#,
        )
        .unwrap()
        .apply(&net)
        .unwrap();
        let group = net.link_groups().get("00000002".parse().unwrap()).unwrap();
        assert_eq!(group.conns_num(), 0);
    }

    #[test]
    fn link_index_out_of_range_is_an_error() {
        let net = SmcNet::new();
        let state = StateFile::from_json(
            r#"{ "link_groups": [{ "id": "00000001", "role": "client",
                 "links": [{ "index": 3 }] }] }"#,
        )
        .unwrap();
        assert!(matches!(state.apply(&net), Err(SmcError::InvalidLinkIndex(3))));
    }

    #[test]
    fn init_namespace_sysctl_is_applied() {
        let net = SmcNet::new();
        StateFile::from_json(
            r#"{ "namespaces": [{ "id": 0, "sysctl": { "autocorking_size": 0 } }] }"#,
        )
        .unwrap()
        .apply(&net)
        .unwrap();
        let init = net.namespace(NetNsId::INIT).unwrap();
        assert_eq!(init.tunables().read("autocorking_size").unwrap(), "0");
        assert_eq!(init.tunables().read("rmem_default").unwrap(), "393216");
    }

    #[test]
    fn below_minimum_sysctl_fails_to_load() {
        let net = SmcNet::new();
        let state = StateFile::from_json(
            r#"{ "namespaces": [{ "id": 4, "sysctl": { "rmem_default": 10 } }] }"#,
        )
        .unwrap();
        assert!(matches!(
            state.apply(&net),
            Err(SmcError::BelowMinimum { .. })
        ));
        assert!(net.namespace(NetNsId(4)).is_err());
    }
}
