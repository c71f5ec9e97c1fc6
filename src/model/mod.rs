pub mod link;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use self::link::{LgrId, LinkGroup, Role};

/// Identifier of an isolated network namespace. `NetNsId::INIT` always exists.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetNsId(pub u32);

impl NetNsId {
    pub const INIT: NetNsId = NetNsId(0);
}

impl std::fmt::Display for NetNsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "smc4"),
            Self::V6 => write!(f, "smc6"),
        }
    }
}

/// SMC socket state. Discriminants are the codes shown in the `st` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SmcState {
    Active = 1,
    Init = 2,
    Closed = 7,
    Listen = 10,
    PeerCloseWait1 = 20,
    PeerCloseWait2 = 21,
    AppCloseWait1 = 22,
    AppCloseWait2 = 23,
    AppFinCloseWait = 24,
    PeerFinCloseWait = 25,
    PeerAbortWait = 26,
    ProcessAbort = 27,
}

impl SmcState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Active,
            2 => Self::Init,
            7 => Self::Closed,
            10 => Self::Listen,
            20 => Self::PeerCloseWait1,
            21 => Self::PeerCloseWait2,
            22 => Self::AppCloseWait1,
            23 => Self::AppCloseWait2,
            24 => Self::AppFinCloseWait,
            25 => Self::PeerFinCloseWait,
            26 => Self::PeerAbortWait,
            27 => Self::ProcessAbort,
            _ => return None,
        })
    }
}

/// Buffer sizing copied from the namespace tunables when a connection is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BufferSizes {
    pub sndbuf: i32,
    pub rcvbuf: i32,
    pub autocorking_size: u32,
}

/// Attachment of a connection to one link of a link group.
#[derive(Debug)]
pub struct LinkBinding {
    pub group: Arc<LinkGroup>,
    pub link: usize,
}

#[derive(Debug, Default)]
pub struct ConnCounters {
    pub tx_cnt: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_corked_cnt: AtomicU64,
    pub tx_corked_bytes: AtomicU64,
}

fn release(binding: Option<Arc<LinkBinding>>) {
    if let Some(b) = binding {
        b.group.detach_conn(b.link);
    }
}

/// One live SMC connection.
///
/// Identity fields are fixed at construction. State, fallback, counters and
/// the link binding may change while the record sits in a table, so they are
/// atomics and every reader sees them through [`ConnectionRecord::snapshot`].
#[derive(Debug)]
pub struct ConnectionRecord {
    family: Family,
    netns: NetNsId,
    local: SocketAddr,
    remote: SocketAddr,
    sock: u64,
    clc_sock: Option<u64>,
    inode: u64,
    buffers: BufferSizes,
    state: AtomicU8,
    clc_state: AtomicU8,
    use_fallback: AtomicBool,
    fallback_rsn: AtomicU32,
    binding: ArcSwapOption<LinkBinding>,
    pub counters: ConnCounters,
}

impl ConnectionRecord {
    pub fn new(netns: NetNsId, local: SocketAddr, remote: SocketAddr, sock: u64) -> Self {
        Self {
            family: Family::of(&local),
            netns,
            local,
            remote,
            sock,
            clc_sock: None,
            inode: 0,
            buffers: BufferSizes {
                sndbuf: crate::sysctl::WMEM_DEFAULT,
                rcvbuf: crate::sysctl::RMEM_DEFAULT,
                autocorking_size: crate::sysctl::AUTOCORKING_DEFAULT_SIZE,
            },
            state: AtomicU8::new(SmcState::Init.code()),
            // TCP_ESTABLISHED
            clc_state: AtomicU8::new(1),
            use_fallback: AtomicBool::new(false),
            fallback_rsn: AtomicU32::new(0),
            binding: ArcSwapOption::empty(),
            counters: ConnCounters::default(),
        }
    }

    pub fn with_clc_sock(mut self, clc_sock: u64) -> Self {
        self.clc_sock = Some(clc_sock);
        self
    }

    pub fn with_inode(mut self, inode: u64) -> Self {
        self.inode = inode;
        self
    }

    pub fn with_buffers(mut self, buffers: BufferSizes) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn netns(&self) -> NetNsId {
        self.netns
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn sock(&self) -> u64 {
        self.sock
    }

    pub fn clc_sock(&self) -> Option<u64> {
        self.clc_sock
    }

    pub fn buffers(&self) -> BufferSizes {
        self.buffers
    }

    pub fn state(&self) -> SmcState {
        SmcState::from_code(self.state.load(Ordering::Acquire)).unwrap_or(SmcState::Init)
    }

    pub fn set_state(&self, state: SmcState) {
        self.state.store(state.code(), Ordering::Release);
    }

    pub fn set_clc_state(&self, tcp_state: u8) {
        self.clc_state.store(tcp_state, Ordering::Release);
    }

    pub fn is_fallback(&self) -> bool {
        self.use_fallback.load(Ordering::Acquire)
    }

    /// Mark the connection as fallen back to plain TCP. Drops any link binding.
    pub fn set_fallback(&self, reason: u32) {
        self.fallback_rsn.store(reason, Ordering::Relaxed);
        self.use_fallback.store(true, Ordering::Release);
        self.unbind_link();
    }

    /// Attach the connection to `link` of `group`, releasing the link it
    /// was attached to before.
    pub fn bind_link(&self, group: Arc<LinkGroup>, link: usize) {
        group.attach_conn(link);
        let old = self.binding.swap(Some(Arc::new(LinkBinding { group, link })));
        release(old);
    }

    pub fn unbind_link(&self) {
        release(self.binding.swap(None));
    }

    pub fn binding(&self) -> Option<Arc<LinkBinding>> {
        self.binding.load_full()
    }

    pub fn record_tx(&self, bytes: u64, corked: bool) {
        let c = &self.counters;
        c.tx_cnt.fetch_add(1, Ordering::Relaxed);
        c.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
        if corked {
            c.tx_corked_cnt.fetch_add(1, Ordering::Relaxed);
            c.tx_corked_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Read every mutable field once and resolve the link binding.
    ///
    /// Link details are present only when the connection has not fallen back
    /// and both its group and its link are usable right now.
    pub fn snapshot(&self) -> ConnSnapshot {
        let fallback = self.is_fallback();
        let state = if fallback {
            self.clc_state.load(Ordering::Acquire)
        } else {
            self.state.load(Ordering::Acquire)
        };
        let link = if fallback {
            None
        } else {
            self.binding().and_then(|b| LinkSnapshot::resolve(&b))
        };
        let c = &self.counters;
        ConnSnapshot {
            family: self.family,
            netns: self.netns,
            local: self.local,
            remote: self.remote,
            fallback,
            fallback_rsn: if fallback {
                self.fallback_rsn.load(Ordering::Relaxed)
            } else {
                0
            },
            sock: self.sock,
            clc_sock: self.clc_sock.unwrap_or(0),
            state,
            inode: self.inode,
            link,
            tx_cnt: c.tx_cnt.load(Ordering::Relaxed),
            tx_bytes: c.tx_bytes.load(Ordering::Relaxed),
            tx_corked_cnt: c.tx_corked_cnt.load(Ordering::Relaxed),
            tx_corked_bytes: c.tx_corked_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a connection, used for rendering.
#[derive(Clone, Debug, Serialize)]
pub struct ConnSnapshot {
    pub family: Family,
    pub netns: NetNsId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub fallback: bool,
    pub fallback_rsn: u32,
    pub sock: u64,
    pub clc_sock: u64,
    pub state: u8,
    pub inode: u64,
    pub link: Option<LinkSnapshot>,
    pub tx_cnt: u64,
    pub tx_bytes: u64,
    pub tx_corked_cnt: u64,
    pub tx_corked_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LinkSnapshot {
    pub lgr_id: LgrId,
    pub role: Role,
    pub dev: String,
    pub port: u8,
    pub local_qpn: u32,
    pub peer_qpn: u32,
}

impl LinkSnapshot {
    fn resolve(binding: &LinkBinding) -> Option<Self> {
        let group = &binding.group;
        if group.is_torn_down() {
            return None;
        }
        let link = group.link(binding.link)?;
        if !link.usable() {
            return None;
        }
        let identity = link.identity();
        Some(Self {
            lgr_id: group.id(),
            role: group.role(),
            dev: identity.ibname,
            port: identity.ibport,
            local_qpn: identity.qp_num.unwrap_or(0),
            peer_qpn: identity.peer_qpn,
        })
    }
}
