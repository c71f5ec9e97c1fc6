use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum number of links in one link group.
pub const LINKS_PER_GROUP_MAX: usize = 3;

/// Length in bytes of a link-group identifier.
pub const LGR_ID_SIZE: usize = 4;

/// Link-group identifier. Displays and serializes as uppercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LgrId(pub [u8; LGR_ID_SIZE]);

impl std::fmt::Display for LgrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for LgrId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != LGR_ID_SIZE * 2 || !s.is_ascii() {
            return Err(format!("link group id must be {} hex digits", LGR_ID_SIZE * 2));
        }
        let mut id = [0u8; LGR_ID_SIZE];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("'{s}' is not a hex link group id"))?;
        }
        Ok(Self(id))
    }
}

impl Serialize for LgrId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LgrId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn code(self) -> char {
        match self {
            Self::Client => 'C',
            Self::Server => 'S',
        }
    }
}

/// Link lifecycle: `Inactive -> Active -> Unusable`, driven by link events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LinkState {
    Unusable = 0,
    Inactive = 1,
    Active = 2,
}

impl LinkState {
    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Inactive,
            2 => Self::Active,
            _ => Self::Unusable,
        }
    }
}

bitflags! {
    /// Link flag word as shown in the `flags` column. Only the bit named
    /// here is interpreted; others are carried through unchanged.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LinkFlags: u64 {
        /// An ADD_LINK announcement is waiting to be sent (`SMC_LINKFLAG_ANNOUNCE_PENDING`).
        const ANNOUNCE_PENDING = 1 << 0;
    }
}

/// Device and queue-pair identity, fixed for the lifetime of one activation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkIdentity {
    pub ibname: String,
    pub ibport: u8,
    /// Local queue pair; `None` until the QP is created.
    pub qp_num: Option<u32>,
    pub peer_qpn: u32,
}

/// Flow-control credit settings negotiated for a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkCredits {
    pub enabled: bool,
    pub local_rq: i32,
    pub peer_rq: i32,
    pub local_watermark_high: u32,
    pub peer_watermark_low: u32,
}

#[derive(Debug)]
pub struct Link {
    state: AtomicU8,
    identity: RwLock<LinkIdentity>,
    conn_cnt: AtomicU32,
    wr_tx_cnt: AtomicU32,
    wr_rx_cnt: AtomicU32,
    credits_enable: AtomicBool,
    local_rq_credits: AtomicI32,
    peer_rq_credits: AtomicI32,
    local_cr_watermark_high: AtomicU32,
    peer_cr_watermark_low: AtomicU32,
    flags: AtomicU64,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LinkState::Unusable as u8),
            identity: RwLock::new(LinkIdentity::default()),
            conn_cnt: AtomicU32::new(0),
            wr_tx_cnt: AtomicU32::new(0),
            wr_rx_cnt: AtomicU32::new(0),
            credits_enable: AtomicBool::new(false),
            local_rq_credits: AtomicI32::new(0),
            peer_rq_credits: AtomicI32::new(0),
            local_cr_watermark_high: AtomicU32::new(0),
            peer_cr_watermark_low: AtomicU32::new(0),
            flags: AtomicU64::new(0),
        }
    }
}

impl Link {
    pub fn state(&self) -> LinkState {
        LinkState::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Re-read on every call; the state may change between iteration steps.
    pub fn usable(&self) -> bool {
        self.state() != LinkState::Unusable
    }

    /// Bring the link up with a fresh identity.
    pub fn activate(&self, identity: LinkIdentity) {
        *self.identity.write() = identity;
        self.set_state(LinkState::Active);
    }

    pub fn identity(&self) -> LinkIdentity {
        self.identity.read().clone()
    }

    pub fn set_credits(&self, credits: LinkCredits) {
        self.credits_enable.store(credits.enabled, Ordering::Relaxed);
        self.local_rq_credits.store(credits.local_rq, Ordering::Relaxed);
        self.peer_rq_credits.store(credits.peer_rq, Ordering::Relaxed);
        self.local_cr_watermark_high
            .store(credits.local_watermark_high, Ordering::Relaxed);
        self.peer_cr_watermark_low
            .store(credits.peer_watermark_low, Ordering::Relaxed);
    }

    pub fn credits(&self) -> LinkCredits {
        LinkCredits {
            enabled: self.credits_enable.load(Ordering::Relaxed),
            local_rq: self.local_rq_credits.load(Ordering::Relaxed),
            peer_rq: self.peer_rq_credits.load(Ordering::Relaxed),
            local_watermark_high: self.local_cr_watermark_high.load(Ordering::Relaxed),
            peer_watermark_low: self.peer_cr_watermark_low.load(Ordering::Relaxed),
        }
    }

    pub fn record_wr(&self, tx: u32, rx: u32) {
        self.wr_tx_cnt.fetch_add(tx, Ordering::Relaxed);
        self.wr_rx_cnt.fetch_add(rx, Ordering::Relaxed);
    }

    pub fn wr_counts(&self) -> (u32, u32) {
        (
            self.wr_tx_cnt.load(Ordering::Relaxed),
            self.wr_rx_cnt.load(Ordering::Relaxed),
        )
    }

    pub fn conn_cnt(&self) -> u32 {
        self.conn_cnt.load(Ordering::Relaxed)
    }

    pub fn flags(&self) -> LinkFlags {
        LinkFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: LinkFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }
}

/// A group of links sharing one transport-resource group.
#[derive(Debug)]
pub struct LinkGroup {
    id: LgrId,
    role: Role,
    is_smcd: bool,
    conns_num: AtomicU32,
    links: [Link; LINKS_PER_GROUP_MAX],
    torn_down: AtomicBool,
}

impl LinkGroup {
    pub fn new(id: LgrId, role: Role, is_smcd: bool) -> Self {
        Self {
            id,
            role,
            is_smcd,
            conns_num: AtomicU32::new(0),
            links: Default::default(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> LgrId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_smcd(&self) -> bool {
        self.is_smcd
    }

    pub fn links(&self) -> &[Link; LINKS_PER_GROUP_MAX] {
        &self.links
    }

    pub fn link(&self, index: usize) -> Option<&Link> {
        self.links.get(index)
    }

    pub fn conns_num(&self) -> u32 {
        self.conns_num.load(Ordering::Relaxed)
    }

    /// Account a connection on the given link.
    pub fn attach_conn(&self, index: usize) {
        if let Some(link) = self.link(index) {
            link.conn_cnt.fetch_add(1, Ordering::Relaxed);
            self.conns_num.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn detach_conn(&self, index: usize) {
        if let Some(link) = self.link(index) {
            // Saturate: a detach racing a link reset must not wrap.
            let _ = link
                .conn_cnt
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            let _ = self
                .conns_num
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
    }

    pub fn tear_down(&self) {
        self.torn_down.store(true, Ordering::Release);
        for link in &self.links {
            link.set_state(LinkState::Unusable);
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lgr_id_hex_round_trip() {
        let id: LgrId = "0a0B0c0D".parse().unwrap();
        assert_eq!(id, LgrId([0x0a, 0x0b, 0x0c, 0x0d]));
        assert_eq!(id.to_string(), "0A0B0C0D");
    }

    #[test]
    fn lgr_id_rejects_bad_input() {
        assert!("0A0B0C".parse::<LgrId>().is_err());
        assert!("0A0B0C0G".parse::<LgrId>().is_err());
        assert!("ééééé".parse::<LgrId>().is_err());
    }

    #[test]
    fn new_links_are_unusable() {
        let group = LinkGroup::new(LgrId([0; 4]), Role::Server, true);
        assert!(group.links().iter().all(|l| !l.usable()));
    }

    #[test]
    fn link_usability_tracks_state() {
        let link = Link::default();
        link.set_state(LinkState::Inactive);
        assert!(link.usable());
        link.activate(LinkIdentity::default());
        assert_eq!(link.state(), LinkState::Active);
        assert!(link.usable());
        link.set_state(LinkState::Unusable);
        assert!(!link.usable());
    }

    #[test]
    fn tear_down_marks_every_link_unusable() {
        let group = LinkGroup::new(LgrId([1; 4]), Role::Client, false);
        group.links()[1].activate(LinkIdentity::default());
        group.tear_down();
        assert!(group.is_torn_down());
        assert!(group.links().iter().all(|l| !l.usable()));
    }

    #[test]
    fn conn_accounting_saturates() {
        let group = LinkGroup::new(LgrId([1; 4]), Role::Client, false);
        group.attach_conn(0);
        group.attach_conn(0);
        group.detach_conn(0);
        group.detach_conn(0);
        group.detach_conn(0);
        assert_eq!(group.conns_num(), 0);
        assert_eq!(group.links()[0].conn_cnt(), 0);
        group.attach_conn(LINKS_PER_GROUP_MAX);
        assert_eq!(group.conns_num(), 0);
    }

    #[test]
    fn flags_keep_unknown_bits() {
        let link = Link::default();
        link.set_flags(LinkFlags::ANNOUNCE_PENDING | LinkFlags::from_bits_retain(1 << 40));
        assert!(link.flags().contains(LinkFlags::ANNOUNCE_PENDING));
        assert_eq!(link.flags().bits(), 1 | (1 << 40));
    }
}
