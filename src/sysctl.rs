use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::SmcError;
use crate::model::BufferSizes;

/// Smallest send or receive buffer a connection may be given.
pub const BUF_MIN_SIZE: i32 = 16384;
pub const AUTOCORKING_DEFAULT_SIZE: u32 = 64 * 1024;
pub const WMEM_DEFAULT: i32 = 256 * 1024;
pub const RMEM_DEFAULT: i32 = 384 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tunable {
    AutocorkingSize,
    WmemDefault,
    RmemDefault,
}

impl Tunable {
    pub const ALL: [Tunable; 3] = [Self::AutocorkingSize, Self::WmemDefault, Self::RmemDefault];

    pub fn name(self) -> &'static str {
        match self {
            Self::AutocorkingSize => "autocorking_size",
            Self::WmemDefault => "wmem_default",
            Self::RmemDefault => "rmem_default",
        }
    }
}

impl FromStr for Tunable {
    type Err = SmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| SmcError::UnknownTunable(s.to_string()))
    }
}

/// Per-namespace tunable values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub autocorking_size: u32,
    pub wmem_default: i32,
    pub rmem_default: i32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            autocorking_size: AUTOCORKING_DEFAULT_SIZE,
            wmem_default: WMEM_DEFAULT,
            rmem_default: RMEM_DEFAULT,
        }
    }
}

/// A parsed and range-checked write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Update {
    Unsigned(u32),
    Signed(i32),
}

impl Tunables {
    pub fn get(&self, t: Tunable) -> i64 {
        match t {
            Tunable::AutocorkingSize => self.autocorking_size.into(),
            Tunable::WmemDefault => self.wmem_default.into(),
            Tunable::RmemDefault => self.rmem_default.into(),
        }
    }

    pub fn buffers(&self) -> BufferSizes {
        BufferSizes {
            sndbuf: self.wmem_default,
            rcvbuf: self.rmem_default,
            autocorking_size: self.autocorking_size,
        }
    }

    /// Check values loaded from a state file against the write rules.
    pub fn validate(&self) -> Result<(), SmcError> {
        for t in [Tunable::WmemDefault, Tunable::RmemDefault] {
            check_min(t, self.get(t))?;
        }
        Ok(())
    }

    fn apply(&mut self, t: Tunable, update: Update) {
        match (t, update) {
            (Tunable::AutocorkingSize, Update::Unsigned(v)) => self.autocorking_size = v,
            (Tunable::WmemDefault, Update::Signed(v)) => self.wmem_default = v,
            (Tunable::RmemDefault, Update::Signed(v)) => self.rmem_default = v,
            _ => {}
        }
    }
}

fn check_min(t: Tunable, value: i64) -> Result<(), SmcError> {
    if value < i64::from(BUF_MIN_SIZE) {
        return Err(SmcError::BelowMinimum {
            name: t.name(),
            min: BUF_MIN_SIZE.into(),
            value,
        });
    }
    Ok(())
}

fn parse_update(t: Tunable, raw: &str) -> Result<Update, SmcError> {
    let s = raw.trim();
    let invalid = || SmcError::InvalidValue {
        name: t.name(),
        value: raw.to_string(),
    };
    match t {
        Tunable::AutocorkingSize => s.parse::<u32>().map(Update::Unsigned).map_err(|_| invalid()),
        Tunable::WmemDefault | Tunable::RmemDefault => {
            let v = s.parse::<i32>().map_err(|_| invalid())?;
            check_min(t, v.into())?;
            Ok(Update::Signed(v))
        }
    }
}

/// Tunables of one namespace. Readers take a lock-free snapshot; a write
/// replaces the snapshot and only affects connections created afterwards.
pub struct NetTunables {
    current: ArcSwap<Tunables>,
}

impl Default for NetTunables {
    fn default() -> Self {
        Self::new(Tunables::default())
    }
}

impl NetTunables {
    pub fn new(initial: Tunables) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Tunables {
        **self.current.load()
    }

    /// Value of `name` as it would be printed by the sysctl file.
    pub fn read(&self, name: &str) -> Result<String, SmcError> {
        let t: Tunable = name.parse()?;
        Ok(self.load().get(t).to_string())
    }

    /// Parse and store a new value. Rejected writes leave the value unchanged.
    pub fn write(&self, name: &str, raw: &str) -> Result<(), SmcError> {
        let t: Tunable = name.parse()?;
        let update = match parse_update(t, raw) {
            Ok(u) => u,
            Err(e) => {
                log::warn!("sysctl: rejected write to {}: {e}", t.name());
                return Err(e);
            }
        };
        self.current.rcu(|cur| {
            let mut next = **cur;
            next.apply(t, update);
            Arc::new(next)
        });
        log::debug!("sysctl: {} = {}", t.name(), raw.trim());
        Ok(())
    }
}
