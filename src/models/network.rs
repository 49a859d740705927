// Subnet prefixes and per-address occupancy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::VmWithHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Occupied,
    Free,
}

impl ScanStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Self::Occupied } else { Self::Free }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occupied => "occupied",
            Self::Free => "free",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "occupied" => Ok(Self::Occupied),
            "free" => Ok(Self::Free),
            other => anyhow::bail!("unknown scan status: {other}"),
        }
    }
}

/// First three octets of a /24 range, e.g. `192.168.1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubnetPrefix(String);

impl SubnetPrefix {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address `<prefix>.<host>`.
    pub fn address(&self, host: u8) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        for (slot, part) in octets.iter_mut().zip(self.0.split('.')) {
            *slot = part.parse().unwrap_or(0);
        }
        octets[3] = host;
        Ipv4Addr::from(octets)
    }

    /// All 256 addresses of the range, `.0` through `.255`.
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (0..=u8::MAX).map(|host| self.address(host))
    }

    pub fn contains(&self, ip: &str) -> bool {
        ip.rsplit_once('.').is_some_and(|(head, _)| head == self.0)
    }
}

impl FromStr for SubnetPrefix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        anyhow::ensure!(
            parts.len() == 3,
            "subnet prefix must have three octets (e.g. 192.168.1), got {s:?}"
        );
        let mut octets = Vec::with_capacity(3);
        for part in parts {
            anyhow::ensure!(
                !part.is_empty() && part.len() <= 3 && part.bytes().all(|b| b.is_ascii_digit()),
                "invalid octet {part:?} in subnet prefix {s:?}"
            );
            let octet: u8 = part.parse().map_err(|_| {
                anyhow::anyhow!("octet {part:?} out of range in subnet prefix {s:?}")
            })?;
            octets.push(octet.to_string());
        }
        Ok(Self(octets.join(".")))
    }
}

impl TryFrom<String> for SubnetPrefix {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SubnetPrefix> for String {
    fn from(p: SubnetPrefix) -> Self {
        p.0
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetOccupancyEntry {
    pub subnet: String,
    pub ip: String,
    pub status: ScanStatus,
    /// Unix millis.
    pub last_updated: i64,
}

/// What is known about one address: last probe result and the VMs reporting it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInspection {
    pub ip: String,
    pub status: Option<ScanStatus>,
    pub vms: Vec<VmWithHost>,
}
