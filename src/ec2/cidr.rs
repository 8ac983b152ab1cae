use crate::error::{Result, SynthError};

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Prefix lengths AWS accepts for VPCs and subnets.
pub const MIN_PREFIX: u8 = 16;
pub const MAX_PREFIX: u8 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    network: Ipv4Addr,
    prefix: u8,
}

impl CidrBlock {
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Splits the block into `count` equal subnets, rounded up to a power of two.
    pub fn split(&self, count: usize) -> Result<Vec<CidrBlock>> {
        if count == 0 {
            return Err(SynthError::InvalidNetwork(
                "cannot split a CIDR block into zero subnets".to_string(),
            ));
        }
        let extra_bits = usize::BITS - (count - 1).leading_zeros();
        let prefix = u32::from(self.prefix) + extra_bits;
        if prefix > u32::from(MAX_PREFIX) {
            return Err(SynthError::InvalidNetwork(format!(
                "{} is too small for {} subnets",
                self, count
            )));
        }

        let base = u32::from(self.network);
        let size = 1u32 << (32 - prefix);
        Ok((0..count as u32)
            .map(|index| CidrBlock {
                network: Ipv4Addr::from(base + index * size),
                prefix: prefix as u8,
            })
            .collect())
    }
}

impl FromStr for CidrBlock {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SynthError::InvalidCidr(s.to_string());
        let (address, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
            return Err(invalid());
        }

        let mask = u32::MAX << (32 - u32::from(prefix));
        if u32::from(network) & !mask != 0 {
            return Err(invalid());
        }
        Ok(CidrBlock { network, prefix })
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse() {
        let block: CidrBlock = "10.0.0.0/16".parse().unwrap();
        assert_eq!(block.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(block.prefix(), 16);
        assert_eq!(block.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_parse_rejects_bad_blocks() {
        for bad in ["10.0.0.0", "10.0.0.0/8", "10.0.0.0/29", "10.0.0.1/16", "nope/16", "10.0.0.0/x"] {
            assert!(
                matches!(bad.parse::<CidrBlock>(), Err(SynthError::InvalidCidr(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_split_two_azs() {
        let block: CidrBlock = "10.0.0.0/16".parse().unwrap();
        let subnets: Vec<String> = block.split(4).unwrap().iter().map(ToString::to_string).collect();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn test_split_rounds_up_to_power_of_two() {
        let block: CidrBlock = "10.0.0.0/16".parse().unwrap();
        let subnets = block.split(6).unwrap();
        assert_eq!(subnets.len(), 6);
        assert!(subnets.iter().all(|subnet| subnet.prefix() == 19));
        assert_eq!(subnets[5].to_string(), "10.0.160.0/19");
    }

    #[test]
    fn test_split_too_small() {
        let block: CidrBlock = "10.0.0.0/27".parse().unwrap();
        assert!(matches!(block.split(4), Err(SynthError::InvalidNetwork(_))));
        assert!(matches!(block.split(0), Err(SynthError::InvalidNetwork(_))));
    }
}
