//! The two roles of a pair session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PairError;

/// Which half of the rig this device plays.
///
/// Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairRole {
    /// Scans for the peer, runs clock sync and schedules captures.
    Primary,
    /// Advertises, announces itself with `Hello`, and supplies frames.
    Secondary,
}

impl PairRole {
    pub fn peer(&self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

impl fmt::Display for PairRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary"),
            Self::Secondary => write!(f, "Secondary"),
        }
    }
}

impl FromStr for PairRole {
    type Err = PairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(PairError::Config(format!("unknown role {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("Primary".parse::<PairRole>().unwrap(), PairRole::Primary);
        assert_eq!("secondary".parse::<PairRole>().unwrap(), PairRole::Secondary);
        assert!("left".parse::<PairRole>().is_err());
        assert_eq!(PairRole::Secondary.to_string(), "Secondary");
    }

    #[test]
    fn peer_is_the_other_role() {
        assert_eq!(PairRole::Primary.peer(), PairRole::Secondary);
        assert_eq!(PairRole::Secondary.peer(), PairRole::Primary);
    }
}
