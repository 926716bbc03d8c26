//! Write and read concern levels
//!
//! Concerns are attached to individual operations and never persisted.

use std::fmt;
use std::str::FromStr;

use mongodb::options::{Acknowledgment, ReadConcern, WriteConcern};

/// Acknowledgment a write must reach before the issuing call returns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteConcernLevel {
    /// Acknowledged by this many data-bearing members (`w: <n>`)
    Nodes(u32),
    /// Acknowledged by a majority of voting members (`w: "majority"`)
    Majority,
}

impl WriteConcernLevel {
    /// `w: 1`, acknowledged by the primary alone
    pub fn single_node() -> Self {
        WriteConcernLevel::Nodes(1)
    }

    /// Acknowledgments required from a cluster whose write majority is `majority`
    pub fn required_acks(&self, majority: usize) -> usize {
        match self {
            WriteConcernLevel::Nodes(n) => *n as usize,
            WriteConcernLevel::Majority => majority,
        }
    }

    pub fn to_driver(self) -> WriteConcern {
        let w = match self {
            WriteConcernLevel::Nodes(n) => Acknowledgment::Nodes(n),
            WriteConcernLevel::Majority => Acknowledgment::Majority,
        };
        let mut concern = WriteConcern::default();
        concern.w = Some(w);
        concern
    }
}

impl fmt::Display for WriteConcernLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteConcernLevel::Nodes(n) => write!(f, "{}", n),
            WriteConcernLevel::Majority => write!(f, "majority"),
        }
    }
}

impl FromStr for WriteConcernLevel {
    type Err = ConcernParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "majority" {
            return Ok(WriteConcernLevel::Majority);
        }
        s.parse::<u32>()
            .map(WriteConcernLevel::Nodes)
            .map_err(|_| ConcernParseError(s.to_string()))
    }
}

/// Visibility guarantee a read demands of the data it returns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadConcernLevel {
    /// Node-local state, possibly not yet replicated
    Local,
    /// Only data acknowledged by a majority
    Majority,
}

impl ReadConcernLevel {
    pub fn to_driver(self) -> ReadConcern {
        match self {
            ReadConcernLevel::Local => ReadConcern::local(),
            ReadConcernLevel::Majority => ReadConcern::majority(),
        }
    }
}

impl fmt::Display for ReadConcernLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadConcernLevel::Local => write!(f, "local"),
            ReadConcernLevel::Majority => write!(f, "majority"),
        }
    }
}

impl FromStr for ReadConcernLevel {
    type Err = ConcernParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ReadConcernLevel::Local),
            "majority" => Ok(ReadConcernLevel::Majority),
            other => Err(ConcernParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised concern level '{0}'")]
pub struct ConcernParseError(pub String);

/// Per-operation concern overrides; `None` falls back to the store default
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Concerns {
    pub write: Option<WriteConcernLevel>,
    pub read: Option<ReadConcernLevel>,
}

impl Concerns {
    pub fn new(write: Option<WriteConcernLevel>, read: Option<ReadConcernLevel>) -> Self {
        Concerns { write, read }
    }

    /// Layer `overrides` on top of `self`; unset fields keep the current value
    pub fn overlay(self, overrides: Concerns) -> Concerns {
        Concerns {
            write: overrides.write.or(self.write),
            read: overrides.read.or(self.read),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_concern_tokens() {
        assert_eq!("1".parse::<WriteConcernLevel>().unwrap(), WriteConcernLevel::Nodes(1));
        assert_eq!(
            "majority".parse::<WriteConcernLevel>().unwrap(),
            WriteConcernLevel::Majority
        );
        assert!("most".parse::<WriteConcernLevel>().is_err());
        assert_eq!(WriteConcernLevel::Majority.to_string(), "majority");
        assert_eq!(WriteConcernLevel::Nodes(2).to_string(), "2");
    }

    #[test]
    fn test_read_concern_tokens() {
        assert_eq!("local".parse::<ReadConcernLevel>().unwrap(), ReadConcernLevel::Local);
        assert_eq!(
            "majority".parse::<ReadConcernLevel>().unwrap(),
            ReadConcernLevel::Majority
        );
        assert_eq!(
            "linearizable".parse::<ReadConcernLevel>().unwrap_err(),
            ConcernParseError("linearizable".to_string())
        );
    }

    #[test]
    fn test_required_acks() {
        assert_eq!(WriteConcernLevel::single_node().required_acks(3), 1);
        assert_eq!(WriteConcernLevel::Majority.required_acks(3), 3);
    }

    #[test]
    fn test_overlay_keeps_unset_fields() {
        let base = Concerns::new(Some(WriteConcernLevel::Majority), None);
        let scoped = base.overlay(Concerns::new(None, Some(ReadConcernLevel::Local)));
        assert_eq!(scoped.write, Some(WriteConcernLevel::Majority));
        assert_eq!(scoped.read, Some(ReadConcernLevel::Local));
        // base is a copy and stays untouched
        assert_eq!(base.read, None);
    }

    #[test]
    fn test_driver_conversion() {
        let wc = WriteConcernLevel::Majority.to_driver();
        assert_eq!(wc.w, Some(Acknowledgment::Majority));
        let wc = WriteConcernLevel::Nodes(1).to_driver();
        assert_eq!(wc.w, Some(Acknowledgment::Nodes(1)));
    }
}
