use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Extraction strategies in escalation order. Variant order is the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Plain HTTP GET with a fixed browser user agent.
    Basic,
    /// HTTP GET with a rotated user agent and a same-origin referer.
    Enhanced,
    /// Full browser header set and cookie jar, for sites behind bot walls.
    Bypass,
    /// Page rendered by a headless browser.
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub name: &'static str,
    pub ordinal: u8,
    pub capability_cost: u32,
}

const DESCRIPTORS: [StrategyDescriptor; 4] = [
    StrategyDescriptor {
        name: "basic",
        ordinal: 0,
        capability_cost: 1,
    },
    StrategyDescriptor {
        name: "enhanced",
        ordinal: 1,
        capability_cost: 2,
    },
    StrategyDescriptor {
        name: "bypass",
        ordinal: 2,
        capability_cost: 5,
    },
    StrategyDescriptor {
        name: "browser",
        ordinal: 3,
        capability_cost: 20,
    },
];

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Basic,
        Strategy::Enhanced,
        Strategy::Bypass,
        Strategy::Browser,
    ];

    pub fn descriptor(self) -> StrategyDescriptor {
        let index = match self {
            Strategy::Basic => 0,
            Strategy::Enhanced => 1,
            Strategy::Bypass => 2,
            Strategy::Browser => 3,
        };
        DESCRIPTORS[index]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn ordinal(self) -> u8 {
        self.descriptor().ordinal
    }

    pub fn capability_cost(self) -> u32 {
        self.descriptor().capability_cost
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("strategy chain is empty")]
    Empty,
    #[error("unknown strategy {0:?}")]
    UnknownStrategy(String),
}

impl FromStr for Strategy {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // Aliases kept for names the old configuration files used.
        let wanted = match wanted.as_str() {
            "cloudscraper" => "bypass",
            "mcp" | "mcp_playwright" | "playwright" => "browser",
            other => other,
        };
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| ChainError::UnknownStrategy(s.trim().to_string()))
    }
}

/// A validated, non-empty chain sorted by ascending ordinal with no repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyChain(Vec<Strategy>);

impl StrategyChain {
    pub fn new(strategies: impl IntoIterator<Item = Strategy>) -> Result<Self, ChainError> {
        let mut strategies: Vec<Strategy> = strategies.into_iter().collect();
        strategies.sort_by_key(|s| s.ordinal());
        strategies.dedup();
        if strategies.is_empty() {
            return Err(ChainError::Empty);
        }
        Ok(Self(strategies))
    }

    /// Parses a comma separated list such as `"basic,enhanced"`.
    pub fn parse_list(raw: &str) -> Result<Self, ChainError> {
        let parsed = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Strategy::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    pub fn full() -> Self {
        Self(Strategy::ALL.to_vec())
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_ordinals_follow_variant_order() {
        let ordinals: Vec<u8> = Strategy::ALL.iter().map(|s| s.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
        let costs: Vec<u32> = Strategy::ALL.iter().map(|s| s.capability_cost()).collect();
        assert!(costs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn chain_is_sorted_and_deduplicated() {
        let chain = StrategyChain::new([
            Strategy::Browser,
            Strategy::Basic,
            Strategy::Browser,
            Strategy::Enhanced,
        ])
        .unwrap();
        assert_eq!(
            chain.strategies(),
            &[Strategy::Basic, Strategy::Enhanced, Strategy::Browser]
        );
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert_eq!(StrategyChain::new([]), Err(ChainError::Empty));
        assert_eq!(StrategyChain::parse_list(" , "), Err(ChainError::Empty));
    }

    #[test]
    fn parse_list_accepts_aliases_and_rejects_unknown_names() {
        let chain = StrategyChain::parse_list("mcp, Basic,cloudscraper").unwrap();
        assert_eq!(
            chain.strategies(),
            &[Strategy::Basic, Strategy::Bypass, Strategy::Browser]
        );
        assert_eq!(
            StrategyChain::parse_list("basic,teleport"),
            Err(ChainError::UnknownStrategy("teleport".to_string()))
        );
    }
}
