//! Registry of tokens the downstream search knows how to price.

use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A known token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token contract
    pub address: Address,
    /// Ticker symbol
    pub symbol: String,
    /// ERC-20 decimals
    pub decimals: u8,
}

/// Known tokens keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRegistry {
    tokens: BTreeMap<Address, Token>,
}

impl TokenRegistry {
    /// Build from a list of tokens. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_tokens<I: IntoIterator<Item = Token>>(tokens: I) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| (t.address, t)).collect(),
        }
    }

    /// Load a JSON array of tokens.
    ///
    /// A missing file yields an empty registry, which disables the
    /// unknown-token purge.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but is not valid.
    pub fn load(path: &Path) -> TrackerResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Token file not found, unknown-token filtering disabled");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::config(
                format!("Failed to read token file: {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        let tokens: Vec<Token> = serde_json::from_str(&contents).map_err(|e| {
            TrackerError::config(
                format!("Failed to parse token file: {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        let registry = Self::from_tokens(tokens);
        info!(count = registry.len(), "Loaded token registry");
        Ok(registry)
    }

    /// Whether `address` is a known token.
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.tokens.contains_key(address)
    }

    /// Look up a token.
    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&Token> {
        self.tokens.get(address)
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }
}
