//! Stacks network definitions, address rules and asset identifiers.
//!
//! Networks are identified on the wire by CAIP-2 ids in the `stacks`
//! namespace. Mainnet uses chain id `1`; testnet (and every other non-mainnet
//! deployment) uses `2147483648` and testnet address versions.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::amount::Currency;
use crate::chain::ChainId;

/// CAIP-2 namespace for Stacks chains.
pub const STACKS_NAMESPACE: &str = "stacks";

/// Asset identifier for the native STX token.
pub const STX_ASSET: &str = "STX";

/// sBTC token contract on Stacks mainnet.
pub const SBTC_CONTRACT_MAINNET: &str = "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4.sbtc-token";

/// sBTC token contract on Stacks testnet.
pub const SBTC_CONTRACT_TESTNET: &str = "ST1F7QA2MDF17S807EPA36TSS8AMEFY4KA9TVGWXT.sbtc-token";

static NETWORK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^stacks:\d+$").expect("valid network id pattern"));

// c32 alphabet: digits and uppercase letters without I, L, O and U.
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^S([PMTN])[0-9A-HJKMNP-TV-Z]{38,39}$").expect("valid address pattern")
});

static CONTRACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-_]{0,127}$").expect("valid contract name pattern")
});

/// A known network definition with its chain ID and human-readable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g., "mainnet", "testnet")
    pub name: &'static str,
    /// CAIP-2 namespace
    pub namespace: &'static str,
    /// Chain reference
    pub reference: &'static str,
}

impl NetworkInfo {
    /// Create a `ChainId` from this network info
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

/// Well-known Stacks networks with their names and CAIP-2 identifiers.
pub static STACKS_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "mainnet",
        namespace: STACKS_NAMESPACE,
        reference: "1",
    },
    NetworkInfo {
        name: "testnet",
        namespace: STACKS_NAMESPACE,
        reference: "2147483648",
    },
];

/// The two address families a Stacks chain can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StacksNetwork {
    /// Stacks mainnet (`stacks:1`), `SP`/`SM` addresses.
    Mainnet,
    /// Stacks testnet and other non-mainnet chains, `ST`/`SN` addresses.
    Testnet,
}

impl StacksNetwork {
    /// Returns the well-known name of the network.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    /// Returns the canonical CAIP-2 chain id.
    #[must_use]
    pub fn chain_id(self) -> ChainId {
        let reference = match self {
            Self::Mainnet => STACKS_NETWORKS[0].reference,
            Self::Testnet => STACKS_NETWORKS[1].reference,
        };
        ChainId::new(STACKS_NAMESPACE, reference)
    }

    /// Classifies a chain id. Returns `None` outside the `stacks` namespace.
    #[must_use]
    pub fn from_chain_id(chain_id: &ChainId) -> Option<Self> {
        if chain_id.namespace() != STACKS_NAMESPACE {
            return None;
        }
        if chain_id.reference() == STACKS_NETWORKS[0].reference {
            Some(Self::Mainnet)
        } else {
            Some(Self::Testnet)
        }
    }

    /// Returns `true` for mainnet.
    #[must_use]
    pub const fn is_mainnet(self) -> bool {
        matches!(self, Self::Mainnet)
    }

    /// Returns the default sBTC token contract for this network.
    #[must_use]
    pub const fn sbtc_contract(self) -> &'static str {
        match self {
            Self::Mainnet => SBTC_CONTRACT_MAINNET,
            Self::Testnet => SBTC_CONTRACT_TESTNET,
        }
    }

    /// Checks that `address` is a standard principal of this network.
    ///
    /// The check is syntactic: prefix, version character, c32 alphabet and
    /// length. The c32check checksum is left to the facilitator.
    #[must_use]
    pub fn is_valid_address(self, address: &str) -> bool {
        let Some(captures) = ADDRESS.captures(address) else {
            return false;
        };
        let version = &captures[1];
        match self {
            Self::Mainnet => matches!(version, "P" | "M"),
            Self::Testnet => matches!(version, "T" | "N"),
        }
    }

    /// Checks that `principal` is a contract principal (`<address>.<name>`) of this network.
    #[must_use]
    pub fn is_valid_contract(self, principal: &str) -> bool {
        principal
            .split_once('.')
            .is_some_and(|(address, name)| {
                self.is_valid_address(address) && CONTRACT_NAME.is_match(name)
            })
    }

    /// Resolves the asset identifier a price in `currency` settles in.
    ///
    /// `sbtc_override` replaces the built-in sBTC contract when set.
    #[must_use]
    pub fn asset_for(self, currency: Currency, sbtc_override: Option<&str>) -> String {
        match currency {
            Currency::Stx => STX_ASSET.to_owned(),
            Currency::Sbtc => sbtc_override
                .unwrap_or_else(|| self.sbtc_contract())
                .to_owned(),
        }
    }
}

impl fmt::Display for StacksNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a network name or id cannot be resolved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown Stacks network {0:?}")]
pub struct UnknownNetwork(String);

impl FromStr for StacksNetwork {
    type Err = UnknownNetwork;

    /// Accepts a well-known name (`mainnet`, `testnet`) or a `stacks:<id>` CAIP-2 id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(info) = STACKS_NETWORKS
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(trimmed))
        {
            return Self::from_chain_id(&info.chain_id()).ok_or_else(|| UnknownNetwork(s.into()));
        }
        if !is_valid_network_id(trimmed) {
            return Err(UnknownNetwork(s.into()));
        }
        trimmed
            .parse::<ChainId>()
            .ok()
            .and_then(|chain_id| Self::from_chain_id(&chain_id))
            .ok_or_else(|| UnknownNetwork(s.into()))
    }
}

/// Checks the syntactic shape of a network id: `stacks:` followed by a numeric chain id.
#[must_use]
pub fn is_valid_network_id(network: &str) -> bool {
    NETWORK_ID.is_match(network)
}
