//! Built-in query templates.
//!
//! Per-deployment variants for the entity kinds the extractor ships with;
//! schemas differ across subgraphs, so some deployments carry wider
//! selections than the `default` fallback. Config-supplied templates are
//! merged on top of these.

use crate::catalog::QueryCatalog;

const TOKENS_DEFAULT: &str = r"{
  tokens(first: 1000) {
    id
    decimals
    name
    symbol
  }
}";

const TOKENS_BRIDGE: &str = r"{
  tokens(first: 1000) {
    id
    decimals
    name
    symbol
    vault {
      id
    }
    isNative
  }
}";

const TOKENS_AMM: &str = r"{
  tokens(first: 1000) {
    id
    decimals
    name
    symbol
    totalValueLockedUSD
    volume
    volumeUSD
  }
}";

const TRANSACTIONS_DEFAULT: &str = r"{
  transactions(first: 1000) {
    id
    blockNumber
    timestamp
  }
}";

const TRANSACTIONS_BRIDGE: &str = r"{
  transactions(first: 1000) {
    id
    blockNumber
    event
    from
    gasLimit
    gasPrice
    hash
    index
    timestamp
    to
    value
  }
}";

const FACTORIES_AMM: &str = r"{
  factories(first: 1000) {
    id
    poolCount
    txCount
    totalVolumeUSD
    owner
    totalFeesUSD
    untrackedVolumeUSD
  }
}";

const SWAPS_AMM: &str = r"{
  swaps(first: 1000) {
    amountUSD
    id
    origin
    recipient
    sender
    timestamp
  }
}";

const SWAPS_AMM_ALT: &str = r"{
  swaps(first: 1000) {
    id
    timestamp
    amountUSD
  }
}";

const BRIDGE_DEPLOYMENT: &str = "9cT3GzNxcLWFXGAgqdJsydZkh9ajKEXn4hKvkRLJHgwv";
const AMM_DEPLOYMENT: &str = "9EAxYE17Cc478uzFXRbM7PVnMUSsgb99XZiGxodbtpbk";
const AMM_ALT_DEPLOYMENT: &str = "EMnAvnfc1fwGSU6ToqYJCeEkXmSgmDmhwtyaha1tM5oi";

/// Build a catalog from the built-ins plus config-supplied overrides,
/// with the `_meta { deployment }` field appended everywhere.
#[must_use]
pub fn catalog_with_overrides(
    overrides: &std::collections::HashMap<String, std::collections::HashMap<String, String>>,
) -> QueryCatalog {
    let mut catalog = builtin_catalog();
    for (kind, variants) in overrides {
        for (endpoint, template) in variants {
            catalog.register(kind.clone(), endpoint.clone(), template.clone());
        }
    }
    catalog.add_meta_field();
    catalog
}

/// Build the catalog of built-in templates.
#[must_use]
pub fn builtin_catalog() -> QueryCatalog {
    let mut catalog = QueryCatalog::new();

    catalog.register_default("tokens", TOKENS_DEFAULT);
    catalog.register("tokens", BRIDGE_DEPLOYMENT, TOKENS_BRIDGE);
    catalog.register("tokens", AMM_DEPLOYMENT, TOKENS_AMM);

    catalog.register_default("transactions", TRANSACTIONS_DEFAULT);
    catalog.register("transactions", BRIDGE_DEPLOYMENT, TRANSACTIONS_BRIDGE);

    catalog.register("factories", AMM_DEPLOYMENT, FACTORIES_AMM);
    catalog.register("factories", AMM_ALT_DEPLOYMENT, FACTORIES_AMM);

    catalog.register("swaps", AMM_DEPLOYMENT, SWAPS_AMM);
    catalog.register("swaps", AMM_ALT_DEPLOYMENT, SWAPS_AMM_ALT);

    catalog
}
