//! `subharvest check`: validate configuration and catalog coverage.

use std::path::Path;

use anyhow::{Context, Result};

use subharvest_engine::config::{parse_config, validate_config};
use subharvest_engine::queries;
use subharvest_state::FileCursorStore;
use subharvest_types::{Endpoint, QueryKind};

pub fn execute(config_path: &Path) -> Result<()> {
    let config = parse_config(config_path)?;
    validate_config(&config)?;
    println!("configuration: ok");

    let catalog = queries::catalog_with_overrides(&config.queries);
    let mut missing = 0_usize;
    for endpoint in &config.endpoints {
        for kind in &config.kinds {
            let endpoint = Endpoint::new(endpoint);
            let kind = QueryKind::new(kind);
            if catalog.base(&kind, &endpoint).is_none() {
                println!("  missing query: {kind} on {endpoint}");
                missing += 1;
            }
        }
    }
    let pairs = config.endpoints.len() * config.kinds.len();
    println!(
        "query catalog: {}/{} (endpoint, kind) pairs covered",
        pairs - missing,
        pairs
    );

    FileCursorStore::open(&config.state.dir)
        .with_context(|| format!("state directory {} is not writable", config.state.dir))?;
    println!("state directory: ok ({})", config.state.dir);

    if missing > 0 {
        anyhow::bail!("{missing} (endpoint, kind) pairs have no query template");
    }
    Ok(())
}
