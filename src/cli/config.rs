//! `cq config` - print the resolved configuration

use crate::cli::style::Stylize;
use anstream::println;
use anyhow::{Context, Result};
use cq_pool::config::{PoolConfig, default_config_path};
use std::path::Path;

/// Print `config` as TOML, noting where it was loaded from
pub fn run_config(config: &PoolConfig, path: Option<&Path>) -> Result<()> {
    let source = path
        .map(Path::to_path_buf)
        .or_else(|| default_config_path().filter(|p| p.exists()))
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    println!("{}", format!("# {source}").muted());

    let text = toml::to_string_pretty(config).context("serializing configuration")?;
    println!("{text}");
    Ok(())
}
