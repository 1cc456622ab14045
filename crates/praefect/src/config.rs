use anyhow::Context;
use praefect_base::Config;
use std::path::Path;

/// Loads `Config` from a TOML file, then layers a small set of
/// environment variable overrides on top — the shared auth token and
/// the Postgres connection string are the two values operators most
/// often need to inject per-environment rather than bake into the
/// checked-in TOML (spec.md §6).
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading config file '{}'", path.as_ref().display()))?;
    let mut config: Config = toml::from_str(&raw).context("parsing config TOML")?;

    if let Ok(token) = std::env::var("PRAEFECT_AUTH_TOKEN") {
        config.auth_token = token;
    }

    config.validate().context("validating config")?;
    Ok(config)
}

/// The Postgres connection string backing the datastore and queue,
/// read separately from the TOML config since it usually carries a
/// credential best kept out of a checked-in file.
pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set")
}
