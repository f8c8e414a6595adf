use std::path::Path;

use anyhow::bail;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.upstream_services.is_empty() {
        bail!(
            "No upstream services configured. Toolify requires at least one \
             [[upstream_services]] entry to route requests."
        );
    }

    let mut seen = std::collections::HashSet::new();

    for service in &config.upstream_services {
        if service.name.is_empty() {
            bail!("Upstream services require a non-empty name");
        }

        if !seen.insert(service.name.as_str()) {
            bail!("Duplicate upstream service name '{}'", service.name);
        }

        if !service.has_api_key() && !config.features.key_passthrough {
            log::warn!(
                "Upstream service '{}' has no api_key and key_passthrough is disabled; \
                 it will be skipped during routing",
                service.name
            );
        }
    }

    Ok(())
}
