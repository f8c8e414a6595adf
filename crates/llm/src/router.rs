//! Candidate selection for the upstream failover loop.

use config::{Config, UpstreamService};

/// One upstream eligible for a request, with the model name it should see.
#[derive(Debug)]
pub(crate) struct Candidate<'a> {
    pub service: &'a UpstreamService,
    /// The requested model after this service's `model_mapping`.
    pub model: String,
}

/// Compute the ordered attempt list for a requested model.
///
/// Per-service model mappings apply before matching. A service with an
/// empty `models` list is a wildcard. Ordering is priority-descending with
/// configuration order breaking ties, and a service never appears twice.
/// Keyless services are placeholders, skipped unless key passthrough can
/// supply the client's own credential.
pub(crate) fn candidates<'a>(
    config: &'a Config,
    requested_model: &str,
    client_key_present: bool,
) -> Vec<Candidate<'a>> {
    let usable = |service: &UpstreamService| {
        service.has_api_key() || (config.features.key_passthrough && client_key_present)
    };

    let mut ranked: Vec<(i32, usize, Candidate<'a>)> = config
        .upstream_services
        .iter()
        .enumerate()
        .filter_map(|(position, service)| {
            let mapped = service.map_model(requested_model);

            if !service.serves_model(mapped) {
                return None;
            }

            if !usable(service) {
                log::debug!("Skipping keyless upstream '{}'", service.name);
                return None;
            }

            Some((
                service.priority,
                position,
                Candidate {
                    service,
                    model: mapped.to_string(),
                },
            ))
        })
        .collect();

    // Unmatched models can still reach every usable upstream verbatim
    // when passthrough is on.
    if ranked.is_empty() && config.features.model_passthrough {
        ranked = config
            .upstream_services
            .iter()
            .enumerate()
            .filter(|(_, service)| usable(service))
            .map(|(position, service)| {
                (
                    service.priority,
                    position,
                    Candidate {
                        service,
                        model: service.map_model(requested_model).to_string(),
                    },
                )
            })
            .collect();
    }

    ranked.sort_by_key(|(priority, position, _)| (std::cmp::Reverse(*priority), *position));
    ranked.into_iter().map(|(_, _, candidate)| candidate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn config(toml: &str) -> Config {
        toml::from_str(toml).expect("valid config")
    }

    #[test]
    fn candidates_sort_by_priority_then_configuration_order() {
        let config = config(indoc! {r#"
            [[upstream_services]]
            name = "low"
            service_type = "openai"
            api_key = "sk-a"
            priority = 10
            models = ["gpt-4"]

            [[upstream_services]]
            name = "high"
            service_type = "anthropic"
            api_key = "sk-b"
            priority = 100
            models = ["gpt-4"]

            [[upstream_services]]
            name = "also-high"
            service_type = "openai"
            api_key = "sk-c"
            priority = 100
            models = ["gpt-4"]
        "#});

        let names: Vec<&str> = candidates(&config, "gpt-4", false)
            .iter()
            .map(|c| c.service.name.as_str())
            .collect();

        assert_eq!(names, ["high", "also-high", "low"]);
    }

    #[test]
    fn model_mapping_applies_before_matching() {
        let config = config(indoc! {r#"
            [[upstream_services]]
            name = "mapped"
            service_type = "anthropic"
            api_key = "sk-a"
            models = ["claude-sonnet-4-20250514"]

            [upstream_services.model_mapping]
            "gpt-4" = "claude-sonnet-4-20250514"
        "#});

        let list = candidates(&config, "gpt-4", false);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn wildcard_services_match_any_model() {
        let config = config(indoc! {r#"
            [[upstream_services]]
            name = "wildcard"
            service_type = "openai"
            api_key = "sk-a"
        "#});

        let list = candidates(&config, "entirely-unknown", false);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].model, "entirely-unknown");
    }

    #[test]
    fn keyless_placeholders_are_skipped_without_passthrough() {
        let config = config(indoc! {r#"
            [[upstream_services]]
            name = "placeholder"
            service_type = "openai"
            api_key = ""
            models = ["gpt-4"]

            [[upstream_services]]
            name = "usable"
            service_type = "openai"
            api_key = "sk-b"
            models = ["gpt-4"]
        "#});

        let names: Vec<&str> = candidates(&config, "gpt-4", false)
            .iter()
            .map(|c| c.service.name.as_str())
            .collect();
        assert_eq!(names, ["usable"]);
    }

    #[test]
    fn key_passthrough_revives_keyless_services() {
        let config = config(indoc! {r#"
            [features]
            key_passthrough = true

            [[upstream_services]]
            name = "placeholder"
            service_type = "openai"
            api_key = ""
            models = ["gpt-4"]
        "#});

        assert!(candidates(&config, "gpt-4", false).is_empty());
        assert_eq!(candidates(&config, "gpt-4", true).len(), 1);
    }

    #[test]
    fn model_passthrough_rescues_unmatched_models() {
        let config = config(indoc! {r#"
            [features]
            model_passthrough = true

            [[upstream_services]]
            name = "narrow"
            service_type = "openai"
            api_key = "sk-a"
            models = ["gpt-4"]
        "#});

        let list = candidates(&config, "mystery-model", false);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].model, "mystery-model");
    }
}
