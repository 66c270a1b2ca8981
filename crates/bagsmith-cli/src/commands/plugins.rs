use super::{json_pretty, CommandResult, EXIT_SUCCESS};
use bagsmith_core::ServiceConfig;
use bagsmith_mapping::TrustTier;

fn trust_label(trust: TrustTier) -> &'static str {
    match trust {
        TrustTier::Trusted => "trusted",
        TrustTier::Untrusted => "untrusted",
    }
}

pub fn run(config: &ServiceConfig, json: bool) -> CommandResult {
    let catalog = config.build_registry()?.describe();
    if json {
        println!("{}", json_pretty(&catalog)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("registered mappers:");
    for plugin in &catalog.plugins {
        println!(
            "  {:<20} {:<10} {} ({})",
            plugin.name.as_str(),
            plugin.context.as_str(),
            plugin.display_name,
            plugin.strategy
        );
        if !plugin.description.is_empty() {
            println!("      {}", plugin.description);
        }
        for (arg, spec) in plugin.contract.iter() {
            println!(
                "      --arg {arg}=<{}>{}",
                spec.kind.as_str(),
                if spec.required { " (required)" } else { "" }
            );
        }
    }
    println!("request-time strategies:");
    if catalog.strategies.is_empty() {
        println!("  (none enabled)");
    }
    for strategy in &catalog.strategies {
        println!(
            "  {:<12} {:<10} {}",
            strategy.strategy.as_str(),
            trust_label(strategy.trust),
            strategy.description
        );
    }
    Ok(EXIT_SUCCESS)
}
