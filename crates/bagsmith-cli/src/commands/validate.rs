use super::{json_pretty, print_report, profile_resolver, report_exit_code, CommandResult};
use bagsmith_core::{validate_discovered, CheckSet, ServiceConfig};
use std::path::Path;

pub fn run(
    config: &ServiceConfig,
    package: &Path,
    profile: Option<&str>,
    checks: CheckSet,
    json: bool,
) -> CommandResult {
    let resolver = profile_resolver(config);
    let options = bagsmith_core::ValidationOptions {
        checks,
        ..config.validation_options()
    };
    let (report, loaded) = validate_discovered(&resolver, profile, package, &options)?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
        println!("loaded from {}", loaded.reference);
    }
    Ok(report_exit_code(&report))
}
