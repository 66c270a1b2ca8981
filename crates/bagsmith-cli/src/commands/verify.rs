use super::{json_pretty, CommandError, CommandResult, EXIT_INVALID, EXIT_SUCCESS};
use bagsmith_store::{verify_package, Package};
use std::path::Path;

pub fn run(path: &Path, json: bool) -> CommandResult {
    let package = Package::open(path).map_err(|e| CommandError::failure(e.to_string()))?;
    let report = verify_package(&package).map_err(|e| CommandError::failure(e.to_string()))?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "fixity: {}/{} digests passed across {} manifests",
            report.passed, report.files_checked, report.manifests_checked
        );
        for algorithm in &report.skipped_algorithms {
            println!("  SKIP {algorithm}: unsupported algorithm");
        }
        for f in &report.failed {
            println!("  FAIL {}: {}", f.path, f.reason);
        }
    }

    if report.is_ok() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_INVALID)
    }
}
