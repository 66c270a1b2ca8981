use super::{json_pretty, CommandError, CommandResult, EXIT_SUCCESS};
use bagsmith_schema::ChecksumAlgorithm;
use bagsmith_store::{collect_files, compute_manifests};
use std::collections::BTreeMap;
use std::path::Path;

/// Print manifests over every file below `dir`, paths relative to `dir`.
pub fn run(dir: &Path, algorithms: &[String], json: bool) -> CommandResult {
    if !dir.is_dir() {
        return Err(CommandError::failure(format!("{} is not a directory", dir.display())));
    }
    let algorithms = ChecksumAlgorithm::parse_list(algorithms)
        .map_err(|e| CommandError::config(e.to_string()))?;
    if algorithms.is_empty() {
        return Err(CommandError::config("at least one algorithm is required"));
    }
    let files = collect_files(dir, dir).map_err(|e| CommandError::failure(e.to_string()))?;
    let manifests = compute_manifests(dir, &files, &algorithms).map_err(|e| CommandError::failure(e.to_string()))?;

    if json {
        let payload: BTreeMap<&str, BTreeMap<&str, &str>> = manifests
            .iter()
            .map(|(alg, m)| (alg.as_str(), m.entries.iter().map(|(p, d)| (p.as_str(), d.as_str())).collect()))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if manifests.len() == 1 {
        for manifest in manifests.values() {
            print!("{}", manifest.to_text());
        }
    } else {
        for (algorithm, manifest) in &manifests {
            println!("# {algorithm}");
            print!("{}", manifest.to_text());
        }
    }
    Ok(EXIT_SUCCESS)
}
