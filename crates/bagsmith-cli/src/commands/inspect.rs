use super::{json_pretty, CommandError, CommandResult, EXIT_SUCCESS};
use bagsmith_store::Package;
use std::path::Path;

pub fn run(path: &Path, json: bool) -> CommandResult {
    let package = Package::open(path).map_err(|e| CommandError::failure(e.to_string()))?;

    if json {
        let bag_info: Vec<_> = package
            .bag_info
            .iter()
            .map(|(key, values)| serde_json::json!({ "key": key, "values": values }))
            .collect();
        let payload = serde_json::json!({
            "path": package.root(),
            "version": package.version,
            "encoding": package.encoding,
            "bag_info": bag_info,
            "manifests": package.manifests.keys().collect::<Vec<_>>(),
            "tag_manifests": package.tag_manifests.keys().collect::<Vec<_>>(),
            "payload_files": package.payload_files.len(),
            "tag_files": package.tag_files,
            "fetch": package.has_fetch,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("package:       {}", package.root().display());
    println!("version:       {}", package.version.as_deref().unwrap_or("(missing)"));
    println!("encoding:      {}", package.encoding.as_deref().unwrap_or("(missing)"));
    println!("payload files: {}", package.payload_files.len());
    println!(
        "manifests:     {}",
        package.manifests.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    println!(
        "tag manifests: {}",
        package.tag_manifests.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    if package.has_fetch {
        println!("fetch.txt:     present");
    }
    println!("bag-info:");
    for (key, values) in package.bag_info.iter() {
        for value in values {
            println!("  {key}: {value}");
        }
    }
    if !package.tag_files.is_empty() {
        println!("tag files:");
        for file in &package.tag_files {
            println!("  {file}");
        }
    }
    Ok(EXIT_SUCCESS)
}
