use super::{
    json_pretty, print_report, profile_resolver, report_exit_code, spin_fail, spin_ok, spinner,
    CommandError, CommandResult, EXIT_SUCCESS,
};
use bagsmith_core::{serialize_package, today, BuildRequest, Builder, CancelToken, ServiceConfig};
use bagsmith_mapping::PluginSpec;
use bagsmith_schema::{PluginContext, PluginName};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct BuildArgs {
    pub entity: PathBuf,
    pub dest: PathBuf,
    pub plugin: PluginSpec,
    /// Overrides `build.manifests` when set.
    pub manifests: Option<Vec<String>>,
    pub tag_manifests: Option<Vec<String>>,
    pub reproducible: bool,
    /// Validate the package against this profile after building.
    pub profile: Option<String>,
    pub serialize: bool,
}

/// Assemble the mapper choice from the command line: a JSON spec file wins
/// over a registered name; `KEY=VALUE` arguments replace the file's own.
pub fn plugin_spec(
    name: &str,
    context: Option<&str>,
    spec_file: Option<&Path>,
    args: &[String],
) -> Result<PluginSpec, CommandError> {
    let spec = match spec_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| CommandError::config(format!("cannot read {}: {e}", path.display())))?;
            serde_json::from_str(&text)
                .map_err(|e| CommandError::config(format!("invalid mapper spec {}: {e}", path.display())))?
        }
        None => PluginSpec::Registered {
            name: PluginName::new(name),
            context: context.map(PluginContext::new),
            args: serde_json::Map::new(),
        },
    };
    if args.is_empty() {
        return Ok(spec);
    }
    let mut map = serde_json::Map::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| CommandError::config(format!("mapper argument '{arg}' is not KEY=VALUE")))?;
        // JSON if it parses, a plain string otherwise.
        let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
        map.insert(key.to_owned(), value);
    }
    Ok(spec.with_args(map))
}

/// `--tag-manifests ""` means no tag manifests, not one empty name.
fn non_empty(list: Option<Vec<String>>) -> Option<Vec<String>> {
    list.map(|v| v.into_iter().filter(|s| !s.trim().is_empty()).collect())
}

pub fn run(config: &ServiceConfig, args: BuildArgs, cancel: &CancelToken, json: bool) -> CommandResult {
    // Everything that can be rejected up front is, before any file is written.
    let profile = match &args.profile {
        Some(reference) => Some(profile_resolver(config).load(reference)?),
        None => None,
    };
    let registry = config.build_registry()?;
    let builder = Builder::new(Arc::new(registry), config.builder_config());

    let mut request = BuildRequest::new(&args.entity, &args.dest, args.plugin)
        .with_manifests(non_empty(args.manifests).unwrap_or_else(|| config.build.manifests.clone()))
        .with_tag_manifests(non_empty(args.tag_manifests).unwrap_or_else(|| config.build.tag_manifests.clone()));
    if !args.reproducible {
        request = request.with_bagging_date(today());
    }

    let pb = if json {
        None
    } else {
        Some(spinner("building package..."))
    };
    let outcome = match &profile {
        Some(profile) => builder
            .build_and_validate(&request, cancel, &profile.rules, &config.validation_options())
            .map(|report| (report.package, Some(report.validation))),
        None => builder.build(&request, cancel).map(|package| (package, None)),
    };
    let (package, validation) = match outcome {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "package built");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "build failed");
            }
            return Err(e.into());
        }
    };

    let archive = if args.serialize {
        Some(serialize_package(&package.path)?)
    } else {
        None
    };

    if json {
        let payload = serde_json::json!({
            "package": package,
            "archive": archive,
            "validation": validation,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("built package {}", package.path.display());
        println!("payload:   {} ({} files)", package.payload_oxum, package.payload_files);
        println!("manifests: {}", package.manifests.join(", "));
        if !package.tag_manifests.is_empty() {
            println!("tag manifests: {}", package.tag_manifests.join(", "));
        }
        println!("mapper:    {} ({})", package.plugin.name, package.plugin.strategy);
        if let Some(archive) = &archive {
            println!("archive:   {}", archive.display());
        }
        if let Some(report) = &validation {
            print_report(report);
        }
    }

    Ok(validation.as_ref().map_or(EXIT_SUCCESS, report_exit_code))
}
