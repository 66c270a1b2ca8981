mod commands;

use bagsmith_core::{install_signal_handler, CancelToken, CheckSet, ServiceConfig};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::build::{plugin_spec, BuildArgs};
use commands::CommandError;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bagsmith",
    version,
    about = "Build checksum-manifested archive packages and validate them against profiles"
)]
struct Cli {
    /// Configuration file (default: ./bagsmith.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a package from an entity directory (data/ plus optional meta/).
    Build {
        /// Entity directory.
        entity: PathBuf,
        /// Destination of the package; must not exist.
        dest: PathBuf,
        /// Registered mapper name.
        #[arg(long, default_value = "oai-dc")]
        plugin: String,
        /// Context the registered mapper is looked up in.
        #[arg(long)]
        context: Option<String>,
        /// JSON mapper specification file (any strategy); overrides --plugin.
        #[arg(long, value_name = "FILE")]
        mapper: Option<PathBuf>,
        /// Mapper argument; VALUE is parsed as JSON, else taken as a string.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// Payload manifest algorithms (comma-separated).
        #[arg(long, value_delimiter = ',')]
        manifests: Option<Vec<String>>,
        /// Tag manifest algorithms (comma-separated, empty for none).
        #[arg(long, value_delimiter = ',')]
        tag_manifests: Option<Vec<String>>,
        /// Omit Bagging-Date so identical input gives identical output.
        #[arg(long, default_value_t = false)]
        reproducible: bool,
        /// Validate the built package against this profile (path or URL).
        #[arg(long)]
        profile: Option<String>,
        /// Also write <dest>.tar.
        #[arg(long, default_value_t = false)]
        serialize: bool,
    },
    /// Validate a package directory or archive against a profile.
    Validate {
        /// Package directory or serialized package.
        package: PathBuf,
        /// Profile path or URL. Defaults to the package's declared profile,
        /// then the configured default.
        #[arg(long)]
        profile: Option<String>,
        /// Rule categories to check (comma-separated, or "all").
        #[arg(long, default_value = "all")]
        checks: CheckSet,
    },
    /// List registered mappers and enabled request-time strategies.
    Plugins,
    /// Compute checksum manifests over a directory tree.
    Checksum {
        /// Directory to hash.
        dir: PathBuf,
        /// Algorithms (comma-separated).
        #[arg(long, value_delimiter = ',', default_value = "sha256")]
        algorithms: Vec<String>,
    },
    /// Show the metadata and manifests of a package.
    Inspect {
        /// Package directory.
        package: PathBuf,
    },
    /// Verify the fixity of a package against its manifests.
    Verify {
        /// Package directory.
        package: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn load_config(path: Option<&std::path::Path>) -> Result<ServiceConfig, CommandError> {
    let mut config = ServiceConfig::discover(path)?;
    config.apply_process_env()?;
    config.check()?;
    Ok(config)
}

fn run(cli: Cli) -> commands::CommandResult {
    let json = cli.json;
    match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        Commands::Checksum { dir, algorithms } => commands::checksum::run(&dir, &algorithms, json),
        Commands::Inspect { package } => commands::inspect::run(&package, json),
        Commands::Verify { package } => commands::verify::run(&package, json),
        Commands::Plugins => {
            let config = load_config(cli.config.as_deref())?;
            commands::plugins::run(&config, json)
        }
        Commands::Validate {
            package,
            profile,
            checks,
        } => {
            let config = load_config(cli.config.as_deref())?;
            commands::validate::run(&config, &package, profile.as_deref(), checks, json)
        }
        Commands::Build {
            entity,
            dest,
            plugin,
            context,
            mapper,
            args,
            manifests,
            tag_manifests,
            reproducible,
            profile,
            serialize,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let plugin = plugin_spec(&plugin, context.as_deref(), mapper.as_deref(), &args)?;
            let cancel = CancelToken::new();
            install_signal_handler(&cancel);
            commands::build::run(
                &config,
                BuildArgs {
                    entity,
                    dest,
                    plugin,
                    manifests,
                    tag_manifests,
                    reproducible,
                    profile,
                    serialize,
                },
                &cancel,
                json,
            )
        }
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BAGSMITH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            if err.is_internal() {
                tracing::error!("internal error: {err}");
            }
            eprintln!("error: {err}");
            ExitCode::from(err.code)
        }
    }
}
