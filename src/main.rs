//! Nimbus CLI entrypoint.
//!
//! This is the main entrypoint for the nimbus command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use nimbus_lifecycle::cli::{Cli, Commands, OutputFormatter, PropsCommands};
use nimbus_lifecycle::config::{
    ConfigParser, NodeDocument, NodeValidator, ProviderConfig, find_config_file,
};
use nimbus_lifecycle::context::{LocalPropertyStore, PropertyStore, STORE_DIR};
use nimbus_lifecycle::error::Result;
use nimbus_lifecycle::operations::Operation;
use nimbus_lifecycle::outcome::OperationResult;
use nimbus_lifecycle::provider::openstack;
use nimbus_lifecycle::trampoline::Trampoline;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let node_file = resolve_node_path(cli.node.as_ref())?;
    let store = create_store(&node_file, cli.store_dir.as_ref());

    match cli.command {
        Commands::Run {
            operation,
            relationship,
            follow,
            max_attempts,
        } => {
            let max_attempts = follow.then_some(max_attempts);
            cmd_run(
                &node_file,
                &store,
                operation,
                relationship,
                max_attempts,
                &formatter,
            )
            .await
        }
        Commands::Validate { warnings, offline } => {
            cmd_validate(&node_file, &store, warnings, offline, &formatter).await
        }
        Commands::Props { command } => {
            cmd_props(&node_file, &store, command, &formatter).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one lifecycle operation.
async fn cmd_run(
    node_file: &Path,
    store: &LocalPropertyStore,
    operation: Operation,
    relationship: usize,
    max_attempts: Option<u32>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let document = load_document(node_file)?;
    NodeValidator::new().validate(&document, Some(operation))?;

    info!(
        "Running {operation} on {} ({})",
        document.instance_id, document.node.kind
    );

    let config = ProviderConfig::load(&document.openstack_config)?;
    let cloud = openstack::connect(&config).await?;

    let mut trampoline = Trampoline::new(&cloud, store);
    if let Some(max_attempts) = max_attempts {
        trampoline = trampoline.following(max_attempts);
    }
    let report = trampoline.run(&document, operation, relationship).await?;

    eprint!("{}", formatter.format_report(&report));

    Ok(exit_code(&report.result))
}

/// Validate the node document, then ask the provider.
async fn cmd_validate(
    node_file: &Path,
    store: &LocalPropertyStore,
    show_warnings: bool,
    offline: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    info!("Validating node document: {}", node_file.display());

    let document = load_document(node_file)?;
    let result = NodeValidator::new().validate(&document, None)?;
    eprint!("{}", formatter.format_validation(&result, show_warnings));

    if offline {
        return Ok(ExitCode::SUCCESS);
    }

    let config = ProviderConfig::load(&document.openstack_config)?;
    let cloud = openstack::connect(&config).await?;
    let report = Trampoline::new(&cloud, store)
        .run(&document, Operation::CreationValidation, 0)
        .await?;
    eprint!("{}", formatter.format_report(&report));

    Ok(exit_code(&report.result))
}

/// Inspect or clear stored runtime properties.
async fn cmd_props(
    node_file: &Path,
    store: &LocalPropertyStore,
    command: PropsCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let document = load_document(node_file)?;
    let instance_id = document.instance_id.as_str();

    match command {
        PropsCommands::Show => {
            let stored = store.load(instance_id).await?;
            eprint!("{}", formatter.format_props(instance_id, stored.as_ref()));
        }
        PropsCommands::Clear { yes } => {
            if !yes {
                eprintln!("This will forget every runtime property of {instance_id}.");
                eprintln!("Use --yes to confirm.");
                return Ok(());
            }
            store.delete(instance_id).await?;
            eprintln!("Cleared properties of {instance_id}");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the node document path.
fn resolve_node_path(node: Option<&PathBuf>) -> Result<PathBuf> {
    node.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory the node document lives in.
fn node_dir(node_file: &Path) -> &Path {
    node_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` next to the document, then the document itself.
fn load_document(node_file: &Path) -> Result<NodeDocument> {
    debug!("Loading node document from: {}", node_file.display());

    let parser = ConfigParser::new().with_base_path(node_dir(node_file));
    parser.load_dotenv()?;
    parser.load_with_env(node_file)
}

/// Creates the property store, next to the document unless overridden.
fn create_store(node_file: &Path, store_dir: Option<&PathBuf>) -> LocalPropertyStore {
    let dir = store_dir.map_or_else(|| node_dir(node_file).join(STORE_DIR), PathBuf::clone);
    debug!("Using property store at: {}", dir.display());
    LocalPropertyStore::with_base_dir(dir)
}

/// Only a permanent failure fails the process; a pending retry does not.
const fn exit_code(result: &OperationResult) -> ExitCode {
    match result {
        OperationResult::Fail { .. } => ExitCode::FAILURE,
        OperationResult::Success | OperationResult::RetryAfter { .. } => ExitCode::SUCCESS,
    }
}
