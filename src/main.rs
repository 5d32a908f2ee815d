/// Version injected at compile time via YC_PROVIDER_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("YC_PROVIDER_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use yc_provider::cloud::http::format_api_error;
use yc_provider::cloud::CloudClient;
use yc_provider::codec::AttributeTree;
use yc_provider::context::Action;
use yc_provider::iam::{self, AccessPolicy, Member, PolicyEdit};
use yc_provider::resolver::{self, ObjectRef};
use yc_provider::resource::{get_all_resource_keys, get_registry};
use yc_provider::{
    CancellationToken, Deadline, ProviderConfig, ProviderContext, ProviderError, ReadOutcome,
    Reconciler,
};

/// Operator tool over the Yandex Cloud reconciliation core
#[derive(Parser, Debug)]
#[command(name = "yc-provider", version = VERSION, about, long_about = None)]
struct Args {
    /// Default folder for folder-scoped kinds
    #[arg(long, global = true)]
    folder_id: Option<String>,

    /// Default cloud for cloud-scoped kinds
    #[arg(long, global = true)]
    cloud_id: Option<String>,

    /// API endpoint (host:port)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Run in read-only mode (block all write operations)
    #[arg(long, global = true)]
    readonly: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported resource kinds
    Kinds,
    /// Print the field table of a kind
    Schema { kind: String },
    /// Read objects by id; state files supply config-only values
    Read {
        kind: String,
        ids: Vec<String>,
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Build the full state of an existing object
    Import { kind: String, id: String },
    /// Resolve a name to an id
    Resolve {
        kind: String,
        name: String,
        /// Folder or cloud to search in
        #[arg(long)]
        scope: Option<String>,
    },
    /// Look an object up by the id or name fields in a query tree
    Lookup {
        kind: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Create an object from a desired-state tree
    Create {
        kind: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Move an object from its prior state to a desired state
    Update {
        kind: String,
        id: String,
        #[arg(long)]
        prior: PathBuf,
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete an object
    Delete { kind: String, id: String },
    /// Access bindings
    Iam {
        #[command(subcommand)]
        command: IamCommand,
    },
}

#[derive(Subcommand, Debug)]
enum IamCommand {
    /// Print the access policy
    Show { kind: String, id: String },
    /// Show what replacing the policy with a file would change
    Diff {
        kind: String,
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Replace the whole policy with a file
    SetPolicy {
        kind: String,
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Make `members` the only holders of `role`
    SetBinding {
        kind: String,
        id: String,
        role: String,
        members: Vec<String>,
    },
    /// Grant one role to one member
    AddMember {
        kind: String,
        id: String,
        role: String,
        member: String,
    },
    /// Revoke one role from one member
    RemoveMember {
        kind: String,
        id: String,
        role: String,
        member: String,
    },
}

impl Command {
    fn is_write(&self) -> bool {
        match self {
            Command::Create { .. } | Command::Update { .. } | Command::Delete { .. } => true,
            Command::Iam { command } => !matches!(
                command,
                IamCommand::Show { .. } | IamCommand::Diff { .. }
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG, when set, refines the level per target (e.g. `yc_provider=debug,reqwest=warn`)
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(tracing_level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("yc-provider {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("yc-provider").join("yc-provider.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".yc-provider").join("yc-provider.log");
    }
    PathBuf::from("yc-provider.log")
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

/// Parse a JSON or YAML file, picked by extension
fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {:?}", path))
    } else {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
    }
}

fn load_config(args: &Args) -> Result<ProviderConfig> {
    let mut config = ProviderConfig::load();
    config.apply_env();
    if let Some(folder) = &args.folder_id {
        config.folder_id = Some(folder.clone());
    }
    if let Some(cloud) = &args.cloud_id {
        config.cloud_id = Some(cloud.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    config.validate()?;
    Ok(config)
}

fn connect(config: &ProviderConfig) -> Result<ProviderContext> {
    let client = CloudClient::new(config).context("Failed to initialize API client")?;
    Ok(ProviderContext::from_config(config, Arc::new(client)))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    };

    // Ctrl-C stops the in-flight call; the remote operation may still finish
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Err(err) = run(args, &cancel).await {
        match err.downcast_ref::<ProviderError>() {
            Some(provider_err) => eprintln!("Error: {}", format_api_error(provider_err)),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args, cancel: &CancellationToken) -> Result<()> {
    if args.readonly && args.command.is_write() {
        bail!("Refusing to modify resources in read-only mode");
    }

    match &args.command {
        Command::Kinds => {
            let registry = get_registry();
            let kinds: BTreeMap<&str, &str> = get_all_resource_keys()
                .into_iter()
                .filter_map(|k| registry.resources.get(k).map(|d| (k, d.display_name.as_str())))
                .collect();
            print(&kinds, args.output)
        }
        Command::Schema { kind } => {
            let def = get_registry().get(kind)?;
            print(&def.schema, args.output)
        }
        command => {
            let config = load_config(&args)?;
            let ctx = connect(&config)?;
            run_remote(&ctx, command, args.output, cancel).await
        }
    }
}

async fn run_remote(
    ctx: &ProviderContext,
    command: &Command,
    output: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Read { kind, ids, state } => {
            let reconciler = Reconciler::new(ctx, kind)?;
            let prior: Option<AttributeTree> = state.as_deref().map(read_file::<AttributeTree>).transpose()?;
            let reads = ids.iter().map(|id| reconciler.read(id, prior.as_ref(), cancel));
            let results = futures::future::join_all(reads).await;

            let mut out = BTreeMap::new();
            for (id, result) in ids.iter().zip(results) {
                let entry = match result? {
                    ReadOutcome::Present(tree) => serde_json::to_value(tree)?,
                    ReadOutcome::Gone => serde_json::Value::Null,
                };
                out.insert(id.clone(), entry);
            }
            print(&out, output)
        }
        Command::Import { kind, id } => {
            let tree = Reconciler::new(ctx, kind)?.import(id, cancel).await?;
            print(&tree, output)
        }
        Command::Resolve { kind, name, scope } => {
            let def = get_registry().get(kind)?;
            let deadline = Deadline::after(ctx.timeout(Action::Read, def));
            let id = resolver::resolve(
                ctx,
                def,
                &ObjectRef::Name(name.clone()),
                scope.as_deref(),
                &deadline,
                cancel,
            )
            .await?;
            print(&id, output)
        }
        Command::Lookup { kind, file } => {
            let query: AttributeTree = read_file(file)?;
            let (id, tree) = Reconciler::new(ctx, kind)?.read_data_source(&query, cancel).await?;
            print(&serde_json::json!({ "id": id, "state": tree }), output)
        }
        Command::Create { kind, file } => {
            let desired: AttributeTree = read_file(file)?;
            let (id, tree) = Reconciler::new(ctx, kind)?.create(&desired, cancel).await?;
            print(&serde_json::json!({ "id": id, "state": tree }), output)
        }
        Command::Update { kind, id, prior, file } => {
            let prior: AttributeTree = read_file(prior)?;
            let desired: AttributeTree = read_file(file)?;
            let tree = Reconciler::new(ctx, kind)?
                .update(id, &prior, &desired, cancel)
                .await?;
            print(&tree, output)
        }
        Command::Delete { kind, id } => {
            Reconciler::new(ctx, kind)?.delete(id, cancel).await?;
            print(&serde_json::json!({ "deleted": id }), output)
        }
        Command::Iam { command } => run_iam(ctx, command, output, cancel).await,
        Command::Kinds | Command::Schema { .. } => Ok(()),
    }
}

async fn run_iam(
    ctx: &ProviderContext,
    command: &IamCommand,
    output: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let (kind, id, edit) = match command {
        IamCommand::Show { kind, id } => {
            let def = get_registry().get(kind)?;
            let deadline = Deadline::after(ctx.timeout(Action::Read, def));
            let policy = iam::read_policy(ctx, def, id, &deadline, cancel).await?;
            return print(&policy, output);
        }
        IamCommand::Diff { kind, id, file } => {
            let def = get_registry().get(kind)?;
            let desired: AccessPolicy = read_file(file)?;
            let deadline = Deadline::after(ctx.timeout(Action::Read, def));
            let (_, delta) =
                iam::plan(ctx, def, id, &PolicyEdit::Replace(desired), &deadline, cancel).await?;
            return print(&delta, output);
        }
        IamCommand::SetPolicy { kind, id, file } => {
            (kind, id, PolicyEdit::Replace(read_file(file)?))
        }
        IamCommand::SetBinding { kind, id, role, members } => {
            let members = members
                .iter()
                .map(|m| m.parse::<Member>())
                .collect::<yc_provider::Result<_>>()?;
            (kind, id, PolicyEdit::SetBinding { role: role.clone(), members })
        }
        IamCommand::AddMember { kind, id, role, member } => (
            kind,
            id,
            PolicyEdit::AddMember { role: role.clone(), member: member.parse()? },
        ),
        IamCommand::RemoveMember { kind, id, role, member } => (
            kind,
            id,
            PolicyEdit::RemoveMember { role: role.clone(), member: member.parse()? },
        ),
    };

    let def = get_registry().get(kind)?;
    let deadline = Deadline::after(ctx.timeout(Action::Update, def));
    let policy = iam::read_modify_write(ctx, def, id, &edit, &deadline, cancel).await?;
    print(&policy, output)
}
