use chrono::Utc;
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Report,
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use solana_sdk::{
    pubkey::Pubkey,
    signer::Signer,
};
use std::{
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tomo_client::{
    Error,
    config::{
        ClusterConfig,
        Network,
    },
    feedback::user_message,
    instructions::CrankSchedule,
    ledger::RpcLedger,
    router::{
        Action,
        OperationRouter,
        SigningSource,
    },
    secure_store::{
        FileSecureStore,
        SecureStore,
    },
    watch::{
        WatchEvent,
        watch_entity,
    },
};
use tracing::info;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{
        RollingFileAppender,
        Rotation,
    },
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

use crate::{
    display::render_entity,
    wallets::{
        KeystoreWallet,
        confirm,
        find_wallet,
        load_keypair_file,
        resolve_wallet_dir,
        unlock_wallet,
    },
};

mod display;
mod wallets;

#[derive(Parser, Debug)]
#[command(
    name = "tomo",
    about = "Care for a tomo living on Solana and its ephemeral rollup",
    version,
    group(
        ArgGroup::new("network")
            .args(["devnet", "testnet", "local"])
            .required(true)
    ),
    group(ArgGroup::new("signer").args(["wallet", "keypair"]))
)]
struct Args {
    /// Use Solana devnet and the public devnet rollup
    #[arg(long)]
    devnet: bool,

    /// Use Solana testnet
    #[arg(long)]
    testnet: bool,

    /// Use a local validator and a local rollup
    #[arg(long)]
    local: bool,

    /// Override the base ledger RPC URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the rollup RPC URL
    #[arg(long)]
    rollup_url: Option<String>,

    /// Override the tomo program id
    #[arg(long)]
    program_id: Option<String>,

    /// Keystore wallet name (looked up as <wallet-dir>/<name>.wallet)
    #[arg(long)]
    wallet: Option<String>,

    /// Solana JSON keypair file to use as the primary wallet
    #[arg(long)]
    keypair: Option<String>,

    /// Override the keystore directory (defaults to ~/.tomo/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Where the local session identity is kept (defaults to ~/.tomo/secure)
    #[arg(long)]
    secure_dir: Option<String>,

    /// Answer yes to wallet signature and logout prompts
    #[arg(long, short = 'y')]
    yes: bool,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current state of a tomo
    Show { uid: String },
    /// Create a tomo on the base ledger
    Init { uid: String },
    /// Create a tomo and hand it to the rollup in one transaction
    Hatch { uid: String },
    /// Collect one coin
    Collect { uid: String },
    /// Spend coins to feed
    Feed { uid: String },
    /// Consume the item in an inventory slot
    UseItem { slot: u8, uid: String },
    /// Mark an item drop as pending
    TriggerDrop { uid: String },
    /// Roll a pending item drop into the inventory (rollup)
    OpenDrop { uid: String },
    /// Request a random event (rollup)
    RandomEvent { uid: String },
    /// Schedule recurring random events (rollup)
    StartRandomEvents {
        uid: String,
        #[arg(long, default_value_t = 1)]
        task_id: u64,
        #[arg(long, default_value_t = 60_000)]
        interval_millis: u64,
        #[arg(long, default_value_t = 10)]
        iterations: u64,
    },
    /// Delegate the tomo to the rollup
    Delegate { uid: String },
    /// Commit the tomo back to the base ledger
    Undelegate { uid: String },
    /// Close the tomo account
    Delete { uid: String },
    /// Print the tomo whenever it changes, until interrupted
    Watch {
        uid: String,
        #[arg(long, default_value_t = 2_000)]
        interval_millis: u64,
    },
    /// Print the local session identity, creating it if needed
    Identity,
    /// Forget the local session identity
    Logout,
    /// Manage the stored deployment record
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Store the resolved endpoints and program for the selected network
    Save,
}

impl Command {
    fn action(&self) -> Option<(Action, &str)> {
        let action = match self {
            Command::Init { uid } => (Action::Init, uid),
            Command::Hatch { uid } => (Action::Hatch, uid),
            Command::Collect { uid } => (Action::CollectReward, uid),
            Command::Feed { uid } => (Action::Feed, uid),
            Command::UseItem { slot, uid } => (Action::UseItem { slot: *slot }, uid),
            Command::TriggerDrop { uid } => (Action::TriggerItemDrop, uid),
            Command::OpenDrop { uid } => (Action::OpenItemDrop, uid),
            Command::RandomEvent { uid } => (Action::RandomEvent, uid),
            Command::StartRandomEvents {
                uid,
                task_id,
                interval_millis,
                iterations,
            } => (
                Action::StartRandomEvents(CrankSchedule {
                    task_id: *task_id,
                    interval_millis: *interval_millis,
                    iterations: *iterations,
                }),
                uid,
            ),
            Command::Delegate { uid } => (Action::Delegate, uid),
            Command::Undelegate { uid } => (Action::Undelegate, uid),
            Command::Delete { uid } => (Action::Delete, uid),
            Command::Show { .. }
            | Command::Watch { .. }
            | Command::Identity
            | Command::Logout
            | Command::Config { .. } => return None,
        };
        Some((action.0, action.1.as_str()))
    }

    fn needs_primary_wallet(&self) -> bool {
        self.action().is_some_and(|(action, _)| {
            action.route().pairing.signer() == SigningSource::PrimaryWallet
        })
    }
}

impl Args {
    fn network(&self) -> Network {
        if self.devnet {
            Network::Devnet
        } else if self.testnet {
            Network::Testnet
        } else {
            Network::Local
        }
    }
}

fn deployment_env(network: Network) -> DeploymentEnv {
    match network {
        Network::Devnet => DeploymentEnv::Dev,
        Network::Testnet => DeploymentEnv::Test,
        Network::Local => DeploymentEnv::Local,
    }
}

fn parse_pubkey(label: &str, raw: &str) -> Result<Pubkey> {
    Pubkey::from_str(raw).map_err(|e| eyre!("Invalid {label} '{raw}': {e}"))
}

/// Built-in defaults, then the stored record, then flags.
fn resolve_cluster(args: &Args, stored: Option<&DeploymentRecord>) -> Result<ClusterConfig> {
    let mut config = ClusterConfig::for_network(args.network());

    if let Some(record) = stored {
        config = config
            .with_base_url(&record.base_rpc_url)
            .with_rollup_url(&record.rollup_rpc_url)
            .with_program_id(parse_pubkey("stored program id", &record.program_id)?);
        if let Some(delegation) = &record.delegation_program_id {
            config.delegation_program_id =
                parse_pubkey("stored delegation program id", delegation)?;
        }
    }

    if let Some(url) = &args.base_url {
        config = config.with_base_url(url);
    }
    if let Some(url) = &args.rollup_url {
        config = config.with_rollup_url(url);
    }
    if let Some(program_id) = &args.program_id {
        config = config.with_program_id(parse_pubkey("program id", program_id)?);
    }
    Ok(config)
}

fn record_for(config: &ClusterConfig) -> DeploymentRecord {
    let mut record = DeploymentRecord::new(
        config.program_id.to_string(),
        &config.base_rpc_url,
        &config.rollup_rpc_url,
    );
    record.delegation_program_id = Some(config.delegation_program_id.to_string());
    record
}

fn load_wallet(args: &Args) -> Result<KeystoreWallet> {
    if let Some(path) = &args.keypair {
        return Ok(KeystoreWallet::new(load_keypair_file(path)?, args.yes));
    }
    if let Some(name) = &args.wallet {
        let dir = resolve_wallet_dir(args.wallet_dir.as_deref())?;
        let descriptor = find_wallet(&dir, name)?;
        return Ok(KeystoreWallet::new(unlock_wallet(&descriptor)?, args.yes));
    }
    Ok(KeystoreWallet::disconnected())
}

fn init_tracing(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(dir) = log_dir else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(None);
    };

    let dir = shellexpand::tilde(dir).into_owned();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tomo")
        .filename_suffix("log")
        .build(&dir)
        .wrap_err_with(|| format!("Failed to open log directory {dir}"))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(Some(guard))
}

/// Puts the player-facing message on top and keeps the client error as its cause.
fn describe(err: Error) -> Report {
    match user_message(&err) {
        Some(message) => Report::new(err).wrap_err(message),
        None => Report::new(err),
    }
}

type CliRouter<S> = OperationRouter<RpcLedger, RpcLedger, KeystoreWallet, S>;

async fn show<S: SecureStore>(router: &CliRouter<S>, uid: &str) -> Result<()> {
    let address = router.entity_address(uid).map_err(describe)?;
    match router.refresh(uid).await.map_err(describe)? {
        Some(resolved) => {
            println!("{}", render_entity(&address, &resolved, Utc::now().timestamp()))
        }
        None => println!("No tomo found for '{uid}' at {address}. Hatch one first"),
    }
    Ok(())
}

async fn watch<S: SecureStore>(
    router: &CliRouter<S>,
    uid: &str,
    interval: Duration,
) -> Result<()> {
    let address = router.entity_address(uid).map_err(describe)?;
    let (events, mut received) = mpsc::unbounded_channel();
    let watcher = watch_entity(router, uid, interval, events);
    let printer = async {
        while let Some(event) = received.recv().await {
            match event {
                WatchEvent::Updated(resolved) => println!(
                    "{}\n",
                    render_entity(&address, &resolved, Utc::now().timestamp())
                ),
                WatchEvent::Missing => println!("No tomo at {address} yet\n"),
                WatchEvent::Failed(reason) => eprintln!("Refresh failed: {reason}\n"),
            }
        }
    };

    tokio::select! {
        result = watcher => result.map_err(describe)?,
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => info!(%uid, "watch interrupted"),
    }
    Ok(())
}

async fn perform<S: SecureStore>(
    router: &CliRouter<S>,
    action: Action,
    uid: &str,
) -> Result<()> {
    match router.perform(action, uid).await {
        Ok(signature) => {
            println!("{action} confirmed: {signature}");
            Ok(())
        }
        Err(err) if err.is_cancellation() => {
            info!(%action, %uid, "signing declined, nothing sent");
            Ok(())
        }
        Err(err) => Err(describe(err)),
    }
}

const LOGOUT_QUESTION: &str = "Clearing the local identity is irreversible. Anything it \
     signed for can no longer be controlled from this client. Continue? [y/N] ";

async fn logout<S: SecureStore>(router: &CliRouter<S>, assume_yes: bool) -> Result<()> {
    let existing = router.identity().public_key().await.map_err(describe)?;
    if let Some(identity) = existing {
        println!("local identity: {identity}");
        if !confirm(LOGOUT_QUESTION.to_string(), assume_yes).await? {
            info!("logout declined, identity kept");
            println!("Logout cancelled");
            return Ok(());
        }
    }
    router.logout().await.map_err(describe)?;
    println!("Local identity cleared");
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let network = args.network();
    let store = DeploymentStore::new(deployment_env(network)).map_err(|e| eyre!(e))?;
    let stored = store.load().map_err(|e| eyre!(e))?;
    let config = resolve_cluster(&args, stored.as_ref())?;

    if let Command::Config {
        command: ConfigCommand::Save,
    } = &args.command
    {
        store.save(&record_for(&config)).map_err(|e| eyre!(e))?;
        println!("Saved {network} deployment to {}", store.path().display());
        return Ok(());
    }

    let wallet = if args.command.needs_primary_wallet() {
        load_wallet(&args)?
    } else {
        KeystoreWallet::disconnected()
    };
    let secure = match &args.secure_dir {
        Some(dir) => FileSecureStore::from_user_path(dir),
        None => FileSecureStore::default(),
    };
    let base = Arc::new(RpcLedger::new(config.base_rpc_url.clone(), config.commitment));
    let rollup = Arc::new(RpcLedger::new(
        config.rollup_rpc_url.clone(),
        config.commitment,
    ));
    info!(
        %network,
        base = %config.base_rpc_url,
        rollup = %config.rollup_rpc_url,
        program = %config.program_id,
        "client configured"
    );
    let router = OperationRouter::new(&config, base, rollup, Arc::new(wallet), secure);

    if let Some((action, uid)) = args.command.action() {
        return perform(&router, action, uid).await;
    }
    match &args.command {
        Command::Show { uid } => show(&router, uid).await,
        Command::Watch {
            uid,
            interval_millis,
        } => watch(&router, uid, Duration::from_millis(*interval_millis)).await,
        Command::Identity => {
            let keypair = router.identity().get_or_create().await.map_err(describe)?;
            println!("local identity: {}", keypair.pubkey());
            if let Some(owner) = router.wallet_public_key() {
                println!("primary wallet: {owner}");
            }
            Ok(())
        }
        Command::Logout => logout(&router, args.yes).await,
        _ => Ok(()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref())?;
    info!("starting tomo client");
    run(args).await
}
