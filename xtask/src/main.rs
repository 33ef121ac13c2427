use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "tomo helper tasks (clippy, tests)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the simulated-cluster integration tests
    Test {
        /// Also run every crate's unit tests
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;

    match cli.command {
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { all } => {
            if all {
                run_workspace_tests(&root)?;
            } else {
                run_integration_tests(&root)?;
            }
        }
    }

    Ok(())
}

fn repo_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn cargo(root: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(args).current_dir(root);
    cmd
}

fn run_clippy(root: &Path) -> Result<()> {
    let cmd = cargo(
        root,
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--all-features",
            "--",
            "-D",
            "warnings",
        ],
    );
    run_command(cmd, "cargo clippy")
}

fn run_integration_tests(root: &Path) -> Result<()> {
    let cmd = cargo(root, &["test", "-p", "integration-tests"]);
    run_command(cmd, "cargo test -p integration-tests")
}

fn run_workspace_tests(root: &Path) -> Result<()> {
    let cmd = cargo(root, &["test", "--workspace", "--all-features"]);
    run_command(cmd, "cargo test --workspace")
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {label}");
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
