//! Automation for the dbpool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Automation for the dbpool workspace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, clippy, then every test suite
    Ci,
    /// Fast tests only; the blocking-wait suite is left to `timing`
    Test,
    /// Pool behavior tests, serialized so the wait budgets hold
    Timing,
    /// Capacity property test with a larger case count
    Props {
        #[arg(long, default_value_t = 2048)]
        cases: u32,
    },
    /// Criterion benches for acquire/release
    Bench,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            cmd!(sh, "cargo fmt --all -- --check").run()?;
            cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
            fast_tests(&sh)?;
            timing_tests(&sh)?;
        }
        Command::Test => fast_tests(&sh)?,
        Command::Timing => timing_tests(&sh)?,
        Command::Props { cases } => {
            let _cases = sh.push_env("PROPTEST_CASES", cases.to_string());
            cmd!(sh, "cargo test -p dbpool --test capacity_props").run()?;
        }
        Command::Bench => cmd!(sh, "cargo bench -p dbpool --bench pool").run()?,
    }

    Ok(())
}

fn fast_tests(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo test -p dbpool").run()?;
    cmd!(sh, "cargo test -p dbpool-testing --lib").run()?;
    Ok(())
}

fn timing_tests(sh: &Shell) -> Result<()> {
    // Wait-budget assertions drift when test threads oversubscribe the CPU.
    cmd!(sh, "cargo test -p dbpool-testing --test pool_behavior -- --test-threads=1").run()?;
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let manifest = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest)
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("xtask manifest dir {manifest} has no parent"))
}
