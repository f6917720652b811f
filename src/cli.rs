use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pkgsync")]
#[command(version)]
#[command(about = "Declarative package state for your machine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config directory (default: ~/.config/pkgsync)
    #[arg(short = 'c', long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Print the result report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Diff(SessionArgs),

    /// Install, remove and re-mark packages to match the config
    Apply(ApplyArgs),

    /// Validate the config and probe every package manager
    Check,

    /// Write installed-but-undeclared packages to 99.unsorted.toml
    Save(SaveArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags shared by every command that talks to package managers
#[derive(Args, Clone, Default)]
pub struct SessionArgs {
    /// Only this manager ("pacman") or package ("pacman.git")
    pub target: Option<String>,

    /// Abort when any package manager cannot be queried
    #[arg(long)]
    pub strict: bool,

    /// Number of package managers processed in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Process package managers one after another
    #[arg(long, conflicts_with = "jobs")]
    pub sync: bool,

    /// Deadline in seconds for each package manager call
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Confirm every batch separately
    #[arg(long, conflicts_with = "yes")]
    pub paranoid: bool,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct SaveArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Overwrite an existing 99.unsorted.toml
    #[arg(short, long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from(["pkgsync", "-vv", "apply", "--yes", "--jobs", "2", "pacman"]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.yes);
        assert_eq!(args.session.jobs, Some(2));
        assert_eq!(args.session.target.as_deref(), Some("pacman"));
    }

    #[test]
    fn test_yes_conflicts_with_paranoid() {
        assert!(Cli::try_parse_from(["pkgsync", "apply", "--yes", "--paranoid"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["pkgsync", "diff", "--json", "-c", "/tmp/cfg"]);
        assert!(cli.json);
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/cfg")));
    }
}
