use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const ROOT_AFTER_HELP: &str = r#"SELECTION OPTIONS:
  --env, -e           Use an environment for this run only
  --set-env           Use an environment and remember it for future runs
  --reset             Rebuild runtime state from the source config,
                      discarding all stored overrides
  --dir               Directory holding the reqenv dotfiles (default: current)

FILES:
  .reqenv.env.yml     Source config: environment -> variable -> default value.
                      Human-edited, read-only to reqenv.
  .reqenv.runtime.yml Runtime state: selected environment plus the initial and
                      current variable layers. Rewritten on every run.

EXAMPLES:
  reqenv envs
  reqenv --set-env staging show
  reqenv get base_url
  reqenv set token abc123
  reqenv --env production get base_url
  reqenv --reset show
"#;

#[derive(Parser, Debug)]
#[command(
    name = "reqenv",
    version,
    about = "Environment variable store for API request collections",
    long_about = "Environment variable store for API request collections",
    after_help = ROOT_AFTER_HELP
)]
pub struct Cli {
    #[arg(
        long,
        short = 'e',
        global = true,
        value_name = "NAME",
        help = "Use an environment for this run only"
    )]
    pub env: Option<String>,

    #[arg(
        long = "set-env",
        global = true,
        value_name = "NAME",
        help = "Use an environment and remember it for future runs"
    )]
    pub set_env: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Rebuild runtime state from the source config, discarding overrides"
    )]
    pub reset: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding .reqenv.env.yml and .reqenv.runtime.yml"
    )]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Show the active environment and its variables")]
    Show(ShowArgs),
    #[command(about = "List environments declared by the source config")]
    Envs,
    #[command(about = "Print the current value of a variable")]
    Get(GetArgs),
    #[command(about = "Set a variable in the active environment")]
    Set(SetArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long, help = "Emit JSON instead of plain text")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
    #[arg(value_name = "VALUE")]
    pub value: String,
}
