use clap::Parser;
use reqenv::cli::{Cli, Command, GetArgs, SetArgs, ShowArgs};
use reqenv::runtime::RuntimeError;
use reqenv::store::{Runtime, RuntimeOptions};
use std::fmt::Display;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let options = RuntimeOptions {
        dir: cli.dir,
        env: cli.env,
        set_env: cli.set_env,
        reset: cli.reset,
    };
    match cli.command.unwrap_or(Command::Show(ShowArgs { json: false })) {
        Command::Show(args) => cmd_show(&options, &args),
        Command::Envs => cmd_envs(&options),
        Command::Get(args) => cmd_get(&options, &args),
        Command::Set(args) => cmd_set(&options, &args),
    }
}

#[derive(Debug)]
enum CliError {
    Runtime(RuntimeError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Runtime(err) => write!(f, "{}", err),
        }
    }
}

impl From<RuntimeError> for CliError {
    fn from(err: RuntimeError) -> Self {
        CliError::Runtime(err)
    }
}

fn cmd_show(options: &RuntimeOptions, args: &ShowArgs) -> Result<(), CliError> {
    let runtime = Runtime::init(options)?;
    let state = runtime.snapshot();
    let variables = state.current.get(runtime.env()).cloned().unwrap_or_default();

    if args.json {
        let payload = serde_json::json!({
            "environment": runtime.env(),
            "variables": variables,
        });
        println!("{}", payload);
    } else {
        println!("environment: {}", runtime.env());
        if runtime.has_environment() {
            for (key, value) in &variables {
                println!("  {} = {}", key, value);
            }
        } else {
            println!("  (not declared in the source config; no variables)");
        }
    }

    runtime.persist()?;
    Ok(())
}

fn cmd_envs(options: &RuntimeOptions) -> Result<(), CliError> {
    let runtime = Runtime::init(options)?;
    let state = runtime.snapshot();
    for (name, variables) in &state.initial {
        let marker = if name.as_str() == runtime.env() {
            "*"
        } else {
            " "
        };
        println!("{} {} ({} variables)", marker, name, variables.len());
    }
    runtime.persist()?;
    Ok(())
}

fn cmd_get(options: &RuntimeOptions, args: &GetArgs) -> Result<(), CliError> {
    let runtime = Runtime::init(options)?;
    println!("{}", runtime.get(&args.key));
    runtime.persist()?;
    Ok(())
}

fn cmd_set(options: &RuntimeOptions, args: &SetArgs) -> Result<(), CliError> {
    let runtime = Runtime::init(options)?;
    if runtime.has_environment() {
        runtime.set(&args.key, &args.value);
        println!("set {} in environment {}", args.key, runtime.env());
    } else {
        eprintln!(
            "environment {:?} is not declared in the source config; nothing stored",
            runtime.env()
        );
    }
    runtime.persist()?;
    Ok(())
}
