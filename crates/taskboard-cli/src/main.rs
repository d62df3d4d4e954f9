//! `taskboard` - drive the sync engine from the command line
//!
//! - `simulate`: scripted session against the in-memory authority
//! - `inspect`: list boards (and one board's sections) from a live API

mod inspect;
mod simulate;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("taskboard")
        .version(taskboard_sync::VERSION)
        .about("Optimistic task board sync engine")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted session against an in-memory authority")
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Number of rounds of moves and edits"),
                )
                .arg(
                    Arg::new("fail-every")
                        .long("fail-every")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Fail every nth order write and field update (0 disables)"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Delay of every authority call"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("List boards from the REST API")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("HTTP settings (TOML)"),
                )
                .arg(
                    Arg::new("sync-config")
                        .long("sync-config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Sync settings (TOML)"),
                )
                .arg(Arg::new("base-url").long("base-url").help("API root, e.g. http://localhost:5000/api/v1"))
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Bearer token (defaults to $TASKBOARD_TOKEN)"),
                )
                .arg(Arg::new("board").long("board").help("Also list this board's sections and tasks"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::new("warn,reqwest=warn,hyper=warn,taskboard_sync=info,taskboard_http=info")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_env_filter());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let defaults = simulate::SimulationConfig::default();
    let config = simulate::SimulationConfig {
        rounds: args.get_one::<usize>("rounds").copied().unwrap_or(defaults.rounds),
        fail_every: args.get_one::<u64>("fail-every").copied().unwrap_or(defaults.fail_every),
        latency: args
            .get_one::<u64>("latency-ms")
            .copied()
            .map_or(defaults.latency, Duration::from_millis),
    };

    let report = simulate::run(&config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.to_text());
    }
    Ok(report.converged())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            if !simulate(args).await? {
                std::process::exit(1);
            }
        }
        Some(("inspect", args)) => inspect::run(args).await?,
        _ => cli().print_help()?,
    }
    Ok(())
}
