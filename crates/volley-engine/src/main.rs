use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use volley_chain::{Chain, Scenario};
use volley_core::{Feeder, Record, Session};
use volley_engine::{Engine, EngineConfig, Injection, StopReason, StopSignal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("volley")
        .version(volley_engine::VERSION)
        .about("Virtual-user scenario engine")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter (overrides RUST_LOG), e.g. info or volley_engine=debug"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the built-in demo scenario")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(std::path::PathBuf))
                        .help("TOML engine configuration"),
                )
                .arg(
                    Arg::new("users")
                        .long("users")
                        .value_parser(value_parser!(u64))
                        .help("Number of virtual users"),
                )
                .arg(
                    Arg::new("ramp-secs")
                        .long("ramp-secs")
                        .value_parser(value_parser!(u64))
                        .help("Spread user starts over this many seconds"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("max-duration-secs")
                        .long("max-duration-secs")
                        .value_parser(value_parser!(u64))
                        .help("Stop the run after this many seconds"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the summary as JSON"),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(
        matches.get_one::<String>("log-level").map(String::as_str),
        matches.get_flag("log-json"),
    );

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        _ => {
            println!("nothing to do, try `volley run --help`");
            Ok(())
        }
    }
}

fn init_tracing(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_from(args: &ArgMatches) -> anyhow::Result<EngineConfig> {
    let mut config = match args.get_one::<std::path::PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::new().at_once(10),
    };

    let users = args
        .get_one::<u64>("users")
        .copied()
        .unwrap_or_else(|| config.injection.users());
    config.injection = match args.get_one::<u64>("ramp-secs") {
        Some(&over_secs) => Injection::Ramp { users, over_secs },
        None => match config.injection {
            Injection::Ramp { over_secs, .. } => Injection::Ramp { users, over_secs },
            Injection::AtOnce { .. } => Injection::AtOnce { users },
        },
    };
    if let Some(&seed) = args.get_one::<u64>("seed") {
        config = config.with_seed(seed);
    }
    if let Some(&secs) = args.get_one::<u64>("max-duration-secs") {
        config = config.with_max_duration_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

/// Feed an account, branch on its tier, retry a flaky checkout, and pace
/// three browsing iterations.
fn demo_scenario() -> anyhow::Result<Scenario> {
    let accounts: Vec<Record> = ["gold", "silver", "bronze", "silver", "gold"]
        .iter()
        .enumerate()
        .map(|(i, tier)| {
            Record::from([
                ("account".to_string(), json!(format!("acct-{i}"))),
                ("tier".to_string(), json!(tier)),
            ])
        })
        .collect();
    let feeder = Feeder::new("accounts", accounts)?.circular().shared();

    let browse = Chain::new()
        .exec_named("browse", |s: Session| {
            let pages = s.get_as::<u64>("pages").unwrap_or(0);
            s.set("pages", pages + 1)
        })
        .pause_between(Duration::from_millis(50), Duration::from_millis(150))
        .pace(Duration::from_millis(250));

    let checkout = Chain::new().exec_async(|s: Session| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if rand::rng().random_bool(0.3) {
            s.mark_as_failed()
        } else {
            s.set("ordered", true)
        }
    });

    let chain = Chain::new()
        .feed(feeder)
        .do_if_equals_or_else("#{tier}", json!("gold"))
        .then(Chain::new().exec(|s| s.set("discount", 20)))
        .or_else(Chain::new().exec(|s| s.set("discount", 0)))
        .repeat(3u64)
        .counter_name("page")
        .on(browse)?
        .try_max(3u64)
        .counter_name("attempt")
        .on(checkout)?;

    Ok(Scenario::new("demo", chain)?)
}

async fn run(args: &ArgMatches) -> anyhow::Result<()> {
    let config = config_from(args)?;
    let scenario = demo_scenario()?;
    let engine = Engine::new(config)?;

    let stop = StopSignal::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.stop(StopReason::External("interrupted".into()));
        }
    });

    let summary = engine.run_with_signal(&scenario, stop).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.generate_text());
    }

    std::process::exit(if summary.passed() { 0 } else { 1 });
}
