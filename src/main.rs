use chainlet::config::Config;
use chainlet::{repl, runner};
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                )
                .with(filter)
                .init();
        }
    });
}

fn main() -> ExitCode {
    init_tracing();

    let matches = Command::new("chainlet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Line-oriented scripting language with a pluggable entry registry")
        .arg(
            Arg::new("file")
                .help("The script file to execute")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("interactive")
                .short('i')
                .long("interactive")
                .help("Start in interactive REPL mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .help("Keep running a script after a fatal line")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("event-log")
                .long("event-log")
                .value_name("PATH")
                .help("Write fatal and warning events to PATH after the run")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("max-call-depth")
                .long("max-call-depth")
                .value_name("N")
                .help("Maximum nesting of user function calls")
                .value_parser(value_parser!(usize)),
        )
        .get_matches();

    let mut config = Config::default();
    if matches.get_flag("keep-going") {
        config = config.keep_going();
    }
    if let Some(path) = matches.get_one::<PathBuf>("event-log") {
        config = config.with_event_log(path.clone());
    }
    if let Some(depth) = matches.get_one::<usize>("max-call-depth") {
        config = config.with_max_call_depth(*depth);
    }

    match matches.get_one::<PathBuf>("file") {
        Some(path) if !matches.get_flag("interactive") => {
            let outcome = runner::run_file(path, config);
            if outcome.is_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        _ => {
            repl::start(config);
            ExitCode::SUCCESS
        }
    }
}
