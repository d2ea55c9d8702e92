//! EmberKV server binary.
//!
//! Loads the TOML config file named on the command line, sets up logging and runs the event
//! loop until the process is killed.

use emberkv::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// What the command line asks for
#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Run { config_path: String },
    Help,
    Version,
    /// Bad arguments: print the message and usage, exit non-zero
    Usage(String),
}

impl Invocation {
    fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut config_path = None;

        for arg in args {
            match arg.as_str() {
                "--help" | "-h" => return Invocation::Help,
                "--version" | "-v" => return Invocation::Version,
                flag if flag.starts_with('-') => {
                    return Invocation::Usage(format!("Unknown argument: {}", flag));
                }
                path => {
                    if config_path.is_some() {
                        return Invocation::Usage("only one config file may be given".into());
                    }
                    config_path = Some(path.to_string());
                }
            }
        }

        match config_path {
            Some(config_path) => Invocation::Run { config_path },
            None => Invocation::Usage("missing config file argument".into()),
        }
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - A Single-Threaded In-Memory Key-Value Server

USAGE:
    emberkv <CONFIG_FILE>

ARGS:
    <CONFIG_FILE>        TOML configuration file (missing fields take defaults)

OPTIONS:
    -v, --version        Print version information
    -h, --help           Print this help message

ENVIRONMENT:
    RUST_LOG             Log filter, overrides server.log_level

EXAMPLES:
    emberkv emberkv.toml           # Start with a config file
    emberkv /etc/emberkv.toml

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name "Ariz" EX 60
    OK
    127.0.0.1:6379> TTL name
    (integer) 60
"#
    );
}

fn print_banner(server: &Server) {
    println!(
        r#"
EmberKV v{} - Single-Threaded In-Memory Key-Value Server
──────────────────────────────────────────────────────────
Listening on {} (max {} clients)
Active expiry every {} ms.
"#,
        emberkv::VERSION,
        server.local_addr(),
        server.config().server.max_clients,
        server.config().expiry.interval_ms,
    );
}

fn main() -> anyhow::Result<()> {
    let config_path = match Invocation::from_args(std::env::args().skip(1)) {
        Invocation::Run { config_path } => config_path,
        Invocation::Help => {
            print_help();
            return Ok(());
        }
        Invocation::Version => {
            println!("EmberKV version {}", emberkv::VERSION);
            return Ok(());
        }
        Invocation::Usage(message) => {
            eprintln!("Error: {}", message);
            print_help();
            std::process::exit(1);
        }
    };

    let config = Config::from_file(&config_path)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.server.log_level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(path = %config_path, "Loaded configuration");

    let server = Server::bind(config)?;
    print_banner(&server);
    server.run()?;

    Ok(())
}
