//! masq server binary
//!
//! Usage: masq-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>        Path to configuration file
//!   -l, --listen <ADDR>        Override the listen address
//!   -V, --verbose              Log per-connection detail
//!   -g, --generate [DECOY]     Generate a new server configuration
//!   -h, --help                 Print help information

use std::env;

use anyhow::{bail, Context};

use masq::server::{Server, ServerConfigFile};

#[derive(Default)]
struct Options {
    config: Option<String>,
    listen: Option<String>,
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "-h" | "--help" => {
            print_usage();
            return Ok(());
        }
        "--version" => {
            println!("masq-server {}", masq::VERSION);
            return Ok(());
        }
        "-g" | "--generate" => {
            let decoy = args.get(1).map(String::as_str).unwrap_or("127.0.0.1:8443");
            return generate_config(decoy);
        }
        _ => {}
    }

    let options = parse_options(&args)?;
    init_tracing(options.verbose);

    let Some(path) = options.config else {
        bail!("--config is required");
    };
    run_server(&path, options.listen).await
}

fn parse_options(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter.next().context("--config requires a file path")?;
                options.config = Some(path.clone());
            }
            "-l" | "--listen" => {
                let addr = iter.next().context("--listen requires an address")?;
                options.listen = Some(addr.clone());
            }
            "-V" | "--verbose" => options.verbose = true,
            other => bail!("unknown option: {}", other),
        }
    }

    Ok(options)
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn print_usage() {
    println!(
        r#"masq-server - TLS 1.2 masquerading tunnel endpoint

USAGE:
    masq-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to configuration file (TOML)
    -l, --listen <ADDR>       Override the listen address
    -V, --verbose             Log per-connection detail
    -g, --generate [DECOY]    Print a new configuration with a random secret
    -h, --help                Print help information
        --version             Print version

EXAMPLES:
    Generate a configuration relaying strangers to a local web server:
        masq-server --generate 127.0.0.1:8443 > server.toml

    Run the server:
        masq-server --config server.toml
"#
    );
}

fn generate_config(decoy: &str) -> anyhow::Result<()> {
    let config_file = ServerConfigFile::generate(decoy);

    println!("# masq server configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", config_file.to_toml()?);
    println!("# Give clients the same secret in client.json");

    Ok(())
}

async fn run_server(config_path: &str, listen: Option<String>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path))?;
    let mut config_file = ServerConfigFile::from_toml(&content)?;
    if let Some(listen) = listen {
        config_file.listen_addr = listen;
    }
    let config = config_file.to_config()?;

    tracing::info!("masq-server {}", masq::VERSION);
    tracing::info!("Backend: {}", config.backend_addr);
    tracing::info!("Decoy: {}", config.decoy_addr);
    tracing::info!("Key fingerprint: {}", config.key.fingerprint());

    let server = Server::new(config);
    let listener = server.bind().await?;
    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
