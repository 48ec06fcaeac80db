//! masq client binary
//!
//! Usage: masq-client [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -l, --listen <ADDR>  Override the local listen address
//!   -t, --test <FILE>    Run one handshake against the server and exit
//!   -g, --generate       Print a configuration template
//!   -h, --help           Print help information

use std::env;

use anyhow::{bail, Context};

use masq::client::{establish_tunnel, Client, ClientConfig, ClientConfigFile};
use masq::tls::ClientHelloBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "-h" | "--help" => print_usage(),
        "--version" => println!("masq-client {}", masq::VERSION),
        "-g" | "--generate" => generate_config()?,
        "-t" | "--test" => {
            let path = args.get(1).context("--test requires a config file path")?;
            test_connection(path).await?;
        }
        "-c" | "--config" => {
            let path = args.get(1).context("--config requires a file path")?;
            let listen = match args.get(2).map(String::as_str) {
                Some("-l") | Some("--listen") => {
                    Some(args.get(3).context("--listen requires an address")?.clone())
                }
                Some(other) => bail!("unknown option: {}", other),
                None => None,
            };
            run_client(path, listen).await?;
        }
        other => {
            eprintln!("Unknown option: {}", other);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"masq-client - local HTTP CONNECT front for the masq tunnel

USAGE:
    masq-client [OPTIONS]

OPTIONS:
    -c, --config <FILE> [-l <ADDR>]   Run with a configuration file
    -t, --test <FILE>                 Handshake once with the server and exit
    -g, --generate                    Print a configuration template
    -h, --help                        Print help information
        --version                     Print version

CONFIGURATION FILE FORMAT (JSON):
    {{
        "listen_addr": "127.0.0.1:1081",
        "remote_addr": "server.example.com:443",
        "secret": "<same secret as the server>",
        "server_name": "www.example.com",
        "ticket_time_hint": 3600,
        "allowed_hosts": ["voice.example.com"],
        "allowed_port": 64738
    }}

EXAMPLES:
    Check that the server accepts our credential:
        masq-client --test client.json

    Run the local proxy:
        masq-client --config client.json
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let template = ClientConfig::new(
        "<same secret as the server>",
        "server.example.com:443",
        vec!["voice.example.com".to_string()],
    );
    println!("{}", ClientConfigFile::from_config(&template).to_json()?);
    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<ClientConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    Ok(ClientConfigFile::from_json(&content)?.to_config()?)
}

async fn test_connection(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    tracing::info!("Testing handshake with {}", config.remote_addr);
    tracing::info!("Cover SNI: {}", config.server_name);

    let hello = ClientHelloBuilder::new(
        config.server_name.clone(),
        config.ticket_time_hint,
        config.opaque,
    );
    match establish_tunnel(&config, &config.authenticator(), &hello).await {
        Ok(_) => tracing::info!("Handshake completed, tunnel ready"),
        Err(e) => tracing::error!("Handshake failed: {}", e),
    }

    Ok(())
}

async fn run_client(config_path: &str, listen: Option<String>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(listen) = listen {
        config.listen_addr = listen;
        config.validate()?;
    }

    tracing::info!("masq-client {}", masq::VERSION);
    tracing::info!("Remote: {} (SNI {})", config.remote_addr, config.server_name);
    tracing::info!(
        "Allowed targets: {} on port {}",
        config.allowed_hosts.join(", "),
        config.allowed_port
    );

    let client = Client::new(config);
    let listener = client.bind().await?;
    client
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
