//! FlashPolicy - An Async Flash Socket Policy Server
//!
//! This is the main entry point for the FlashPolicy server.
//! It parses the command line, loads the policy, starts the listener and
//! waits for Ctrl+C to shut down.

use flashpolicy::{PolicyServer, ServerConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                if i + 1 < args.len() {
                    config.set_host(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: --host requires a value");
                    std::process::exit(1);
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    let port = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    config.set_port(port);
                    i += 2;
                } else {
                    eprintln!("Error: --port requires a value");
                    std::process::exit(1);
                }
            }
            "--policy-file" | "-f" => {
                if i + 1 < args.len() {
                    config.set_policy_file(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: --policy-file requires a value");
                    std::process::exit(1);
                }
            }
            "--timeout" | "-t" => {
                if i + 1 < args.len() {
                    // Invalid values are logged and ignored, not fatal
                    config.set_socket_timeout(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: --timeout requires a value");
                    std::process::exit(1);
                }
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("FlashPolicy version {}", flashpolicy::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn print_help() {
    println!(
        r#"
FlashPolicy - An Async Flash Socket Policy Server

USAGE:
    flashpolicy [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>           Port to listen on (default: 843)
    -f, --policy-file <PATH>    Serve this file instead of the built-in policy
    -t, --timeout <SECONDS>     Wait this long for a client's request (default: 30)
    -v, --version               Print version information
        --help                  Print this help message

EXAMPLES:
    flashpolicy                              # Start on 0.0.0.0:843
    flashpolicy --port 8430                  # Unprivileged port
    flashpolicy -f /etc/crossdomain.xml      # Serve a custom policy

TESTING:
    $ printf '<policy-file-request/>\0' | nc localhost 843
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
FlashPolicy v{} - Flash Socket Policy Server
──────────────────────────────────────────────────────────────
Listening on {}
Request timeout {}s

Use Ctrl+C to shutdown gracefully.
"#,
        flashpolicy::VERSION,
        config.bind_address(),
        config.socket_timeout.as_secs()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up logging; RUST_LOG overrides the default level
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Parse command-line arguments
    let config = config_from_args();

    // Load the policy and bind the listener
    let mut server = PolicyServer::new(config);
    server.init();
    server.start().await?;

    // Print the banner
    print_banner(server.config());

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");

    server.shutdown().await;

    let stats = server.stats();
    info!(
        accepted = stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed),
        served = stats
            .policies_served
            .load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
