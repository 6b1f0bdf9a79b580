//! octra-broker CLI
//!
//!   octra-broker serve [--port 8787]          → Run the authority with its HTTP runtime channel
//!   octra-broker verify <envelope-json>       → OSM-1 verification report
//!   octra-broker to-micro <amount>            → {"micro": "1500000"}
//!   octra-broker from-micro <micro>           → {"amount": "1.5"}
//!   octra-broker address <publicKeyBase64>    → {"address": "oct..."}
//!
//! Configuration:
//!   OCTRA_ROOT, OCTRA_RPC_URL, OCTRA_NETWORK (a .env file in the working directory is read first)
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use octra_broker::crypto::{address_from_public_key, decode_base64};
use octra_broker::format::{micro_to_oct_string, oct_to_micro, verify_signed_message, SignedMessage, VerifyOptions};
use octra_broker::logging::init_logging;
use octra_broker::{
    install_signal_handlers, Authority, BrokerConfig, FileStorage, HttpRpcClient, LoggingSurface, MemoryStorage,
};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

fn main() {
    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);
    init_logging();

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("octra-broker {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("serve") => cmd_serve(&opts),
        Some("verify") => cmd_verify(&opts),
        Some("to-micro") => cmd_to_micro(&opts),
        Some("from-micro") => cmd_from_micro(&opts),
        Some("address") => cmd_address(&opts),
        Some(cmd) => Err(format!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    let render = |value: &Value| {
        let text = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
        text.unwrap_or_else(|_| value.to_string())
    };

    match result {
        Ok(output) => println!("{}", render(&output)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": e})));
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    arg: Option<String>,
    app: Option<String>,
    data_dir: Option<String>,
    rpc_url: Option<String>,
    domain: Option<String>,
    port: Option<u16>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let next = args.get(i + 1).cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--app" | "-a" => { opts.app = next; i += 1; }
                "--data-dir" | "-d" => { opts.data_dir = next; i += 1; }
                "--rpc" | "-r" => { opts.rpc_url = next; i += 1; }
                "--domain" => { opts.domain = next; i += 1; }
                "--port" | "-p" => { opts.port = next.and_then(|p| p.parse().ok()); i += 1; }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        // First positional is command, the rest is its argument (joined)
        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if !positional.is_empty() {
            opts.arg = Some(positional.join(" "));
        }

        if opts.port.is_none() {
            opts.port = env::var("OCTRA_PORT").ok().and_then(|s| s.parse().ok());
        }

        opts
    }

    fn require_arg(&self, what: &str) -> Result<&str, String> {
        self.arg.as_deref().ok_or_else(|| format!("Missing {}", what))
    }
}

fn print_usage() {
    println!(
        r#"octra-broker - dApp request broker and signing pipeline

USAGE:
    octra-broker <command> [arg] [options]

COMMANDS:
    serve                       Run the authority and its HTTP runtime channel
    verify <envelope-json>      Verify an OSM-1 signed message
    to-micro <amount>           Whole tokens → micro-units
    from-micro <micro>          Micro-units → whole tokens
    address <publicKeyBase64>   Derive the oct… address of a public key

SERVER OPTIONS:
    --port, -p <port>           Server port (default: 8787, env: OCTRA_PORT)
    --app, -a <name>            Application name (default: octra)
    --data-dir, -d <path>       Storage root (env: OCTRA_ROOT)
    --rpc, -r <url>             Node RPC URL (env: OCTRA_RPC_URL)

VERIFY OPTIONS:
    --domain <origin>           Require payload.domain to equal this origin

OUTPUT OPTIONS:
    --json                      Raw JSON output
    --pretty                    Pretty-print JSON
    --version, -V               Print version

EXAMPLES:
    octra-broker to-micro 1.5
    octra-broker verify '{{"payload":{{...}},"signature":"...","publicKey":"...","address":"oct..."}}' --domain https://d.app
    OCTRA_RPC_URL=http://localhost:8080 octra-broker serve --port 8787
"#
    );
}

fn load_config(opts: &ParsedArgs) -> BrokerConfig {
    let mut config = BrokerConfig::from_env(opts.app.clone().unwrap_or_else(|| "octra".into()));
    if let Some(dir) = &opts.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(url) = &opts.rpc_url {
        config = config.with_rpc_url(url);
    }
    config
}

fn cmd_serve(opts: &ParsedArgs) -> Result<Value, String> {
    use octra_broker::server::{create_router_with_name, serve};

    let port = opts.port.unwrap_or(8787);
    let config = load_config(opts);

    let local = FileStorage::open(config.storage_path())
        .map_err(|e| format!("Failed to open storage: {}", e))?;
    let rpc = HttpRpcClient::new(config.rpc_url.clone())
        .map_err(|e| format!("Failed to create RPC client: {}", e))?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async {
        let shutdown = install_signal_handlers();

        let authority = Authority::resume(
            config.clone(),
            Arc::new(local),
            Arc::new(MemoryStorage::new()),
            Arc::new(rpc),
            Arc::new(LoggingSurface),
        );
        let sweeper = authority.spawn_sweeper(&shutdown);

        info!(rpc = %config.rpc_url, network = %config.network_id, "Authority started");
        info!("Endpoints:");
        info!("  GET    /health          - Health check");
        info!("  POST   /runtime         - Runtime message (SYNC_SESSION, LOCK_WALLET, ...)");
        info!("  GET    /approvals       - Pending approvals");
        info!("  PUT    /approvals/:id   - Resolve approval");
        info!("  DELETE /approvals/:id   - Approval window closed");

        let router = create_router_with_name(authority, &config.app);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        serve(router, addr, shutdown.clone())
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        shutdown.trigger();
        let _ = sweeper.await;
        info!("Approval sweeper stopped");

        Ok::<(), String>(())
    })?;

    Ok(json!({"status": "stopped"}))
}

fn cmd_verify(opts: &ParsedArgs) -> Result<Value, String> {
    let raw = opts.require_arg("envelope JSON")?;
    let envelope: SignedMessage = serde_json::from_str(raw)
        .map_err(|e| format!("Invalid envelope: {}", e))?;
    let mut options = VerifyOptions::now();
    if let Some(domain) = &opts.domain {
        options = options.with_domain(domain.clone());
    }
    let report = verify_signed_message(&envelope, &options);
    serde_json::to_value(report).map_err(|e| e.to_string())
}

fn cmd_to_micro(opts: &ParsedArgs) -> Result<Value, String> {
    let micro = oct_to_micro(opts.require_arg("amount")?).map_err(|e| e.to_string())?;
    Ok(json!({"micro": micro}))
}

fn cmd_from_micro(opts: &ParsedArgs) -> Result<Value, String> {
    let amount = micro_to_oct_string(opts.require_arg("micro amount")?).map_err(|e| e.to_string())?;
    Ok(json!({"amount": amount}))
}

fn cmd_address(opts: &ParsedArgs) -> Result<Value, String> {
    let public_key = decode_base64(opts.require_arg("public key")?).map_err(|e| e.to_string())?;
    if public_key.len() != 32 {
        return Err(format!("Public key must be 32 bytes, got {}", public_key.len()));
    }
    Ok(json!({"address": address_from_public_key(&public_key)}))
}
