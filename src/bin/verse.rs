//! Verse protocol CLI binary.
//!
//! # Commands
//!
//! - `host` - Listen for clients and acknowledge their node/tag group requests
//! - `connect` - Negotiate with a host, send a few commands, print what comes back
//! - `decode` - Decode length-prefixed frames from hex or base64

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use verse::{
    command::Command,
    negotiation::MethodId,
    session::{Outbox, SessionHandler},
    AckingHandler, Config, CredentialDescriptor, FrameDecoder, Host, SessionExit, VERSION,
};

#[derive(Parser)]
#[command(name = "verse")]
#[command(version = VERSION)]
#[command(about = "Verse protocol - session-based structured state exchange", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/verse/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept clients and run one session each
    Host {
        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Add a user as IDENTITY=SECRET (repeatable)
        #[arg(short, long = "user")]
        users: Vec<String>,

        /// Supported method, most preferred first (repeatable)
        #[arg(short, long = "method")]
        methods: Vec<String>,
    },

    /// Negotiate with a host and exchange commands
    Connect {
        /// Host as name[:service] (default: from config)
        host: Option<String>,

        /// Identity to authenticate as
        #[arg(short, long)]
        identity: String,

        /// Secret (falls back to VERSE_SECRET)
        #[arg(short, long)]
        secret: Option<String>,

        /// Offered method, most preferred first (repeatable)
        #[arg(short, long = "method")]
        methods: Vec<String>,

        /// Create a node (repeatable)
        #[arg(long = "node")]
        nodes: Vec<u32>,

        /// Create a tag group as NODE:GROUP (repeatable)
        #[arg(long = "taggroup")]
        taggroups: Vec<String>,

        /// Seconds to keep the session open
        #[arg(short = 't', long, default_value = "2")]
        duration: u64,

        /// Print session statistics as JSON on exit
        #[arg(long)]
        stats: bool,
    },

    /// Decode frames and print each command
    Decode {
        /// Hex input (or - for stdin)
        input: Option<String>,

        /// Input is base64 instead of hex
        #[arg(long)]
        base64: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?.with_env_overrides(),
        None => Config::load()?,
    };

    match cli.command {
        Commands::Host {
            listen,
            users,
            methods,
        } => cmd_host(config, listen, users, methods),

        Commands::Connect {
            host,
            identity,
            secret,
            methods,
            nodes,
            taggroups,
            duration,
            stats,
        } => cmd_connect(
            config, host, identity, secret, methods, nodes, taggroups, duration, stats,
        ),

        Commands::Decode { input, base64 } => cmd_decode(input, base64),
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn cmd_host(
    mut config: Config,
    listen: Option<String>,
    users: Vec<String>,
    methods: Vec<String>,
) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        config.host.listen = listen;
    }
    if !methods.is_empty() {
        config.host.methods = methods;
    }

    let mut store = config.host.credential_store();
    for user in &users {
        let (identity, secret) = user
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid user '{user}', expected IDENTITY=SECRET"))?;
        store.insert(identity, secret.as_bytes());
    }
    if store.is_empty() {
        tracing::warn!("No users configured; only the NONE method can succeed");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let host = Host::bind(config).await?.with_store(Arc::new(store));
        let handle = host.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.shutdown();
            }
        });
        host.serve(|| AckingHandler).await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Prints every command and acknowledges like the host does.
struct PrintingHandler {
    inner: AckingHandler,
}

impl SessionHandler for PrintingHandler {
    fn on_command(&mut self, command: &Command, outbox: &mut Outbox) {
        println!("{command}");
        self.inner.on_command(command, outbox);
    }

    fn on_terminated(&mut self, exit: &SessionExit) {
        println!("Session ended: {exit:?}");
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_connect(
    config: Config,
    host: Option<String>,
    identity: String,
    secret: Option<String>,
    methods: Vec<String>,
    nodes: Vec<u32>,
    taggroups: Vec<String>,
    duration: u64,
    stats: bool,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.client.address().to_string());
    let secret = secret
        .or_else(|| std::env::var("VERSE_SECRET").ok())
        .unwrap_or_default();

    let names = if methods.is_empty() {
        config.negotiation.methods.clone()
    } else {
        methods
    };
    let offered = names
        .iter()
        .map(|name| name.parse::<MethodId>())
        .collect::<Result<Vec<_>, _>>()?;
    let credentials = CredentialDescriptor::new(identity, secret, offered)?;

    let mut outgoing: Vec<Command> = nodes
        .into_iter()
        .map(|node_id| Command::node_create(node_id, 0, 0, 0))
        .collect();
    for arg in &taggroups {
        let (node, group) = arg
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid tag group '{arg}', expected NODE:GROUP"))?;
        outgoing.push(Command::taggroup_create(node.parse()?, group.parse()?, 0));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let session = verse::negotiate(&host, credentials, &config).await?;
        let handle = session.handle();
        for command in outgoing {
            handle.send(command)?;
        }

        let run = tokio::spawn(session.run(PrintingHandler {
            inner: AckingHandler,
        }));
        tokio::time::sleep(Duration::from_secs(duration)).await;
        handle.shutdown();
        run.await??;

        if stats {
            println!("{}", serde_json::to_string_pretty(&handle.stats())?);
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_decode(input: Option<String>, base64: bool) -> anyhow::Result<()> {
    let text = read_input(input)?;
    let text: String = text.split_whitespace().collect();

    let bytes = if base64 {
        BASE64.decode(text.as_bytes())?
    } else {
        hex_decode(&text).map_err(|e| anyhow::anyhow!(e))?
    };

    let mut decoder = FrameDecoder::default();
    decoder.extend(&bytes);
    let mut frames = 0usize;
    let mut errors = 0usize;
    while let Some(decoded) = decoder.next_command() {
        match decoded {
            Ok(command) => {
                frames += 1;
                println!("{command}");
            },
            Err(e) => {
                errors += 1;
                eprintln!("error: {e}");
            },
        }
    }

    if decoder.buffered() > 0 {
        eprintln!("{} trailing byte(s) do not form a complete frame", decoder.buffered());
    }
    eprintln!("{frames} command(s), {errors} error(s)");
    Ok(())
}

fn read_input(input: Option<String>) -> anyhow::Result<String> {
    match input {
        Some(s) if s != "-" => Ok(s),
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        },
    }
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, &'static str> {
    if hex.len() % 2 != 0 {
        return Err("Invalid hex string length");
    }

    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

fn nibble(c: u8) -> Result<u8, &'static str> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err("Invalid hex character"),
    }
}
