//! resplink - command-line RESP client
//!
//! Sends one command to a RESP server and prints the reply. With
//! `--repeat N` the command is pipelined N times: N sends, one flush, N
//! receives.

use clap::Parser;
use resplink::{Arg, ConnectOptions, Connection, Error};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Command-line configuration
#[derive(Parser, Debug)]
#[command(name = "resplink", version = resplink::VERSION)]
#[command(about = "Send a command to a RESP server and print the reply")]
struct Cli {
    /// Server host
    #[arg(short = 'H', long, default_value = resplink::DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = resplink::DEFAULT_PORT)]
    port: u16,

    /// ACL username (requires --password)
    #[arg(long)]
    user: Option<String>,

    /// Password sent with AUTH
    #[arg(short = 'a', long)]
    password: Option<String>,

    /// Name registered with CLIENT SETNAME
    #[arg(long)]
    client_name: Option<String>,

    /// Database selected after connecting
    #[arg(short = 'n', long, default_value_t = 0)]
    db: i64,

    /// Read timeout in milliseconds (0 = none)
    #[arg(long, default_value_t = 5000)]
    read_timeout_ms: u64,

    /// Write timeout in milliseconds (0 = none)
    #[arg(long, default_value_t = 5000)]
    write_timeout_ms: u64,

    /// Pipeline the command this many times
    #[arg(short, long, default_value_t = 1)]
    repeat: usize,

    /// Command name followed by its arguments
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

impl Cli {
    fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .read_timeout(Duration::from_millis(self.read_timeout_ms))
            .write_timeout(Duration::from_millis(self.write_timeout_ms))
            .database(self.db);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(name) = &self.client_name {
            options = options.client_name(name);
        }
        options
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let conn = Connection::connect(cli.address(), cli.options()).await?;
    debug!(address = %cli.address(), "Connected");

    let (name, rest) = cli
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("missing command"))?;
    let args: Vec<Arg> = rest.iter().map(Arg::from).collect();

    for _ in 0..cli.repeat {
        conn.send(name, &args).await?;
    }
    conn.flush().await?;

    for _ in 0..cli.repeat {
        match conn.receive().await {
            Ok(reply) => println!("{}", reply),
            Err(Error::Remote(e)) => println!("(error) {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    let _ = conn.close().await;
    Ok(())
}
