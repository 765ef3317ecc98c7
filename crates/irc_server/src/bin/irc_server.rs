use std::sync::Arc;

use clap::Parser;
use flexi_logger::{Duplicate, Logger};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use irc_server::cap::{self, CapCommand};
use irc_server::client::{Client, ConnectedClient};
use irc_server::config::Config;
use irc_server::constants::*;
use irc_server::dispatch;
use irc_server::persistence::{ChannelStore, NullChannelStore, SqlChannelStore};
use irc_server::registration::{self, UserStatus};
use irc_server::server::{ChannelRegistry, ClientRegistry, Server, ServerContext};

#[derive(Parser, Debug)]
#[command(name = "irc_server", about = "IRC server channel subsystem")]
struct Args {
    /// Path to the server's TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

fn greet(server: &Arc<dyn ServerContext>, client: &Arc<ConnectedClient>) {
    let nick = client.nick_string();
    let name = server.server_name();
    client.send(&[], name, RPL_WELCOME, &[&nick, &format!("Welcome to {name}, {nick}")]);
    client.send(&[], name, RPL_YOURHOST, &[&nick, &format!("Your host is {name}")]);
    client.send(&[], name, RPL_CREATED, &[&nick, "This server has no particular creation date"]);
    client.send(&[], name, RPL_MYINFO, &[&nick, name]);
}

async fn handle_cap_line(line: &str, client: &Arc<ConnectedClient>) {
    let Ok((_, command)) = cap::parse(line) else {
        warn!("client {}: unparseable CAP line: {line:?}", client.id());
        return;
    };
    match command {
        CapCommand::Ls => {
            client.send(&[], "*", "CAP", &["*", "LS", &cap::SUPPORTED.join(" ")]);
        }
        CapCommand::List => {
            client.send(&[], "*", "CAP", &["*", "LIST", ""]);
        }
        CapCommand::Req(tokens) => {
            let resolved = cap::resolve(&tokens);
            for capability in &resolved {
                client.grant_capability(*capability).await;
            }
            let ack = resolved.iter().map(|c| c.token()).collect::<Vec<_>>().join(" ");
            client.send(&[], "*", "CAP", &["*", "ACK", &ack]);
        }
        CapCommand::End => {}
    }
}

/// Drives one connection from its first byte through disconnect: CAP/
/// registration handshake, then the channel-operation dispatch loop.
async fn handle_connection(socket: tokio::net::TcpStream, addr: std::net::SocketAddr, server: Arc<dyn ServerContext>) {
    let (read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(256);

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let client = ConnectedClient::new(addr, tx);
    let mut lines = BufReader::new(read_half).lines();

    let mut status = UserStatus::Handshaking;
    while status != UserStatus::Active {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("client {addr}: read error during registration: {e}");
                return;
            }
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        if line.to_uppercase().starts_with("CAP") {
            handle_cap_line(line, &client).await;
            continue;
        }
        match registration::handle_line(line, &client, &server).await {
            Ok(UserStatus::Active) => {
                status = UserStatus::Active;
                greet(&server, &client);
            }
            Ok(UserStatus::Handshaking) => {}
            Err(e) => warn!("client {addr}: registration error: {e}"),
        }
    }

    info!("client {addr} registered as {}", client.nick_string());

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("client {addr}: read error: {e}");
                break;
            }
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        if line.to_uppercase().starts_with("CAP") {
            handle_cap_line(line, &client).await;
            continue;
        }
        if line.eq_ignore_ascii_case("QUIT") || line.to_uppercase().starts_with("QUIT ") {
            break;
        }
        let Some(tokens) = dispatch::parse_line(line) else {
            warn!("client {addr}: unparseable line: {line:?}");
            continue;
        };
        dispatch::dispatch(tokens, client.clone(), &server).await;
    }

    for channel_name in client.joined_channels() {
        if let Some(channel) = server.get(&channel_name) {
            channel.quit(client.id()).await;
        }
    }
    server.unregister(client.id());
    info!("client {addr} disconnected");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")
        .and_then(|logger| logger.log_to_stderr().duplicate_to_stderr(Duplicate::All).start())
        .ok();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let store: Arc<dyn ChannelStore> = if config.persistence.enabled {
        Arc::new(SqlChannelStore::connect(&config.persistence.database_url).await?)
    } else {
        Arc::new(NullChannelStore)
    };

    let server = Server::new(config.server.name.clone(), store);
    match server.load_persisted_channels().await {
        Ok(count) => info!("loaded {count} persisted channels"),
        Err(e) => error!("failed to load persisted channels: {e}"),
    }

    let bind_addr = format!("{}:{}", config.network.bind_address, config.network.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("{} listening on {bind_addr}", config.server.name);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("client connected: {addr}");
        let context = server.context();
        tokio::spawn(handle_connection(socket, addr, context));
    }
}
