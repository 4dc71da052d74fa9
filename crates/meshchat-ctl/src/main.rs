//! meshchat-ctl — command-line client for the meshchat registry.

mod cmd;

use anyhow::{Context, Result};

use cmd::http::{DEFAULT_COOKIE, DEFAULT_SERVER, Server};

fn print_usage() {
    println!("Usage: meshchat-ctl [--server <url>] [--cookie <cookie>] <command>");
    println!();
    println!("Commands:");
    println!("  login                              Ask the registry for its cookie");
    println!("  register <peer_id> <ip> <port>     Publish a peer endpoint");
    println!("  create <channel>                   Create a channel");
    println!("  join <channel> <peer_id>           Join and list members");
    println!("  send <channel> <peer_id> <text>    Post a message");
    println!("  sync <channel> [after]             Show messages after a seq");
    println!("  chat <peer_id> [channel] [--ip <ip>] [--port <port>]");
    println!("                                     Interactive chat via the registry");
    println!();
    println!("Options:");
    println!("  --server <url>     Registry base URL (default: {DEFAULT_SERVER})");
    println!("  --cookie <cookie>  Auth cookie (default: {DEFAULT_COOKIE})");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut server_url = DEFAULT_SERVER.to_string();
    let mut cookie = DEFAULT_COOKIE.to_string();
    let mut ip = "127.0.0.1".to_string();
    let mut port = "5001".to_string();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--server" | "--cookie" | "--ip" | "--port" => {
                i += 1;
                let value = args
                    .get(i)
                    .with_context(|| format!("{flag} requires a value"))?
                    .clone();
                match flag {
                    "--server" => server_url = value,
                    "--cookie" => cookie = value,
                    "--ip" => ip = value,
                    _ => port = value,
                }
            }
            _ => remaining.push(&args[i]),
        }
        i += 1;
    }

    let server = Server::new(&server_url, &cookie)?;

    match remaining.as_slice() {
        ["login"] => cmd::registry::cmd_login(&server).await,
        ["register", peer_id, ip, port] => {
            cmd::registry::cmd_register(&server, peer_id, ip, port).await
        }
        ["create", channel] => cmd::registry::cmd_create(&server, channel).await,
        ["join", channel, peer_id] => cmd::registry::cmd_join(&server, channel, peer_id).await,
        ["send", channel, peer_id, text @ ..] if !text.is_empty() => {
            cmd::registry::cmd_send(&server, channel, peer_id, &text.join(" ")).await
        }
        ["sync", channel] => cmd::registry::cmd_sync(&server, channel, 0).await,
        ["sync", channel, after] => {
            let after: u64 = after.parse().context("after must be a number")?;
            cmd::registry::cmd_sync(&server, channel, after).await
        }
        ["chat", peer_id, rest @ ..] if rest.len() <= 1 => {
            let channel = rest.first().copied().unwrap_or("room");
            let opts = cmd::chat::ChatOptions {
                peer_id: peer_id.to_string(),
                channel: channel.to_string(),
                ip,
                port,
            };
            cmd::chat::cmd_chat(&server, opts).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
