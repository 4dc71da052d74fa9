//! Interactive REST-only chat: posts stdin lines to /message and polls /sync.

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::http::Server;
use super::registry::{self, Message};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const JOIN_ATTEMPTS: u32 = 3;

pub struct ChatOptions {
    pub peer_id: String,
    pub channel: String,
    pub ip: String,
    pub port: String,
}

/// Highest seq seen so far plus the messages newer than the previous one.
fn advance(last_seq: &mut u64, messages: Vec<Message>) -> Vec<Message> {
    let fresh: Vec<Message> = messages.into_iter().filter(|m| m.seq > *last_seq).collect();
    if let Some(max) = fresh.iter().map(|m| m.seq).max() {
        *last_seq = max;
    }
    fresh
}

pub async fn cmd_chat(server: &Server, opts: ChatOptions) -> Result<()> {
    registry::register(server, &opts.peer_id, &opts.ip, &opts.port).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    registry::create(server, &opts.channel).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut attempt = 1;
    loop {
        match registry::join(server, &opts.channel, &opts.peer_id).await {
            Ok(_) => break,
            Err(e) if attempt < JOIN_ATTEMPTS => {
                eprintln!("[warn] join failed ({e}), retrying");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }

    println!(
        "[{}] joined #{}. Type to chat, /quit to exit.",
        opts.peer_id, opts.channel
    );

    let poller = {
        let server = server.clone();
        let channel = opts.channel.clone();
        tokio::spawn(async move {
            let mut last_seq = 0;
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                match registry::sync(&server, &channel, last_seq).await {
                    Ok(resp) => {
                        for m in advance(&mut last_seq, resp.messages) {
                            println!("[{}] {}", m.from, m.text);
                        }
                    }
                    Err(e) => eprintln!("[warn] sync failed: {e}"),
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim_end_matches(['\r', '\n']);
                if text == "/quit" {
                    break;
                }
                if text.trim().is_empty() {
                    continue;
                }
                if let Err(e) = registry::send(server, &opts.channel, &opts.peer_id, text).await {
                    eprintln!("[error] send failed: {e}");
                }
            }
        }
    }

    poller.abort();
    println!("bye.");
    Ok(())
}
