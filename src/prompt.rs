//! The peer's interactive command surface.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::peer::Peer;

const HELP: &str = "Commands: list, download <filename>, peers, files, help, exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCommand {
    List,
    Download(String),
    /// the advisory active-peer cache
    Peers,
    /// files this peer currently shares
    Files,
    Help,
    Exit,
}

/// `Ok(None)` for a blank line, `Err` with a usage message for bad input.
pub fn parse_command(line: &str) -> Result<Option<PromptCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let command = match command {
        "list" => PromptCommand::List,
        "download" => match words.next() {
            Some(filename) => PromptCommand::Download(filename.to_owned()),
            None => return Err("Usage: download <filename>".to_owned()),
        },
        "peers" => PromptCommand::Peers,
        "files" => PromptCommand::Files,
        "help" => PromptCommand::Help,
        "exit" | "quit" => PromptCommand::Exit,
        other => return Err(format!("Unknown command `{other}`. {HELP}")),
    };
    Ok(Some(command))
}

/// Reads commands line by line until `exit` or end of input. Downloads are
/// written to the peer's shared directory.
pub async fn run_prompt<R, W>(peer: &Peer, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    output
        .write_all(format!("Peer-to-Peer File Sharing System\n{HELP}\n").as_bytes())
        .await?;
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let reply = match parse_command(&line) {
            Ok(None) => continue,
            Err(usage) => usage,
            Ok(Some(PromptCommand::Exit)) => {
                output.write_all(b"Exiting...\n").await?;
                break;
            }
            Ok(Some(command)) => execute(peer, command).await,
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await
}

async fn execute(peer: &Peer, command: PromptCommand) -> String {
    match command {
        PromptCommand::List => match peer.list().await {
            Ok(files) if files.is_empty() => "No files available.".to_owned(),
            Ok(files) => {
                let mut reply = String::from("Available files:");
                for (file, peers) in files {
                    reply.push_str(&format!("\n  {file} ({} peers)", peers.len()));
                }
                reply
            }
            Err(error) => format!("Error: {error}"),
        },
        PromptCommand::Download(filename) => {
            match peer.download(&filename, &peer.config().shared_dir).await {
                Ok(report) => format!(
                    "Downloaded {} ({} bytes) from {}",
                    report.filename, report.bytes, report.source
                ),
                Err(error) => format!("Download failed: {error}"),
            }
        }
        PromptCommand::Peers => {
            let peers = peer.active_peers().snapshot(Instant::now());
            if peers.is_empty() {
                return "No recently seen peers.".to_owned();
            }
            let mut reply = String::from("Recently seen peers:");
            for (address, ago) in peers {
                reply.push_str(&format!("\n  {address} ({}s ago)", ago.as_secs()));
            }
            reply
        }
        PromptCommand::Files => {
            let files = peer.known_files().snapshot();
            if files.is_empty() {
                return "Not sharing any files.".to_owned();
            }
            let mut reply = String::from("Sharing:");
            for file in files {
                reply.push_str(&format!("\n  {file}"));
            }
            reply
        }
        PromptCommand::Help => HELP.to_owned(),
        PromptCommand::Exit => String::new(),
    }
}
