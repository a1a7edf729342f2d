//! `moodctl <command>`: send one command to a running moodboxd and print
//! the snapshot that results. `moodctl status` only prints.

use clap::Parser;
use moodbox_proto::platform;
use moodbox_proto::protocol::{
    Broadcast, Command, ControllerSnapshot, Message, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "moodctl")]
#[command(about = "Control a running moodboxd")]
#[command(version)]
struct Args {
    /// Daemon control address
    #[arg(long, default_value_t = platform::control_address())]
    address: String,

    /// Print the snapshot as JSON
    #[arg(long)]
    json: bool,

    /// `status`, or one of: play, pause, play-pause, next-track, prev-track,
    /// next-playlist, prev-playlist, toggle-shuffle, next-service,
    /// prev-service, stop
    action: String,
}

async fn read_message(stream: &mut TcpStream) -> anyhow::Result<Message> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let body_len = u32::from_be_bytes(len) as usize;
    if body_len > MAX_FRAME_LEN {
        anyhow::bail!("daemon sent a {} byte frame", body_len);
    }
    let mut frame = len.to_vec();
    frame.resize(4 + body_len, 0);
    stream.read_exact(&mut frame[4..]).await?;
    Ok(Message::decode(&frame)?.0)
}

fn print_snapshot(snapshot: &ControllerSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("state:    {:?}", snapshot.state);
    println!("pending:  {:?}", snapshot.pending);
    println!("service:  {}", or_dash(&snapshot.service));
    println!("playlist: {}", or_dash(&snapshot.playlist));
    println!("track:    {}", or_dash(&snapshot.track));
    println!("shuffle:  {}", if snapshot.shuffle { "on" } else { "off" });
    println!("services: {}", snapshot.services.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = match args.action.as_str() {
        "status" => None,
        other => Some(other.parse::<Command>()?),
    };

    let mut stream = TcpStream::connect(&args.address).await?;
    let hello = match timeout(REPLY_TIMEOUT, read_message(&mut stream)).await?? {
        Message::Broadcast(Broadcast::Hello {
            protocol_version,
            snapshot,
        }) => {
            if protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "daemon speaks protocol {}, moodctl speaks {}",
                    protocol_version,
                    PROTOCOL_VERSION
                );
            }
            snapshot
        }
        other => anyhow::bail!("expected hello, got {:?}", other),
    };

    let Some(command) = command else {
        return print_snapshot(&hello, args.json);
    };

    stream
        .write_all(&Message::Command(command).encode()?)
        .await?;

    loop {
        match timeout(REPLY_TIMEOUT, read_message(&mut stream)).await?? {
            Message::Broadcast(Broadcast::State { snapshot }) if snapshot.rev > hello.rev => {
                return print_snapshot(&snapshot, args.json);
            }
            Message::Broadcast(Broadcast::Log { message }) => eprintln!("{}", message),
            _ => {}
        }
    }
}
