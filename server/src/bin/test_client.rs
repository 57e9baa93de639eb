use clap::Parser;
use serde_json::json;
use shared::{ServerMessage, DEFAULT_PORT, TICK_RATE};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};

/// Scripted client: authenticates, then holds a movement input and prints
/// the world states it receives.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    addr: String,

    #[arg(short, long, default_value = "TestPlayer")]
    username: String,

    #[arg(short, long, default_value = "test@test.com")]
    email: String,

    #[arg(short, long, default_value = "Passw0rd")]
    password: String,

    /// Log in instead of registering
    #[arg(long)]
    login: bool,

    /// Number of movement frames to send
    #[arg(long, default_value_t = TICK_RATE)]
    moves: u32,

    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    move_x: f32,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    move_z: f32,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    rotate_y: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.addr).await?;
    println!("Connected to {}", stream.peer_addr()?);
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let auth = if args.login {
        json!({ "type": "login", "username": args.username, "password": args.password })
    } else {
        json!({
            "type": "register",
            "username": args.username,
            "email": args.email,
            "password": args.password,
        })
    };
    writer.write_all(format!("{}\n", auth).as_bytes()).await?;

    // Skip anything that is not the auth reply
    let player_id = loop {
        let Some(line) = timeout(Duration::from_secs(5), lines.next_line()).await?? else {
            return Err("server closed the connection".into());
        };
        if let Ok(ServerMessage::AuthResponse {
            success,
            message,
            player_id,
            username,
        }) = serde_json::from_str(&line)
        {
            println!("Auth {}: {} ({})", if success { "ok" } else { "failed" }, message, username);
            if !success {
                return Ok(());
            }
            break player_id;
        }
    };
    println!("Playing as {}", player_id);

    let movement = json!({
        "type": "move",
        "moveX": args.move_x,
        "moveZ": args.move_z,
        "rotateY": args.rotate_y,
    });
    let movement = format!("{}\n", movement);

    let mut ticker = interval(Duration::from_secs(1) / TICK_RATE);
    let mut sent = 0;
    while sent < args.moves {
        tokio::select! {
            _ = ticker.tick() => {
                writer.write_all(movement.as_bytes()).await?;
                sent += 1;
            }
            line = lines.next_line() => match line? {
                Some(line) => print_player(&line, player_id),
                None => return Err("server closed the connection".into()),
            },
        }
    }

    // Drain whatever is still in flight
    while let Ok(Ok(Some(line))) = timeout(Duration::from_millis(200), lines.next_line()).await {
        print_player(&line, player_id);
    }

    println!("Disconnecting");
    writer.shutdown().await?;
    Ok(())
}

fn print_player(line: &str, player_id: i64) {
    if let Ok(ServerMessage::WorldState { players }) = serde_json::from_str(line) {
        for player in players.iter().filter(|p| i64::from(p.player_id) == player_id) {
            println!(
                "Player {} at ({:.3}, {:.3}, {:.3}) facing {:.1}",
                player.player_id, player.x, player.y, player.z, player.rotation_y
            );
        }
    }
}
