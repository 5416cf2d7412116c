use clap::Parser;
use dungeon_client::network::Client;
use dungeon_shared::{ServerMessage, DEFAULT_PORT};
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Nickname to join with
    #[arg(short = 'n', long, default_value = "keeper")]
    nick: String,

    /// Number of turns to watch before leaving
    #[arg(short = 't', long, default_value = "10")]
    turns: u64,

    /// Chat line to send once joined
    #[arg(long)]
    say: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::connect(&args.server, &args.nick).await?;
    let mut say = args.say;
    let mut seen = 0;

    while seen < args.turns {
        let Some(message) = client.next_message().await? else {
            info!("Server closed the connection");
            break;
        };
        match message {
            ServerMessage::NewTurn(turn) => {
                seen += 1;
                let world = client.world();
                info!(
                    "Turn {}: {} creatures, {} players",
                    turn,
                    world.creatures.len(),
                    world.players.len() + 1
                );
                if let Some(line) = say.take() {
                    client.chat(&line).await?;
                }
            }
            ServerMessage::Chat { nick, message } => println!("{}: {}", nick, message),
            _ => {}
        }
    }

    Ok(())
}
