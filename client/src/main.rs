use clap::Parser;
use log::info;
use shared::DEFAULT_RENDER_DELAY_MS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Username presented on connect
    #[arg(short, long, default_value = "wanderer")]
    username: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Playback delay behind the server clock in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_RENDER_DELAY_MS)]
    render_delay: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client, connecting to {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = client::network::Client::new(
        &args.server,
        args.username,
        args.fake_ping,
        args.render_delay,
    )
    .await?;

    client.run().await
}
