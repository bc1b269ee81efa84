use clap::Parser;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,

    /// Directory for persisted chunks and entity records
    #[clap(short, long, default_value = "world_data")]
    data_dir: PathBuf,

    /// Terrain generation seed
    #[clap(short, long, default_value = "42")]
    seed: u64,

    /// Maximum number of concurrent clients
    #[clap(short, long, default_value = "32")]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate as f64);

    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        &args.data_dir,
        args.seed,
    )
    .await?;

    server.run().await
}
