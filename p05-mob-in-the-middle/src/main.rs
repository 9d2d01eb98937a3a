use clap::Parser;
use tokio::net::TcpListener;

use tracing::info;

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    #[arg(long, default_value_t = 10000)]
    port: u16,

    /// Upstream chat server to proxy to, host:port.
    #[arg(long, default_value = "chat.protohackers.com:16963")]
    upstream: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("start, proxying to {}", args.upstream);

    let listener = TcpListener::bind(format!("{}:{}", args.address, args.port)).await?;
    loop {
        let (socket, addr) = listener.accept().await?;
        info!("accepted {addr}");

        tokio::spawn(p05_mob_in_the_middle::handler(socket, args.upstream.clone()));
    }
}
