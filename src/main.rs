use std::process;

use clap::Parser;
use log::{error, info};

use kvraft::{Config, DatagramTransport, Replica};

/// One replica of the replicated key-value store.
#[derive(Parser)]
#[command(name = "kvraft", about = "Replicated in-memory key-value store replica")]
struct Args {
    /// Identifier of this replica; also the name of its pre-bound datagram
    /// endpoint.
    id: String,

    /// Identifiers of every other replica in the cluster.
    #[arg(required = true)]
    peers: Vec<String>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let config = Config::new(args.id.clone(), args.peers);

    let transport = match DatagramTransport::connect(&args.id) {
        Ok(transport) => transport,
        Err(err) => {
            error!("{}: cannot reach endpoint: {}", args.id, err);
            process::exit(1);
        }
    };

    info!(
        "{}: starting with {} peer(s)",
        config.id,
        config.peers.len()
    );
    let mut replica = Replica::new(config, transport);
    if let Err(err) = replica.run() {
        error!("{}: replica terminated: {}", args.id, err);
        process::exit(1);
    }
}
