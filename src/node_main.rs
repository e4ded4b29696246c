use std::sync::Arc;

use vrouter::cli::Cli;
use vrouter::node::NodeBuilder;
use vrouter::Args;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = match Args::try_from(std::env::args()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            eprintln!(
                "Usage: ./node <lnx-file> [route-table-file] [--rip-interval <secs>] \
                 [--route-timeout <secs>] [--arp-retry <secs>] [--arp-max-age <secs>]"
            );
            std::process::exit(1);
        }
    };

    let node = match NodeBuilder::new(&args).build().await {
        Ok(node) => Arc::new(node),
        Err(e) => {
            eprintln!("Failed to start node: {:?}", e);
            std::process::exit(1);
        }
    };
    log::info!("{}", args);

    let runner = node.clone();
    let receiver = tokio::spawn(async move {
        runner.run().await;
    });

    Cli::new(node.clone()).run().await;

    node.shutdown().await;
    receiver.abort();
}
