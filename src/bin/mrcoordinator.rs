use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use mapreduce_rt::mr::coordinator::{Coordinator, Server};
use tarpc::{server::incoming::Incoming, tokio_serde::formats::Json};
use tokio::time::sleep;

/// One input file is one map task; `n_reduce` fixes the reduce fan-out for
/// the job's lifetime.
#[derive(Parser, Debug)]
#[command(about = "MapReduce coordinator: dispatches map/reduce tasks over RPC")]
struct Args {
    /// Input files, one map task per file.
    #[arg(required = true)]
    files: Vec<String>,

    /// Reduce fan-out (number of output partitions).
    #[arg(long)]
    n_reduce: usize,

    /// Address to bind the RPC server on.
    #[arg(long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,

    /// Seconds a worker may hold a task lease before it is reassigned.
    #[arg(long, default_value_t = 10)]
    lease_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!(
        "[Coordinator Configuration] #{} Map Tasks | #{} Reduce Tasks | lease timeout {}s",
        args.files.len(),
        args.n_reduce,
        args.lease_timeout_secs
    );

    let coordinator = Coordinator::with_lease_timeout(
        args.files,
        args.n_reduce,
        Duration::from_secs(args.lease_timeout_secs),
    );

    let server_transport = tarpc::serde_transport::tcp::listen(args.addr, Json::default).await?;
    let coordinator_for_server = coordinator.clone();

    tokio::spawn(
        server_transport
            // Accepts if this is a valid connection, otherwise ignores this connection
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .execute(coordinator_for_server.serve()),
    );

    println!(
        "[Preparation] The Coordinator RPC server has launched on {} and is currently serving",
        args.addr
    );

    // `Done` is checked in-process rather than over RPC; lease expiry is
    // handled lazily inside `GetTask`'s own scan, so no background timer
    // is needed here either.
    while !coordinator.done() {
        sleep(Duration::from_secs(1)).await;
    }

    println!("\nThe MapReduce job has finished; output files are under the configured output directory.");

    Ok(())
}
