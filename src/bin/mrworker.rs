use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use mapreduce_rt::mr::coordinator::ServerClient;
use mapreduce_rt::mr::function::{wc, MapFn, ReduceFn};
use mapreduce_rt::mr::rpc::{Output, Task, TaskKind, TaskRequest};
use mapreduce_rt::mr::worker::Worker;
use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::time::sleep;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(about = "MapReduce worker: polls the coordinator and executes map/reduce tasks")]
struct Args {
    /// Coordinator address to connect to.
    #[arg(long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,

    /// Working root for per-bucket intermediate files.
    #[arg(long, default_value = "./_output/temp")]
    temp_dir: String,

    /// Root for final reduce output files.
    #[arg(long, default_value = "./_output")]
    output_dir: String,

    /// Seconds to back off after receiving `Wait`.
    #[arg(long, default_value_t = 2)]
    wait_interval_secs: u64,
}

/// A worker generates a fresh opaque id at startup and repeats: request a
/// task, execute it, notify completion, repeat until told to exit. On any
/// local error it logs and terminates — other workers cover the abandoned
/// task once its lease expires.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let worker_id = Uuid::new_v4().to_string();
    println!("[Worker {worker_id}] connecting to coordinator at {}", args.addr);

    let client_transport = match tarpc::serde_transport::tcp::connect(args.addr, Json::default).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[Worker {worker_id}] failed to connect to coordinator: {e}");
            std::process::exit(1);
        }
    };
    let client = ServerClient::new(client::Config::default(), client_transport).spawn();

    let worker = Worker::new(args.temp_dir, args.output_dir);
    let mapf: MapFn = Box::new(wc::map);
    let reducef: ReduceFn = Box::new(wc::reduce);
    let wait_interval = Duration::from_secs(args.wait_interval_secs);

    loop {
        let request = TaskRequest {
            worker_id: worker_id.clone(),
        };
        let task = match client.get_task(context::current(), request).await {
            Ok(task) => task,
            Err(e) => {
                eprintln!("[Worker {worker_id}] RPC failure on GetTask: {e}, exiting");
                std::process::exit(1);
            }
        };

        match task.kind {
            TaskKind::Wait => {
                sleep(wait_interval).await;
            }
            TaskKind::Exit => {
                println!("[Worker {worker_id}] job complete, exiting");
                return Ok(());
            }
            TaskKind::Map => {
                if let Err(e) = worker.execute_map(&task, &mapf).await {
                    eprintln!("[Worker {worker_id}] map task {} failed: {e:#}", task.task_id);
                    std::process::exit(1);
                }
                notify_or_exit(&client, &worker_id, &task, TaskKind::Map).await;
            }
            TaskKind::Reduce => {
                if let Err(e) = worker.execute_reduce(&task, &reducef).await {
                    eprintln!("[Worker {worker_id}] reduce task {} failed: {e:#}", task.task_id);
                    std::process::exit(1);
                }
                notify_or_exit(&client, &worker_id, &task, TaskKind::Reduce).await;
            }
        }
    }
}

async fn notify_or_exit(client: &ServerClient, worker_id: &str, task: &Task, kind: TaskKind) {
    let output = Output {
        task_id: task.task_id.clone(),
        worker_id: worker_id.to_string(),
        kind,
        bucket_id: task.bucket_id.to_string(),
    };
    if let Err(e) = client.notify(context::current(), output).await {
        eprintln!("[Worker {worker_id}] RPC failure on Notify: {e}, exiting");
        std::process::exit(1);
    }
}
