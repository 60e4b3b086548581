//! `schedulerctl` — a thin HTTP client mirroring
//! `original_source/client/main.go`'s action set, talking JSON over the
//! `transport.rs` routes instead of gRPC.

use std::collections::HashMap;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use schedulerd_core::task::Task;

#[derive(Parser, Debug)]
#[command(name = "schedulerctl", about = "Control client for schedulerd")]
struct Args {
    /// Base URL of the schedulerd HTTP transport.
    #[arg(long, env = "SCHEDULERCTL_ADDR", default_value = "http://127.0.0.1:50051")]
    addr: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List the apps registered in the server's config.
    Apps,
    /// List all registered tasks.
    List,
    /// Create a task from a JSON file.
    Create { file: String },
    /// Update a task from a JSON file.
    Update { uuid: String, file: String },
    /// Delete a task.
    Delete { uuid: String },
    /// Install a task's cron job.
    Start { uuid: String },
    /// Stop a running/installed task.
    Stop {
        uuid: String,
        #[arg(long)]
        force: bool,
    },
    /// Run a task immediately, outside its schedule.
    Run { uuid: String },
    /// List currently running task uuids.
    Running,
    /// Start the scheduler.
    StartScheduler,
    /// Stop the scheduler.
    StopScheduler {
        #[arg(long)]
        force: bool,
    },
    /// Stream live events as they occur.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.action {
        Action::Apps => {
            let apps: HashMap<String, String> = client
                .get(format!("{}/v1/apps", args.addr))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&apps)?);
        }
        Action::List => {
            let tasks: Vec<Task> = client
                .get(format!("{}/v1/tasks", args.addr))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Action::Create { file } => {
            let body = std::fs::read_to_string(file)?;
            let task: Task = serde_json::from_str(&body)?;
            let created: Task = client
                .post(format!("{}/v1/tasks", args.addr))
                .json(&task)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Action::Update { uuid, file } => {
            let body = std::fs::read_to_string(file)?;
            let task: Task = serde_json::from_str(&body)?;
            let updated: Task = client
                .post(format!("{}/v1/tasks/{uuid}", args.addr))
                .json(&task)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Action::Delete { uuid } => {
            client
                .delete(format!("{}/v1/tasks/{uuid}", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("deleted {uuid}");
        }
        Action::Start { uuid } => {
            client
                .post(format!("{}/v1/tasks/{uuid}/start", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("started {uuid}");
        }
        Action::Stop { uuid, force } => {
            client
                .post(format!("{}/v1/tasks/{uuid}/stop?force={force}", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("stopped {uuid}");
        }
        Action::Run { uuid } => {
            client
                .post(format!("{}/v1/tasks/{uuid}/run", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("run requested for {uuid}");
        }
        Action::Running => {
            let running: Vec<String> = client
                .get(format!("{}/v1/scheduler/running", args.addr))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&running)?);
        }
        Action::StartScheduler => {
            client
                .post(format!("{}/v1/scheduler/start", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("scheduler started");
        }
        Action::StopScheduler { force } => {
            client
                .post(format!("{}/v1/scheduler/stop?force={force}", args.addr))
                .send()
                .await?
                .error_for_status()?;
            println!("scheduler stopped");
        }
        Action::Watch => {
            let response = client
                .get(format!("{}/v1/watch", args.addr))
                .timeout(Duration::from_secs(u64::MAX))
                .send()
                .await?
                .error_for_status()?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                print!("{}", String::from_utf8_lossy(&chunk));
            }
        }
    }

    Ok(())
}
