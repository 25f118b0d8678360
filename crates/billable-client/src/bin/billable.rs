//! Command-line front end for the billable daemon.

use anyhow::Result;
use billable_client::BillableClient;
use billable_core::models::{format_duration, PeriodStats};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "billable")]
#[command(about = "Track billable time against the billable daemon", long_about = None)]
struct Cli {
    /// Daemon socket path
    #[arg(short, long, default_value = "/tmp/billable.sock")]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start timing a task (resumes a paused or stopped timer)
    Start {
        task_id: String,
        #[arg(short, long)]
        project: String,
    },
    /// Pause running timers
    Pause {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    /// Resume a paused or stopped timer
    Resume { task_id: String },
    /// Stop timers
    Stop {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    /// Discard a timer and its recorded time
    Reset { task_id: String },
    /// Show one timer, or every timer and the current session
    Status {
        task_id: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Time worked today and this week
    Stats {
        /// Recompute from the remote store
        #[arg(long)]
        refresh: bool,
    },
    /// Remote sync health
    Sync {
        /// Push pending changes now
        #[arg(long)]
        heartbeat: bool,
    },
    /// Pause everything and close the work session
    SignOut,
    /// Print daemon events as they happen
    Watch,
    /// Show or change daemon configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Change tick intervals
    Sync {
        #[arg(long)]
        heartbeat_secs: Option<u64>,
        #[arg(long)]
        session_refresh_secs: Option<u64>,
        #[arg(long)]
        cache_flush_secs: Option<u64>,
        #[arg(long)]
        display_tick_millis: Option<u64>,
    },
    /// Point the daemon at a remote store (applies on restart)
    Remote {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Restore defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = BillableClient::new(cli.socket);

    match cli.command {
        Command::Start { task_id, project } => {
            print_outcome(&client.timer_start(&task_id, &project).await?);
        }
        Command::Pause { task_ids } => {
            let results =
                futures::future::join_all(task_ids.iter().map(|id| client.timer_pause(id))).await;
            print_outcomes(&task_ids, results);
        }
        Command::Resume { task_id } => {
            print_outcome(&client.timer_resume(&task_id).await?);
        }
        Command::Stop { task_ids } => {
            let results =
                futures::future::join_all(task_ids.iter().map(|id| client.timer_stop(id))).await;
            print_outcomes(&task_ids, results);
        }
        Command::Reset { task_id } => {
            print_outcome(&client.timer_reset(&task_id).await?);
        }
        Command::Status {
            task_id: Some(task_id),
            project,
        } => {
            print_timer(&client.timer_get(&task_id, project.as_deref()).await?);
        }
        Command::Status { task_id: None, .. } => {
            let timers = client.timer_list().await?;
            match timers.as_array() {
                Some(timers) if !timers.is_empty() => timers.iter().for_each(print_timer),
                _ => println!("No timers"),
            }

            let session = client.session_get().await?;
            match session["active"].as_object() {
                Some(active) => println!(
                    "Session active since {}",
                    active["start_time"].as_str().unwrap_or("?")
                ),
                None => println!("No active session"),
            }
        }
        Command::Stats { refresh } => {
            let stats: PeriodStats = serde_json::from_value(client.session_stats(refresh).await?)?;
            println!(
                "Today: {} in {} sessions",
                format_duration(stats.today_seconds),
                stats.today_sessions
            );
            println!(
                "Week:  {} in {} sessions",
                format_duration(stats.week_seconds),
                stats.week_sessions
            );
        }
        Command::Sync { heartbeat } => {
            if heartbeat {
                let report = client.sync_heartbeat().await?;
                if report.is_null() {
                    println!("Heartbeat already in progress");
                } else {
                    println!(
                        "Heartbeat: {} pushed, {} created, {} failed",
                        report["pushed"], report["created"], report["failed"]
                    );
                }
            }
            print_sync_status(&client.sync_status().await?);
        }
        Command::SignOut => {
            let report = client.sign_out().await?;
            let paused = report["paused_tasks"]
                .as_array()
                .map(|tasks| tasks.len())
                .unwrap_or(0);
            println!("Paused {} timers", paused);
            if report["session_ended"].as_bool().unwrap_or(false) {
                println!("Work session closed");
            }
            if report["sync_health"]["state"] != "healthy" {
                eprintln!("warning: some changes have not reached the remote store yet");
            }
        }
        Command::Watch => {
            let mut rx = client.subscribe_notifications().await?;
            println!("Watching {} (Ctrl-C to quit)", client.socket_path());
            while let Some(notification) = rx.recv().await {
                println!("{} {}", notification.method, notification.params);
            }
        }
        Command::Config { action } => {
            let config = match action {
                None => client.config_get().await?,
                Some(ConfigAction::Sync {
                    heartbeat_secs,
                    session_refresh_secs,
                    cache_flush_secs,
                    display_tick_millis,
                }) => {
                    client
                        .config_update_sync(json!({
                            "heartbeat_interval_secs": heartbeat_secs,
                            "session_refresh_interval_secs": session_refresh_secs,
                            "cache_flush_interval_secs": cache_flush_secs,
                            "display_tick_millis": display_tick_millis,
                        }))
                        .await?
                }
                Some(ConfigAction::Remote {
                    url,
                    token,
                    timeout_secs,
                }) => {
                    client
                        .config_update_remote(json!({
                            "base_url": url,
                            "api_token": token,
                            "timeout_secs": timeout_secs,
                        }))
                        .await?
                }
                Some(ConfigAction::Reset) => client.config_reset().await?,
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_timer(view: &Value) {
    let mut line = format!(
        "{:<20} {:<8} {}",
        view["task_id"].as_str().unwrap_or("?"),
        view["state"].as_str().unwrap_or("?"),
        view["elapsed"].as_str().unwrap_or("--:--:--"),
    );
    if view["unsynced"].as_bool().unwrap_or(false) {
        line.push_str("  (not synced)");
    }
    println!("{}", line);
}

fn print_outcome(outcome: &Value) {
    print_timer(&outcome["timer"]);
    if let Some(warning) = outcome["warning"].as_str() {
        eprintln!("warning: {}", warning);
    }
}

fn print_outcomes(task_ids: &[String], results: Vec<Result<Value>>) {
    for (task_id, result) in task_ids.iter().zip(results) {
        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("{}: {}", task_id, e),
        }
    }
}

fn print_sync_status(status: &Value) {
    match status["health"]["state"].as_str() {
        Some("healthy") => println!("Sync: healthy"),
        _ => println!(
            "Sync: degraded since {} ({})",
            status["health"]["since"].as_str().unwrap_or("?"),
            status["health"]["last_error"].as_str().unwrap_or("unknown error"),
        ),
    }
    println!(
        "Unsynced timers: {}, pending deletes: {}",
        status["dirty_timers"], status["pending_deletes"]
    );
    if let Some(error) = status["last_rehydrate"]["error"].as_str() {
        println!("Startup load failed: {}", error);
    }
}
