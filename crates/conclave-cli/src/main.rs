//! `conclave-cli`: operator tool for the coordinator API (§2) — submit
//! tasks, poll status/progress, abort, and inspect templates/analytics.
//!
//! ```bash
//! conclave-cli --base-url http://localhost:3000 submit --user-id alice --query "what is rust"
//! ```

mod client;
mod output;

use std::time::Duration;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use uuid::Uuid;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "conclave-cli", version, about = "Operator CLI for the Conclave orchestration API")]
struct Cli {
    /// Base URL of the `conclave-orchestrator` HTTP API.
    #[arg(long, env = "CONCLAVE_API_URL", default_value = "http://localhost:3000")]
    base_url: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_seconds: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new task.
    Submit {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        query: String,
        /// A registered template name; omitted lets intent analysis pick the plan.
        #[arg(long)]
        template: Option<String>,
    },
    /// Fetch a task's current status.
    Status { task_id: Uuid },
    /// Fetch a task's progress stream.
    Progress { task_id: Uuid },
    /// Abort a running task.
    Abort { task_id: Uuid },
    /// List registered DAG templates.
    Templates,
    /// Aggregate analytics over a trailing window (e.g. `24h`, `30m`).
    Analytics {
        #[command(subcommand)]
        target: AnalyticsTarget,
    },
}

#[derive(Subcommand)]
enum AnalyticsTarget {
    /// Task outcome counts and average duration.
    Tasks {
        #[arg(long)]
        window: Option<String>,
    },
    /// Per-agent-kind throughput and failure counts.
    Agents {
        #[arg(long)]
        window: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Cli::command().styles(output::clap_styles()).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    let client = ApiClient::new(cli.base_url, Duration::from_secs(cli.timeout_seconds))?;

    match cli.command {
        Command::Submit { user_id, query, template } => submit(&client, user_id, query, template).await,
        Command::Status { task_id } => status(&client, task_id).await,
        Command::Progress { task_id } => progress(&client, task_id).await,
        Command::Abort { task_id } => abort(&client, task_id).await,
        Command::Templates => templates(&client).await,
        Command::Analytics { target } => match target {
            AnalyticsTarget::Tasks { window } => task_analytics(&client, window).await,
            AnalyticsTarget::Agents { window } => agent_analytics(&client, window).await,
        },
    }
}

async fn submit(client: &ApiClient, user_id: String, query: String, template: Option<String>) -> anyhow::Result<()> {
    match client.submit_task(user_id, query, template).await {
        Ok(created) => {
            output::success("Task submitted");
            output::label("Task ID", created.task_id);
        }
        Err(err) => output::error(format!("Failed to submit task: {err}")),
    }
    Ok(())
}

async fn status(client: &ApiClient, task_id: Uuid) -> anyhow::Result<()> {
    match client.get_task(task_id).await {
        Ok(task) => {
            output::header("Task status");
            output::label("Task ID", task.task_id);
            output::label("User", task.user_id);
            output::label("Query", task.query);
            output::label("Template", task.template_name);
            output::label("Status", format!("{:?}", task.status));
            output::label("Plan", task.plan.join(" -> "));
            output::label("Completed stages", task.completed_stages.join(", "));
            output::label("Current stage", task.current_stage.as_deref().unwrap_or("-"));
            output::label("Retrieval hits", task.retrieval_hit_count);
            if let Some(response) = &task.response {
                output::blank();
                output::header("Response");
                output::dim(response.to_string());
            }
            if let Some(error) = &task.error {
                output::blank();
                output::warning(format!("Task error: {error}"));
            }
        }
        Err(err) => output::error(format!("Failed to fetch task: {err}")),
    }
    Ok(())
}

async fn progress(client: &ApiClient, task_id: Uuid) -> anyhow::Result<()> {
    match client.get_progress(task_id).await {
        Ok(events) if events.is_empty() => output::dim("No progress events yet"),
        Ok(events) => {
            output::header("Progress");
            for event in events {
                output::label(format!("[{}] {}", event.stage, event.phase), event.message);
            }
        }
        Err(err) => output::error(format!("Failed to fetch progress: {err}")),
    }
    Ok(())
}

async fn abort(client: &ApiClient, task_id: Uuid) -> anyhow::Result<()> {
    match client.abort_task(task_id).await {
        Ok(task) => {
            output::success("Abort requested");
            output::label("Status", format!("{:?}", task.status));
        }
        Err(err) => output::error(format!("Failed to abort task: {err}")),
    }
    Ok(())
}

async fn templates(client: &ApiClient) -> anyhow::Result<()> {
    match client.list_templates().await {
        Ok(templates) if templates.is_empty() => output::dim("No templates registered"),
        Ok(templates) => {
            output::header("Registered templates");
            for template in templates {
                output::label(template.name, template.stages.join(" -> "));
            }
        }
        Err(err) => output::error(format!("Failed to list templates: {err}")),
    }
    Ok(())
}

async fn task_analytics(client: &ApiClient, window: Option<String>) -> anyhow::Result<()> {
    match client.task_analytics(window.as_deref()).await {
        Ok(stats) => {
            output::header("Task analytics");
            output::label("Window (s)", stats.window_seconds);
            output::label("Total", stats.total);
            output::label("Completed", stats.completed);
            output::label("Failed", stats.failed);
            output::label("Aborted", stats.aborted);
            output::label("Timed out", stats.timed_out);
            output::label("Avg duration (ms)", format!("{:.1}", stats.avg_duration_ms));
        }
        Err(err) => output::error(format!("Failed to fetch task analytics: {err}")),
    }
    Ok(())
}

async fn agent_analytics(client: &ApiClient, window: Option<String>) -> anyhow::Result<()> {
    match client.agent_analytics(window.as_deref()).await {
        Ok(rows) if rows.is_empty() => output::dim("No agent activity in this window"),
        Ok(rows) => {
            output::header("Agent analytics");
            for row in rows {
                output::label(
                    row.agent_kind,
                    format!("processed={} failed={} avg_ms={:.1}", row.processed, row.failed, row.avg_duration_ms),
                );
            }
        }
        Err(err) => output::error(format!("Failed to fetch agent analytics: {err}")),
    }
    Ok(())
}
