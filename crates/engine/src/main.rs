use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use hogq_common::ids::{HogId, JobId};
use hogq_common::types::JobStatus;

use hogq_engine::commands;
use hogq_engine::hog::{HogConfig, HogRunner};
use hogq_engine::monitor::{Monitor, MonitorConfig};
use hogq_engine::store::StoreClient;

/// Hog supervision cadence and shutdown margin.
const HOG_TICK: Duration = Duration::from_secs(60);
const HOG_EXIT_GRACE: Duration = Duration::from_secs(120);
/// Monitor supervision cadence.
const MONITOR_TICK: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    name = "hogq",
    version,
    about = "Queues user jobs and runs them in batches inside cluster scheduler slots"
)]
struct Cli {
    /// SQLite store to interact with.
    #[arg(long, value_name = "FILE", default_value = "jobs.sqlite", global = true)]
    db: PathBuf,

    /// Store busy timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 300, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new jobs store.
    Init,
    /// Submit a job.
    Submit {
        /// The executable to run.
        executable: String,
        /// File to save standard output to.
        #[arg(short = 'o', long, value_name = "FILE")]
        stdout: Option<String>,
        /// File to save standard error to.
        #[arg(short = 'e', long, value_name = "FILE")]
        stderr: Option<String>,
    },
    /// Cancel a job.
    Cancel {
        /// ID of a submitted job.
        jobid: JobId,
    },
    /// Print a job's current status.
    Check {
        /// ID of a submitted job.
        jobid: JobId,
    },
    /// List jobs, or the hog table with -H.
    Show {
        /// Only list jobs with this status (repeatable).
        #[arg(short = 's', long = "status", value_name = "STATUS")]
        status: Vec<JobStatus>,
        /// List the hog table instead of jobs.
        #[arg(short = 'H', long)]
        hogs: bool,
    },
    /// Delete all jobs that are no longer waiting or running.
    Cleanup,
    /// Run one worker shard inside a batch-backend slot (invoked by monitor).
    Hog {
        /// ID of the hog row to occupy.
        hogid: HogId,
        /// Number of simultaneous child processes.
        #[arg(short = 's', long, default_value_t = 24)]
        simultaneous: usize,
        /// Max wall time of the slot, in hours.
        #[arg(short = 't', long, default_value_t = 72.0)]
        time: f64,
        /// Minimum wall time remaining required to claim a job, in hours.
        #[arg(short = 'm', long, default_value_t = 12.0)]
        moratorium: f64,
    },
    /// Submit and supervise hog jobs on the batch backend.
    Monitor {
        /// Backend submission invocation prefixed to the hog command line.
        #[arg(short = 'c', long = "command-prefix", value_name = "PREFIX")]
        command_prefix: Option<String>,
        /// Number of hog jobs to keep in flight.
        #[arg(short = 'b', long, default_value_t = 1)]
        batches: usize,
        /// Number of simultaneous child processes per hog.
        #[arg(short = 's', long, default_value_t = 24)]
        simultaneous: usize,
        /// Max wall time of each hog's slot, in hours.
        #[arg(short = 't', long, default_value_t = 72.0)]
        time: f64,
        /// Minimum wall time remaining required to claim a job, in hours.
        #[arg(short = 'm', long, default_value_t = 12.0)]
        moratorium: f64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("hogq: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> hogq_common::Result<()> {
    let busy_timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Command::Init => commands::init(&cli.db, busy_timeout).await,
        Command::Submit {
            executable,
            stdout,
            stderr,
        } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            commands::submit(&store, &executable, stdout.as_deref(), stderr.as_deref()).await?;
            Ok(())
        }
        Command::Cancel { jobid } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            commands::cancel(&store, jobid).await
        }
        Command::Check { jobid } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            commands::check(&store, jobid).await
        }
        Command::Show { status, hogs } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            commands::show(&store, &status, hogs).await
        }
        Command::Cleanup => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            commands::cleanup(&store).await
        }
        Command::Hog {
            hogid,
            simultaneous,
            time,
            moratorium,
        } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            let config = HogConfig {
                hogid,
                simultaneous,
                slot: hours(time),
                moratorium: hours(moratorium),
                tick: HOG_TICK,
                exit_grace: HOG_EXIT_GRACE,
            };
            HogRunner::new(store, config).run().await
        }
        Command::Monitor {
            command_prefix,
            batches,
            simultaneous,
            time,
            moratorium,
        } => {
            let store = StoreClient::open(&cli.db, busy_timeout).await?;
            let config = MonitorConfig {
                batches,
                command_prefix,
                simultaneous,
                slot_hours: time,
                moratorium_hours: moratorium,
                db: cli.db,
                busy_timeout_secs: cli.timeout,
                tick: MONITOR_TICK,
            };
            Monitor::new(store, config).run().await;
            Ok(())
        }
    }
}

fn hours(value: f64) -> Duration {
    Duration::from_secs_f64(value * 3600.0)
}
