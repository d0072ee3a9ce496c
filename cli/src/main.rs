mod commands;
mod config;
mod location;
mod logging;
mod remote;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::debug;

use crate::commands::{
    cmd_history_routes, cmd_history_workouts, cmd_lift_cancel, cmd_lift_resume, cmd_lift_start,
    cmd_lift_status, cmd_sync, cmd_track, cmd_workout_add, cmd_workout_assign, cmd_workout_delete,
    cmd_workout_list, cmd_workout_show, cmd_workout_unassign,
};
use crate::config::{Config, RemoteSettings};
use crate::remote::{Disconnected, HttpRemoteStore};
use pacer_core::db::Database;
use pacer_core::models::Accuracy;
use pacer_core::remote::{RemoteStore, StaticIdentity};
use pacer_core::service::Tracker;

#[derive(Parser)]
#[command(
    name = "pacer",
    version,
    about = "A local-first workout and route tracker",
    long_about = "\n\n  ┌─┐┌─┐┌─┐┌─┐┬─┐
  ├─┘├─┤│  ├┤ ├┬┘
  ┴  ┴ ┴└─┘└─┘┴└─
  log the lifts, track the miles.
"
)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Less log output (-q warnings only, -qq errors only)
    #[arg(short = 'q', long, action = ArgAction::Count, global = true)]
    quiet: u8,
    /// Base URL of the remote document store (a `pacer serve` instance)
    #[arg(long, env = "PACER_REMOTE_URL", global = true)]
    remote_url: Option<String>,
    /// API key for the remote document store
    #[arg(long, env = "PACER_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
    /// User id the remote data belongs to
    #[arg(long = "user", env = "PACER_USER_ID", global = true)]
    user_id: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workout definitions
    Workout {
        #[command(subcommand)]
        command: WorkoutCommands,
    },
    /// Replay a recorded GPS trace (CSV) as a live route session
    Track {
        /// CSV with latitude,longitude[,altitude][,timestamp] columns
        file: PathBuf,
        /// Milliseconds between location fixes
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
        /// Requested location accuracy
        #[arg(long, value_enum, default_value_t = AccuracyArg::High)]
        accuracy: AccuracyArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a strength workout
    Lift {
        #[command(subcommand)]
        command: LiftCommands,
    },
    /// Upload route points that have not reached the remote store yet
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show finished routes and workouts
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Host the remote document store over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// Address to bind to (use 0.0.0.0 to expose on the network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum WorkoutCommands {
    /// Create a workout
    Add {
        /// Workout name
        name: String,
        /// Exercise as NAME:SERIESxREPS[@WEIGHT] (repeatable), e.g. "Squat:5x5@100"
        #[arg(short, long = "exercise")]
        exercises: Vec<String>,
        /// Short description
        #[arg(short, long)]
        description: Option<String>,
        /// Difficulty level (e.g. beginner)
        #[arg(short, long)]
        level: Option<String>,
        /// Planned duration in minutes
        #[arg(short, long, default_value_t = 60)]
        minutes: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List workouts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a workout and its exercises
    Show {
        /// Workout name or ID
        workout: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add exercises to a workout
    Assign {
        /// Workout name or ID
        workout: String,
        /// Exercise as NAME:SERIESxREPS[@WEIGHT] (repeatable)
        #[arg(required = true)]
        exercises: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one exercise from a workout
    Unassign {
        /// Workout name or ID
        workout: String,
        /// Exercise name or ID
        exercise: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a workout and its exercises
    Delete {
        /// Workout name or ID
        workout: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum LiftCommands {
    /// Start a workout and open the live screen
    Start {
        /// Workout name or ID
        workout: String,
        /// Output the final summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reopen the workout that was minimized or interrupted
    Resume {
        /// Output the final summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the workout in progress without opening it
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard the workout in progress
    Cancel {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Finished route sessions, newest first
    Routes {
        /// Show at most this many
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Finished strength workouts, newest first
    Workouts {
        /// Show at most this many
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AccuracyArg {
    High,
    Balanced,
    Low,
}

impl From<AccuracyArg> for Accuracy {
    fn from(arg: AccuracyArg) -> Self {
        match arg {
            AccuracyArg::High => Accuracy::High,
            AccuracyArg::Balanced => Accuracy::Balanced,
            AccuracyArg::Low => Accuracy::Low,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn connect(settings: &RemoteSettings) -> Result<(Arc<dyn RemoteStore>, StaticIdentity)> {
    if !settings.is_configured() {
        debug!("No remote configured, running local-only");
        return Ok((Arc::new(Disconnected), StaticIdentity(None)));
    }
    let url = settings.url.as_deref().unwrap_or_default();
    let remote = HttpRemoteStore::new(url, settings.api_key.clone())?;
    debug!(url, "Using remote document store");
    Ok((Arc::new(remote), StaticIdentity(settings.user_id.clone())))
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let settings = RemoteSettings {
        url: cli.remote_url,
        api_key: cli.api_key,
        user_id: cli.user_id,
    };
    let (remote, identity) = connect(&settings)?;
    let tracker = Tracker::open(&config.db_path, remote, Arc::new(identity))?;

    match cli.command {
        Commands::Workout { command } => match command {
            WorkoutCommands::Add {
                name,
                exercises,
                description,
                level,
                minutes,
                json,
            } => {
                cmd_workout_add(
                    &tracker,
                    &name,
                    description,
                    level,
                    minutes,
                    &exercises,
                    json,
                )
                .await
            }
            WorkoutCommands::List { json } => cmd_workout_list(&tracker, json).await,
            WorkoutCommands::Show { workout, json } => {
                cmd_workout_show(&tracker, &workout, json).await
            }
            WorkoutCommands::Assign {
                workout,
                exercises,
                json,
            } => cmd_workout_assign(&tracker, &workout, &exercises, json).await,
            WorkoutCommands::Unassign {
                workout,
                exercise,
                json,
            } => cmd_workout_unassign(&tracker, &workout, &exercise, json).await,
            WorkoutCommands::Delete { workout, json } => {
                cmd_workout_delete(&tracker, &workout, json).await
            }
        },
        Commands::Track {
            file,
            interval_ms,
            accuracy,
            json,
        } => cmd_track(&tracker, &file, interval_ms, accuracy.into(), json).await,
        Commands::Lift { command } => match command {
            LiftCommands::Start { workout, json } => {
                cmd_lift_start(&tracker, &workout, json).await
            }
            LiftCommands::Resume { json } => cmd_lift_resume(&tracker, json).await,
            LiftCommands::Status { json } => cmd_lift_status(&tracker, json).await,
            LiftCommands::Cancel { json } => cmd_lift_cancel(&tracker, json),
        },
        Commands::Sync { json } => cmd_sync(&tracker, json).await,
        Commands::History { command } => match command {
            HistoryCommands::Routes { limit, json } => {
                cmd_history_routes(&tracker, limit, json).await
            }
            HistoryCommands::Workouts { limit, json } => {
                cmd_history_workouts(&tracker, limit, json).await
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let db = Database::open(&config.remote_db_path)?;
            server::start_server(db, port, &bind, api_key).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_track_args() {
        let cli = Cli::try_parse_from([
            "pacer",
            "-vv",
            "track",
            "run.csv",
            "--interval-ms",
            "200",
            "--accuracy",
            "balanced",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Track {
            interval_ms,
            accuracy,
            ..
        } = cli.command
        else {
            panic!("expected track");
        };
        assert_eq!(interval_ms, 200);
        assert_eq!(Accuracy::from(accuracy), Accuracy::Balanced);
    }

    #[test]
    fn test_connect_without_remote_is_local_only() {
        let (_, identity) = connect(&RemoteSettings::default()).unwrap();
        assert!(identity.0.is_none());
    }
}
