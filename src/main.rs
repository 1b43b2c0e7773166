use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "evotrace")]
#[command(about = "Evotrace - candidate evolution history from optimization run event streams")]
#[command(version)]
struct Cli {
    /// Data directory holding config and stored records (default: .evotrace in current dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output as JSON for machine consumption
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a JSONL event stream into iteration snapshots
    Ingest {
        /// Event stream file ("-" or omitted reads stdin)
        file: Option<PathBuf>,

        /// Save the reconciled state to the record store
        #[arg(long)]
        save: bool,
    },

    /// Trace a candidate's evolution chain
    Lineage {
        /// Candidate id or SMILES
        candidate: String,

        /// Record to load (default: latest)
        #[arg(long)]
        record: Option<String>,
    },

    /// Per-candidate score trends across iterations
    Trends {
        /// Record to load (default: latest)
        #[arg(long)]
        record: Option<String>,
    },

    /// Scatter points for cross-iteration comparison
    Pareto {
        /// Record to load (default: latest)
        #[arg(long)]
        record: Option<String>,
    },

    /// Manage stored records
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
}

#[derive(Subcommand)]
enum RecordsCommand {
    /// List stored records
    List,
    /// Print a record's iteration snapshots
    Show {
        /// Record id (e.g., "rec-001")
        record: String,
    },
    /// Delete a stored record
    Delete {
        /// Record id (e.g., "rec-001")
        record: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli
        .dir
        .unwrap_or_else(|| PathBuf::from(".evotrace"));

    match cli.command {
        Commands::Ingest { file, save } => {
            commands::ingest::run(&dir, file.as_deref(), save, cli.json)
        }
        Commands::Lineage { candidate, record } => {
            commands::lineage_cmd::run(&dir, &candidate, record.as_deref(), cli.json)
        }
        Commands::Trends { record } => {
            commands::analytics_cmd::run_trends(&dir, record.as_deref(), cli.json)
        }
        Commands::Pareto { record } => {
            commands::analytics_cmd::run_pareto(&dir, record.as_deref(), cli.json)
        }
        Commands::Records { command } => match command {
            RecordsCommand::List => commands::records::run_list(&dir, cli.json),
            RecordsCommand::Show { record } => commands::records::run_show(&dir, &record, cli.json),
            RecordsCommand::Delete { record } => commands::records::run_delete(&dir, &record),
        },
    }
}
