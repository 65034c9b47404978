//! The xun command line.
//!
//! Subcommands:
//! - `xun exec <module> '<call>'` runs a call with the module's context;
//!   prints nothing on success.
//! - `xun graph <module> '<call>'` renders the call DAG in dot format.
//! - `xun mount <store-spec> <query> <mountpoint>` materializes a
//!   tag-query hierarchy as a read-only directory tree.
//!
//! Exit codes: 0 on success, 1 on user-visible failures, 2 on usage
//! errors (clap's default).

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

/// Content-addressed workflow engine.
#[derive(Parser)]
#[command(name = "xun", about = "Content-addressed workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a call expression against the module's context.
    Exec {
        /// Path to the workflow module.
        module: PathBuf,

        /// Call expression, e.g. "fibonacci_sequence(10)".
        call: String,

        /// Base URL of a coordination server for multi-process runs.
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Render the call graph of a call expression in dot format.
    Graph {
        /// Path to the workflow module.
        module: PathBuf,

        /// Call expression, e.g. "fibonacci_sequence(10)".
        call: String,
    },

    /// Materialize a tag-query view of a store under a directory.
    Mount {
        /// Store spec, e.g. "xun.Disk('/data/store')".
        store: String,

        /// Tag query, e.g. "(function_name='fib') => function_hash { ... }".
        query: String,

        /// Directory the view is written to.
        mountpoint: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Exec {
            module,
            call,
            coordinator,
        } => commands::exec(&module, &call, coordinator.as_deref()),
        Commands::Graph { module, call } => commands::graph(&module, &call),
        Commands::Mount {
            store,
            query,
            mountpoint,
        } => commands::mount(&store, &query, &mountpoint),
    };

    match outcome {
        Ok(()) => {}
        Err(error) => {
            eprintln!("error: {}", error);
            process::exit(1);
        }
    }
}
