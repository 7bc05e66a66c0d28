use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "intent-flow",
    about = "Trigger–evaluation–execution pipeline for automated on-chain strategies",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Executor: internal HTTP endpoint plus the transaction-queue worker.
    Api,
    /// Price ingestor: poll the configured feeds into the store.
    Ingest,
    /// Scheduler: enqueue evaluation jobs for active strategies.
    Schedule,
    /// Evaluator: consume the strategy queue.
    Evaluate {
        /// Concurrent evaluator workers.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Every component in one process over an in-memory broker. For local
    /// development; production runs one role per process.
    Run,
    /// Print the strategy definition JSON Schema.
    Schema,
}
