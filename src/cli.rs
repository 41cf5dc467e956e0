use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "waypoint", about = "Polite, fault-tolerant crawler core")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start (or resume) crawling from seed URLs
    Crawl {
        /// Path to a seed file, one URL per line (`#` lines are comments)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL, can be repeated
        #[arg(long)]
        seed: Vec<String>,

        /// Maximum crawl depth, overrides the config file
        #[arg(short, long)]
        depth: Option<u32>,

        /// Resume from the existing frontier instead of purging it first
        #[arg(long)]
        resume: bool,
    },
    /// Print frontier and domain counters, then exit
    Status,
}
