//! conceptcheck CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "conceptcheck",
    version,
    about = "Score a free-text explanation of a concept against reference material"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an explanation of a topic
    Analyze {
        /// Topic being explained (e.g. "Binary Search Tree")
        #[arg(long)]
        topic: String,

        /// Subject hint used to narrow the reference search
        #[arg(long)]
        subject: Option<String>,

        /// Explanation text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Read the explanation from a file ("-" for stdin)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the knowledge base only, no network
        #[arg(long)]
        offline: bool,
    },

    /// Show the reference overview of a topic
    Overview {
        /// Topic to look up
        #[arg(long)]
        topic: String,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the knowledge base only, no network
        #[arg(long)]
        offline: bool,
    },

    /// Run labelled examples and report classification accuracy
    Evaluate {
        /// Path to a .toml example set or directory
        #[arg(long)]
        examples: PathBuf,

        /// Max concurrent analyses (defaults to the configured value)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Output directory (defaults to the configured value)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the knowledge base only, no network
        #[arg(long)]
        offline: bool,
    },

    /// Compare two evaluation reports
    Compare {
        /// Baseline report JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Current report JSON
        #[arg(long)]
        current: PathBuf,

        /// Regression threshold
        #[arg(long, default_value = "0.05")]
        threshold: f64,

        /// Exit code 1 if regressions found
        #[arg(long)]
        fail_on_regression: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate a knowledge file and/or labelled example sets
    Validate {
        /// Extra knowledge file to merge with the built-in concepts
        #[arg(long)]
        knowledge: Option<PathBuf>,

        /// Example set file or directory
        #[arg(long)]
        examples: Option<PathBuf>,
    },

    /// Create starter config and example set
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conceptcheck=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            topic,
            subject,
            text,
            file,
            format,
            config,
            offline,
        } => commands::analyze::execute(topic, subject, text, file, format, config, offline).await,
        Commands::Overview {
            topic,
            format,
            config,
            offline,
        } => commands::overview::execute(topic, format, config, offline).await,
        Commands::Evaluate {
            examples,
            parallelism,
            output,
            config,
            offline,
        } => commands::evaluate::execute(examples, parallelism, output, config, offline).await,
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_regression,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_regression, format),
        Commands::Validate {
            knowledge,
            examples,
        } => commands::validate::execute(knowledge, examples),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
