use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage versioned tabular datasets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a new dataset's first version from a data CSV and metadata extract
    Import(ImportArgs),
    /// Start the next version of a dataset: import, build mappings, auto-map
    Next(NextArgs),
    /// Finish a reviewed next version: compute changes and complete it
    Complete(CompleteArgs),
    /// Record a manual mapping decision for one source option
    Map(MapArgs),
    /// Publish a dataset's draft version, superseding the live one
    Publish(PublishArgs),
    /// Show datasets, their versions, and import run progress
    Status(StatusArgs),
    /// Render the change records computed for a version
    Changes(ChangesArgs),
    /// Re-trigger the pipeline for a failed version with a fresh run
    Retry(RetryArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Title of the new dataset
    #[arg(short, long)]
    pub title: String,
    /// Source data CSV file
    #[arg(short, long)]
    pub data: PathBuf,
    /// Metadata extract (JSON) produced by the ingestion step
    #[arg(short, long)]
    pub meta: PathBuf,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct NextArgs {
    /// Title of the dataset to version
    #[arg(short, long)]
    pub title: String,
    /// Source data CSV file for the new version
    #[arg(short, long)]
    pub data: PathBuf,
    /// Metadata extract (JSON) for the new version
    #[arg(short, long)]
    pub meta: PathBuf,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    /// Title of the dataset whose draft is awaiting completion
    #[arg(short, long)]
    pub title: String,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DimensionArg {
    Location,
    Filter,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    /// Title of the dataset whose draft is under review
    #[arg(short, long)]
    pub title: String,
    /// Which dimension the decision applies to
    #[arg(long, value_enum)]
    pub dimension: DimensionArg,
    /// Group key: the location level code or filter column
    #[arg(long)]
    pub group: String,
    /// Structural key of the source option being decided
    #[arg(long = "source-key")]
    pub source_key: String,
    /// Structural key of the chosen candidate; omit to record "maps to nothing"
    #[arg(long = "candidate-key")]
    pub candidate_key: Option<String>,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Title of the dataset whose draft should go live
    #[arg(short, long)]
    pub title: String,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Restrict the report to one dataset title
    #[arg(short, long)]
    pub title: Option<String>,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct ChangesArgs {
    /// Title of the dataset
    #[arg(short, long)]
    pub title: String,
    /// Version number to report on (defaults to the latest draft)
    #[arg(short, long)]
    pub version: Option<String>,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct RetryArgs {
    /// Title of the dataset with a failed version
    #[arg(short, long)]
    pub title: String,
    /// Store root directory
    #[arg(long, default_value = ".dataset-store")]
    pub store: PathBuf,
}
