use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[cfg(feature = "dlib")]
const BACKEND_NOTE: &str = "Face extraction uses the dlib backend.";
#[cfg(not(feature = "dlib"))]
const BACKEND_NOTE: &str = "Built without a face backend: extract, enroll and mark exit with \
     code 4 (model unavailable). Rebuild with `--features dlib` to link dlib.";

#[derive(Debug, Parser)]
#[command(
    name = "rollcall",
    version,
    about = "Face-verified student attendance: enroll, mark time-in/time-out, review history",
    after_help = BACKEND_NOTE
)]
pub struct Cli {
    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract a face signature from a photo without storing anything
    Extract(ExtractArgs),
    /// Enroll (or re-enroll) a student's reference photo
    Enroll(EnrollArgs),
    /// Mark attendance for a student from a fresh photo
    Mark(MarkArgs),
    /// List recorded attendance sessions, newest first
    History(HistoryArgs),
}

/// Face model overrides shared by every command that runs extraction.
#[derive(Debug, Clone, Default, Args)]
pub struct ModelArgs {
    /// dlib 68-point landmark predictor (falls back to config, then $DLIB_LANDMARK_MODEL)
    #[arg(long, value_name = "PATH")]
    pub landmark_model: Option<PathBuf>,

    /// dlib ResNet face encoder (falls back to config, then $DLIB_ENCODER_MODEL)
    #[arg(long, value_name = "PATH")]
    pub encoder_model: Option<PathBuf>,

    /// Number of jitter passes when computing the embedding
    #[arg(long, value_name = "COUNT")]
    pub jitters: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// JPEG or PNG photo
    pub photo: PathBuf,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    #[arg(long)]
    pub student: String,

    /// JPEG or PNG reference photo
    pub photo: PathBuf,

    /// Directory holding signatures and sessions
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct MarkArgs {
    #[arg(long)]
    pub student: String,

    /// JPEG or PNG photo taken now
    pub photo: PathBuf,

    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Largest Euclidean distance accepted as a match
    #[arg(long, value_name = "DISTANCE")]
    pub threshold: Option<f64>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct HistoryArgs {
    /// Limit the listing to one student
    #[arg(long)]
    pub student: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}
