use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod enroll;
mod extract;
mod history;
mod mark;

pub use enroll::EnrollHandler;
pub use extract::ExtractHandler;
pub use history::HistoryHandler;
pub use mark::MarkHandler;

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Extract(args) => Box::new(ExtractHandler::new(args)),
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Mark(args) => Box::new(MarkHandler::new(args)),
            Commands::History(args) => Box::new(HistoryHandler::new(args)),
        }
    }
}
