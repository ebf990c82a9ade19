use std::any::Any;
use std::process::ExitCode;

use crate::cli::{HistoryArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_history;
use crate::workflow::{self, HistoryOutcome};

pub struct HistoryHandler {
    args: HistoryArgs,
    run: Box<dyn Fn(&HistoryArgs) -> AppResult<HistoryOutcome> + Send + Sync>,
    render: Box<dyn Fn(&HistoryOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl HistoryHandler {
    pub fn new(args: HistoryArgs) -> Self {
        Self::with_dependencies(args, workflow::run_history, render_history)
    }

    pub fn with_dependencies(
        args: HistoryArgs,
        run: impl Fn(&HistoryArgs) -> AppResult<HistoryOutcome> + Send + Sync + 'static,
        render: impl Fn(&HistoryOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for HistoryHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
