use std::any::Any;
use std::process::ExitCode;

use tracing::debug;

use crate::cli::{MarkArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::{AppResult, REJECTED_EXIT_CODE};
use crate::output::render_mark;
use crate::workflow::{self, MarkOutcome};

pub struct MarkHandler {
    args: MarkArgs,
    run: Box<dyn Fn(&MarkArgs) -> AppResult<MarkOutcome> + Send + Sync>,
    render: Box<dyn Fn(&MarkOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl MarkHandler {
    pub fn new(args: MarkArgs) -> Self {
        Self::with_dependencies(args, workflow::run_mark, render_mark)
    }

    pub fn with_dependencies(
        args: MarkArgs,
        run: impl Fn(&MarkArgs) -> AppResult<MarkOutcome> + Send + Sync + 'static,
        render: impl Fn(&MarkOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for MarkHandler {
    /// Rejected photos are rendered like any other outcome but exit non-zero.
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        if outcome.outcome.is_accepted() {
            Ok(ExitCode::SUCCESS)
        } else {
            debug!(student = %outcome.student, "attendance not accepted");
            Ok(ExitCode::from(REJECTED_EXIT_CODE))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
