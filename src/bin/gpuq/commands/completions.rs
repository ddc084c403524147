use crate::cli::{CompletionsArgs, Gpuq};
use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use std::io;

pub(crate) fn handle_completions(completions_args: CompletionsArgs) -> Result<()> {
    let mut cmd = Gpuq::command();
    generate(completions_args.shell, &mut cmd, "gpuq", &mut io::stdout());
    Ok(())
}
