use clap::Parser;

use romman::cancel::CancelToken;
use romman::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    cli::run(cli, cancel)
}
