mod app;

use clap::Parser;
use color_eyre::Result;
use app::{App, AppOptions};

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let options = AppOptions::parse();
    App::new(options).run()?;

    Ok(())
}
