#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use srtp_keydb::{
    SharedDatabase,
    config::{Cli, Config},
    trace::{Player, Trace},
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    let trace = Trace::load(&cli.trace)?;
    if trace.events.is_empty() {
        log::warn!("trace has no events: path={}", cli.trace);
    }

    let db = SharedDatabase::new(config.database)?;
    let summary = Player::new(db, &trace)?.run(&trace.events)?;

    log::info!("trace finished: path={}", cli.trace);
    println!("{summary}");

    Ok(())
}
