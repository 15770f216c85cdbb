mod cli;
mod commands;
mod error;
mod logging;

use crate::cli::{Cli, Command};
use crate::commands::Context;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use ketl_config::Settings;
use ketl_store::{Database, Repository};
use tracing::debug;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    // Exn's debug output carries the whole error tree with locations.
    execute(cli).await.map_err(|err| miette::miette!("{err:?}"))
}

async fn execute(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    logging::init(&settings.log)?;
    debug!(database = %settings.database.display(), apis = settings.apis.len(), "settings loaded");

    let db = Database::connect(&settings.database).await.or_raise(|| ErrorKind::Store)?;
    let repo = Repository::from(&db);
    let ctx = Context { settings, db, repo };
    let result = match cli.command {
        Command::Migrate => commands::migrate(&ctx).await,
        Command::Setup => commands::setup(&ctx).await,
        Command::Extract { api, force } => commands::extract(&ctx, &api, force).await,
        Command::Status { api } => commands::status(&ctx, &api).await,
        Command::Run { api, output, table, format, force } => {
            commands::run(&ctx, &api, output.as_deref(), table.as_deref(), format, force).await
        },
    };
    ctx.db.close().await;
    result
}
