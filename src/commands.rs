use crate::cli::InputFormat;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ketl_config::Settings;
use ketl_etl::extract::{self, DefaultExtractor, Extract, Extraction};
use ketl_etl::load::{DatabaseLoader, DelimitedFileLoader, HashLoader, ParquetLoader};
use ketl_etl::setup::register;
use ketl_etl::transform::{DelimitedOptions, DelimitedTransformer, JsonOptions, JsonTransformer};
use ketl_etl::{LoaderId, Pipeline};
use ketl_store::{Database, Repository};
use ketl_transport::{HttpOptions, TransportHandle, Transports};
use std::path::Path;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing::info;

/// Everything a command needs.
pub struct Context {
    pub settings: Settings,
    pub db: Database,
    pub repo: Repository,
}

pub async fn migrate(ctx: &Context) -> Result<()> {
    ctx.db.migrate().await.or_raise(|| ErrorKind::Store)?;
    info!("database schema is up to date");
    Ok(())
}

/// Register every API of the configuration.
pub async fn setup(ctx: &Context) -> Result<()> {
    for definition in &ctx.settings.apis {
        let api = register(&ctx.repo, definition).await.or_raise(|| ErrorKind::Setup(definition.name.clone()))?;
        println!("{}", api.name);
    }
    Ok(())
}

pub async fn extract(ctx: &Context, api: &str, force: bool) -> Result<()> {
    let extractor = extractor(ctx, api).await?.with_force(force);
    let extraction = extractor.extract().await.or_raise(|| ErrorKind::Pipeline)?;
    for file in &extraction.files {
        println!("{}", file.path.display());
    }
    complete(&[extraction])
}

pub async fn status(ctx: &Context, api: &str) -> Result<()> {
    known(ctx, api).await?;
    let statuses = extract::status(&ctx.repo, api, ctx.settings.default_max_age()).await.or_raise(|| ErrorKind::Pipeline)?;
    for file in statuses {
        let fetched = match &file.file.fingerprint {
            Some(fingerprint) => {
                let at = fingerprint.fetched_at.format(&Rfc3339).unwrap_or_else(|_| fingerprint.fetched_at.to_string());
                format!("{} bytes, fetched {at}", fingerprint.size)
            },
            None => "never fetched".to_string(),
        };
        let next = match &file.pending {
            Some(decision) => decision.to_string(),
            None => "check remote size".to_string(),
        };
        let local = if file.local_present { "present" } else { "missing" };
        println!("{}\n  local:   {} ({local})\n  remote:  {fetched}\n  next:    {next}", file.url, file.local.display());
    }
    Ok(())
}

pub async fn run(
    ctx: &Context,
    api: &str,
    output: Option<&Path>,
    table: Option<&str>,
    format: InputFormat,
    force: bool,
) -> Result<()> {
    let mut pipeline = Pipeline::new();
    let e = pipeline.add_extractor(extractor(ctx, api).await?.with_force(force));
    let t = match format {
        InputFormat::Csv => pipeline.add_transformer(DelimitedTransformer::default()),
        InputFormat::Tsv => pipeline.add_transformer(DelimitedTransformer::new(DelimitedOptions::tsv())),
        InputFormat::Json => pipeline.add_transformer(JsonTransformer::new(JsonOptions::default())),
    };
    let l = match (output, table) {
        (Some(path), _) => add_file_loader(&mut pipeline, path)?,
        (None, Some(table)) => {
            let loader = DatabaseLoader::new(ctx.db.pool().clone(), table).or_raise(|| ErrorKind::Pipeline)?;
            pipeline.add_loader(loader)
        },
        (None, None) => exn::bail!(ErrorKind::Pipeline),
    };
    pipeline.connect(e, t).connect(t, l);

    let report = pipeline.execute().await.or_raise(|| ErrorKind::Pipeline)?;
    for transform in &report.transforms {
        println!("{}: {} rows in {} batches", transform.transformer, transform.rows, transform.batches);
    }
    complete(&report.extractions)
}

fn add_file_loader(pipeline: &mut Pipeline, path: &Path) -> Result<LoaderId> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
    match extension.as_deref() {
        Some("blake3") => return Ok(pipeline.add_loader(HashLoader::new(path))),
        Some("parquet") => return Ok(pipeline.add_loader(ParquetLoader::new(path))),
        _ => {},
    }
    let loader = DelimitedFileLoader::new(path).or_raise(|| ErrorKind::Pipeline)?;
    Ok(pipeline.add_loader(loader))
}

/// Register `api` first if the configuration declares it.
async fn known(ctx: &Context, api: &str) -> Result<()> {
    if let Some(definition) = ctx.settings.api(api) {
        register(&ctx.repo, definition).await.or_raise(|| ErrorKind::Setup(api.to_string()))?;
    }
    Ok(())
}

async fn extractor(ctx: &Context, api: &str) -> Result<DefaultExtractor> {
    known(ctx, api).await?;
    let (settings, repo) = (&ctx.settings, &ctx.repo);
    let record = repo.api_by_name(api).await.or_raise(|| ErrorKind::Store)?;
    let options = HttpOptions { timeout: settings.http.timeout(), user_agent: settings.http.user_agent.clone() };
    let credentials = record.as_ref().and_then(|api| api.credentials.as_ref());
    let transports = Transports::standard(&options, credentials).or_raise(|| ErrorKind::Transport)?;
    let transport: TransportHandle = Arc::new(transports);
    Ok(DefaultExtractor::new(repo.clone(), transport, api).with_default_max_age(settings.default_max_age()))
}

/// Report per-file failures, after the whole pass.
fn complete(extractions: &[Extraction]) -> Result<()> {
    let failures = extractions.iter().flat_map(|e| &e.failures).collect::<Vec<_>>();
    for failure in &failures {
        eprintln!("failed: {}: {:?}", failure.url, failure.error);
    }
    match failures.len() {
        0 => Ok(()),
        count => exn::bail!(ErrorKind::Incomplete(count)),
    }
}
