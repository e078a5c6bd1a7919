use crate::cli::{ArchiveArgs, Cli, Command, FindArgs};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use sgarchive_archive::{ArchiveEvent, ArchiveSummary, Archiver, RunStatus, TypeSummary, schema};
use sgarchive_config::Config;
use sgarchive_model::Entity;
use sgarchive_remote::{HttpService, RemoteHandle, RemoteService};
use sgarchive_replay::{FindOptions, LoadStatus, Snapshot};
use sgarchive_storage::BackendHandle;
use sgarchive_storage::backend::LocalBackend;
use serde_json::Value as Json;
use std::fmt::Write as _;
use std::io::Write;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(cli: Cli, cancel: CancellationToken, out: &mut impl Write) -> Result<RunStatus> {
    let mut config = load_config(&cli)?;
    if let Command::Archive(args) = &cli.command {
        args.apply(&mut config.archive);
    }
    let config = Arc::new(config);
    match cli.command {
        Command::List => list(&config, out).await,
        Command::Archived => archived(config, out).await,
        Command::Archive(args) => archive(config, &args, cancel, out).await,
        Command::Find(args) => find(config, &args, out).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&path).or_raise(|| ErrorKind::Config)?;
    if let Some(output) = &cli.output {
        config.archive.output = output.clone();
    }
    Ok(config)
}

fn storage(config: &Config) -> Result<BackendHandle> {
    let output = &config.archive.output;
    let root = std::path::absolute(output).or_raise(|| ErrorKind::ArchiveRoot(output.clone()))?;
    let backend = LocalBackend::new("archive", &root).or_raise(|| ErrorKind::ArchiveRoot(root.clone()))?;
    Ok(Arc::new(backend))
}

fn remote(config: &Config) -> Result<RemoteHandle> {
    let service = HttpService::new(&config.connection).or_raise(|| ErrorKind::Remote)?;
    Ok(Arc::new(service))
}

async fn list(config: &Config, out: &mut impl Write) -> Result<RunStatus> {
    let entities = remote(config)?.schema_entity_read().await.or_raise(|| ErrorKind::Remote)?;
    for (entity_type, info) in entities {
        if !info.visible || config.ignored.is_entity_type_ignored(&entity_type) {
            continue;
        }
        writeln!(out, "{entity_type}\t{}", info.display_name).or_raise(|| ErrorKind::Output)?;
    }
    Ok(RunStatus::Completed)
}

async fn archived(config: Arc<Config>, out: &mut impl Write) -> Result<RunStatus> {
    let mut snapshot = Snapshot::open(storage(&config)?, config).await.or_raise(|| ErrorKind::Replay)?;
    let statuses = snapshot.load_entity_types().await.or_raise(|| ErrorKind::Replay)?;
    for (entity_type, status) in statuses {
        let written = match status {
            LoadStatus::Loaded(records) => writeln!(out, "{entity_type}\t{records}"),
            LoadStatus::Corrupt => writeln!(out, "{entity_type}\tcorrupt"),
            LoadStatus::NotArchived => continue,
        };
        written.or_raise(|| ErrorKind::Output)?;
    }
    Ok(RunStatus::Completed)
}

async fn archive(
    config: Arc<Config>,
    args: &ArchiveArgs,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> Result<RunStatus> {
    let storage = storage(&config)?;
    let remote = remote(&config)?;
    let archiver = Archiver::new(remote.clone(), storage.clone(), config.clone()).with_cancellation(cancel);
    if args.clean {
        archiver.clean().await.or_raise(|| ErrorKind::Archive)?;
    }

    let refresh = match args.schema_refresh() {
        Some(refresh) => refresh,
        None => !schema::exists(storage.as_ref()).await.or_raise(|| ErrorKind::Archive)?,
    };
    let schema = if refresh {
        schema::refresh(remote.as_ref(), storage.as_ref(), &config.ignored).await
    } else {
        schema::load(storage.as_ref()).await
    }
    .or_raise(|| ErrorKind::Archive)?;

    let entity_types =
        archiver.resolve_entity_types(&schema, &args.entity_types).await.or_raise(|| ErrorKind::Archive)?;
    let limit = usize::try_from(args.limit).unwrap_or(usize::MAX);
    let mut summary = ArchiveSummary::default();
    let mut events = pin!(archiver.archive_stream(&schema, &entity_types, limit, args.max_pages));
    while let Some(event) = events.next().await {
        if let ArchiveEvent::TypeFinished(finished) = &event {
            writeln!(out, "{}", type_line(finished)).or_raise(|| ErrorKind::Output)?;
        }
        summary.record(&event);
    }
    write_totals(&summary, out).or_raise(|| ErrorKind::Output)?;
    Ok(summary.status())
}

fn type_line(summary: &TypeSummary) -> String {
    let attachments = &summary.attachments;
    let mut line = format!(
        "{}\t{:?}\tpages={} records={} rejected={} downloaded={} skipped_exists={} skipped_excluded={} \
         skipped_disabled={} failed={}",
        summary.entity_type,
        summary.outcome,
        summary.pages,
        summary.records,
        summary.rejected,
        attachments.downloaded,
        attachments.skipped_exists,
        attachments.skipped_excluded,
        attachments.skipped_disabled,
        attachments.failed,
    );
    if let Some(error) = &summary.error {
        let _ = write!(line, "\terror={error}");
    }
    line
}

fn write_totals(summary: &ArchiveSummary, out: &mut impl Write) -> std::io::Result<()> {
    let attachments = summary.attachments();
    let failed_types = summary.types.iter().filter(|t| t.error.is_some()).count();
    writeln!(
        out,
        "{:?}: {} entity types ({failed_types} failed), {} records, {} attachments downloaded, {} failed",
        summary.status(),
        summary.types.len(),
        summary.records(),
        attachments.downloaded,
        attachments.failed,
    )
}

async fn find(config: Arc<Config>, args: &FindArgs, out: &mut impl Write) -> Result<RunStatus> {
    let mut snapshot = Snapshot::open(storage(&config)?, config).await.or_raise(|| ErrorKind::Replay)?;
    if !snapshot.loaded_entity_types().any(|t| t == args.entity_type) {
        snapshot.load_entity_type(&args.entity_type).await.or_raise(|| ErrorKind::Replay)?;
    }
    let options = FindOptions { limit: args.limit };
    let found = snapshot
        .find(&args.entity_type, &args.filters, args.fields.as_deref(), &args.order, options)
        .or_raise(|| ErrorKind::Replay)?;
    let results = Json::Array(found.iter().map(Entity::to_json).collect());
    serde_json::to_writer_pretty(&mut *out, &results).or_raise(|| ErrorKind::Output)?;
    writeln!(out).or_raise(|| ErrorKind::Output)?;
    Ok(RunStatus::Completed)
}
