//! Command-line surface.

use clap::{ArgAction, Args, Parser, Subcommand};
use sgarchive_config::{ArchiveOptions, DownloadMode};
use sgarchive_model::{Filter, Order};
use sgarchive_remote::MAX_PAGE_SIZE;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;

/// Archive a production-tracking database to disk and query the snapshot
/// offline.
#[derive(Debug, Parser)]
#[command(name = "sgarchive", version, about, long_about = None)]
pub struct Cli {
    /// Main configuration document (default: ./config.yml, then the platform
    /// config directory).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Archive root, overriding `archive.output`.
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
    /// More logging (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the entity types available on the remote service
    List,
    /// List the entity types archived so far, with record counts
    Archived,
    /// Archive entity types into the archive root
    Archive(ArchiveArgs),
    /// Query the archive offline and print the results as JSON
    Find(FindArgs),
}

#[derive(Debug, Args)]
pub struct ArchiveArgs {
    /// Entity type to archive; `all` for every type, `missing` for every type
    /// not archived yet. Repeatable. Defaults to `all`.
    #[arg(short = 't', long = "entity-type", value_name = "TYPE")]
    pub entity_types: Vec<String>,
    /// Records per page (at most 500).
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..=MAX_PAGE_SIZE as u64))]
    pub limit: u64,
    /// Stop each entity type after this many pages.
    #[arg(long, value_name = "N")]
    pub max_pages: Option<usize>,
    /// Refresh the cached schema before archiving (default: only when none
    /// is cached).
    #[arg(long, overrides_with = "no_schema")]
    pub schema: bool,
    /// Never refresh the cached schema.
    #[arg(long, overrides_with = "schema")]
    pub no_schema: bool,
    /// Empty the archive root first.
    #[arg(long)]
    pub clean: bool,
    /// Which attachments to download: `missing`, `all` or `none` (default:
    /// `archive.download`).
    #[arg(long, value_name = "MODE", value_parser = parse::<DownloadMode, _>, conflicts_with = "no_download")]
    pub download: Option<DownloadMode>,
    /// Archive records without downloading attachments (`--download none`).
    #[arg(long)]
    pub no_download: bool,
    /// Read every record store back after writing it and compare.
    #[arg(long)]
    pub strict: bool,
}
impl ArchiveArgs {
    /// Override the configured archive options with the flags given.
    pub fn apply(&self, options: &mut ArchiveOptions) {
        if self.no_download {
            options.download = DownloadMode::None;
        } else if let Some(download) = self.download {
            options.download = download;
        }
        if self.strict {
            options.strict = true;
        }
    }

    /// `Some(true)` to force a refresh, `Some(false)` to forbid one, `None`
    /// to refresh only when nothing is cached.
    pub fn schema_refresh(&self) -> Option<bool> {
        match (self.schema, self.no_schema) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
pub struct FindArgs {
    /// Entity type to query.
    #[arg(value_name = "TYPE")]
    pub entity_type: String,
    /// Filter as `field,operator,value`. Repeatable; all filters must match.
    #[arg(short, long = "filter", value_name = "FILTER", value_parser = parse::<Filter, _>)]
    pub filters: Vec<Filter>,
    /// Fields to return, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub fields: Option<Vec<String>>,
    /// Sort key as `field` or `field:desc`. Repeatable.
    #[arg(long, value_name = "ORDER", value_parser = parse::<Order, _>)]
    pub order: Vec<Order>,
    #[arg(long)]
    pub limit: Option<usize>,
}

/// `FromStr` adapter for clap: parse errors are reported by their message.
fn parse<T, E>(s: &str) -> Result<T, String>
where
    T: FromStr<Err = exn::Exn<E>>,
    E: Error + Send + Sync + 'static,
{
    s.parse().map_err(|e: exn::Exn<E>| e.to_string())
}
