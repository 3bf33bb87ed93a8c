//! CLI entry point: wires the positional catalog URL and `-p/--proxy`,
//! `-v/--verbose` flags to the library's Catalog Parser, Chapter Downloader
//! and Packager. Grounded on a `clap::Parser` + exit-code-mapping `Error`
//! enum shape, the way external CLI wrappers around scraping libraries
//! split "parse args" from "run pipeline, map errors to process exit codes".
//! The interactive volume-selection menu itself stays out of scope (spec §6).

use std::process::ExitCode;

use clap::Parser;
use hakodl::catalog;
use hakodl::config::FabricConfig;
use hakodl::downloader::ChapterDownloader;
use hakodl::net::NetworkFabric;
use hakodl::packager::{Packager, PackagerConfig};
use hakodl::proxy::{self, ProxyPool};
use hakodl::slug::slug;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "hakodl", version, about = "Fetch a novel catalog and package every volume as an e-book")]
struct Args {
    /// Catalog (novel landing page) URL.
    url: String,

    /// Comma-separated proxy URLs (`p://[u[:w]@]h:port`), tried round-robin
    /// with per-request failover.
    #[arg(short, long, value_delimiter = ',')]
    proxy: Vec<String>,

    /// Emit debug-level tracing and echo the sanitized proxy pool.
    #[arg(short, long)]
    verbose: bool,

    /// Re-encode embedded images as quality-75 JPEG when packaging.
    #[arg(long)]
    compress_images: bool,

    /// Directory volumes/novels are downloaded into and e-books written from.
    #[arg(long, default_value = ".")]
    output_dir: std::path::PathBuf,
}

#[derive(Debug, Error)]
enum RunError {
    #[error("invalid proxy configuration: {0}")]
    Proxy(#[from] hakodl::error::ProxyPoolError),
    #[error(transparent)]
    Pipeline(#[from] eyre::Report),
}

impl RunError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Proxy(_) => 1,
            Self::Pipeline(_) => 2,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "hakodl failed");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> Result<(), RunError> {
    let proxy_pool = if args.proxy.is_empty() {
        None
    } else {
        let pool = ProxyPool::new(&args.proxy)?;
        if args.verbose {
            for raw in &args.proxy {
                tracing::debug!(proxy = %proxy::sanitize_for_display(raw), "configured proxy");
            }
        }
        Some(pool)
    };

    let config = FabricConfig::default();
    let primary_hosts = config.primary_hosts.clone();
    let fabric = NetworkFabric::new(config, proxy_pool);

    tracing::info!(url = %args.url, "parsing catalog");
    let novel = catalog::parse(&fabric, &args.url, &primary_hosts).map_err(eyre::Report::from)?;

    let base_dir = args.output_dir.join(slug(&novel.name));
    let downloader = ChapterDownloader::new(&novel, base_dir.clone(), &fabric);
    downloader.create_metadata_file()?;

    let mut volume_filenames = Vec::with_capacity(novel.volumes.len());
    for volume in &novel.volumes {
        tracing::info!(volume = %volume.name, "downloading volume");
        let record = downloader.download_volume(
            volume,
            Some(&mut |done, total| tracing::debug!(done, total, "chapter progress")),
        )?;
        volume_filenames.push(format!("{}.json", slug(&record.volume_name)));
    }

    let books_index = hakodl::books_index::BooksIndex::in_default_location()?;
    books_index.add(&slug(&novel.name))?;

    let packager = Packager::new(
        base_dir.clone(),
        PackagerConfig {
            compress_images: args.compress_images,
            output_dir: args.output_dir.clone(),
        },
    );
    let merged_path = packager.build_merged(&volume_filenames)?;
    tracing::info!(path = %merged_path.display(), "wrote merged e-book");

    Ok(())
}
