use clap::Parser;
use favicon_forge::config::RawOptions;
use favicon_forge::emit::{emit_bundle, DirectorySink};
use favicon_forge::html::HtmlTransform;
use favicon_forge::ico::IconDirectory;
use favicon_forge::NativeEncoder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Generates a favicon bundle from a JSON configuration.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the JSON configuration, relative paths inside are resolved
    /// against its directory
    config: PathBuf,

    /// Directory the bundle is written to
    #[arg(short, long, default_value = "dist")]
    out_dir: PathBuf,

    /// HTML document to inject the favicon into, defaults to index.html in
    /// the output directory if present
    #[arg(long)]
    html: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Set up logging using tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    tracing::info!(
        "{} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    tracing::debug!("Loading configuration from {}", args.config.display());
    let options = match RawOptions::from_file(&args.config) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!("Failed to load configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let root = args
        .config
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let config = match options.resolve(&root) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut sink = DirectorySink::new(&args.out_dir);
    let bundle = match emit_bundle(&config, &NativeEncoder, &mut sink).await {
        Ok(v) => v,
        Err(err) => {
            tracing::error!("Failed to emit favicon: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // Read the icon back to report what ended up in the container
    let ico_path = sink.output_dir().join(&bundle.ico_file);
    match std::fs::read(&ico_path).map(|data| IconDirectory::parse(&data).map(|d| (d, data.len()))) {
        Ok(Ok((directory, len))) => {
            for entry in directory.entries() {
                tracing::debug!(
                    "{}x{} entry, {} bytes at offset {}",
                    entry.width,
                    entry.height,
                    entry.data_size,
                    entry.data_offset
                );
            }
            tracing::info!(
                "Wrote {} ({} entries, {} bytes)",
                ico_path.display(),
                directory.entries().len(),
                len
            );
        }
        Ok(Err(err)) | Err(err) => {
            tracing::error!("Emitted icon {} is unreadable: {}", ico_path.display(), err);
            return ExitCode::FAILURE;
        }
    }

    let html_path = args
        .html
        .unwrap_or_else(|| sink.output_dir().join("index.html"));
    if !html_path.is_file() {
        tracing::debug!("No HTML document at {}, skipping injection", html_path.display());
        return ExitCode::SUCCESS;
    }

    let html = match std::fs::read_to_string(&html_path) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!("Failed to read {}: {}", html_path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let document = HtmlTransform::new(&html, config.inject, &bundle, &config.base, None)
        .into_document();
    if let Err(err) = std::fs::write(&html_path, document) {
        tracing::error!("Failed to write {}: {}", html_path.display(), err);
        return ExitCode::FAILURE;
    }

    tracing::info!("Updated {}", html_path.display());
    ExitCode::SUCCESS
}
