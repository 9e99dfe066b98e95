//! s3sink -- store files by content digest in an S3-compatible bucket.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use s3sink::config::LoggingConfig;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Command-line arguments for s3sink.
#[derive(Parser, Debug)]
#[command(
    name = "s3sink",
    version,
    about = "Content-addressed object sink for S3-compatible stores"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3sink.example.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file (or stdin) and print its content-addressed key.
    Put {
        /// Extension appended to the stored key.
        #[arg(short, long)]
        ext: Option<String>,

        /// File to store; reads stdin when omitted.
        path: Option<PathBuf>,
    },

    /// Stream a stored object to a file (or stdout).
    Get {
        /// Key returned by `put`.
        key: String,

        /// Destination file; writes stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // Logs go to stderr; stdout may carry object data.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Extension for `path` when none is given on the command line.
fn default_extension(path: Option<&PathBuf>) -> String {
    path.and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = s3sink::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config.display());

    let sink = s3sink::connect(&config).await?;

    match cli.command {
        Command::Put { ext, path } => {
            let ext = ext.unwrap_or_else(|| default_extension(path.as_ref()));
            let (mut writer, completion) = sink.writer(&ext);

            let copied = match &path {
                Some(path) => {
                    let mut file = tokio::fs::File::open(path).await?;
                    tokio::io::copy(&mut file, &mut writer).await
                }
                None => tokio::io::copy(&mut tokio::io::stdin(), &mut writer).await,
            };

            match copied {
                Ok(bytes) => {
                    writer.shutdown().await?;
                    info!("Uploaded {} bytes", bytes);
                }
                // The upload ended early; its cause is reported by the completion.
                Err(e) => {
                    drop(writer);
                    tracing::warn!("Input stopped early: {}", e);
                }
            }

            match completion.await {
                Ok(key) => println!("{key}"),
                Err(err) => {
                    // A cleanup failure still leaves a complete object at its key.
                    let Some(key) = err.committed_key().map(str::to_string) else {
                        return Err(err.into());
                    };
                    tracing::warn!("{}", err);
                    println!("{key}");
                }
            }
        }
        Command::Get { key, output } => {
            let mut reader = sink.reader(&key);
            let drained = reader.on_drained();

            let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
                Some(path) => Box::new(tokio::fs::File::create(path).await?),
                None => Box::new(tokio::io::stdout()),
            };
            while let Some(chunk) = reader.next().await {
                out.write_all(&chunk?).await?;
            }
            out.flush().await?;

            if let Ok(bytes) = drained.await {
                info!("Read {} bytes from {}", bytes, key);
            }
        }
    }

    Ok(())
}
