//! s3sink library -- content-addressed object sink.
//!
//! Writes stream into an object store under a temporary key while their
//! SHA-1 digest is computed, then are relocated to
//! `{year}/{month}/{day}/{sha1}.{ext}`.  Reads stream an object back by
//! key.  The store itself sits behind the [`storage::backend::ObjectStore`]
//! trait.

pub mod config;
pub mod digest;
pub mod errors;
pub mod keys;
pub mod sink;
pub mod storage;

pub use config::{Config, SinkConfig, SinkOptions};
pub use digest::ContentDigest;
pub use errors::{ConfigError, SinkError};
pub use sink::{ContentReader, ContentWriter, Sink, WriteCompletion};

/// Validate the sink options in `config`, open the configured store and
/// build a [`Sink`] over it.
pub async fn connect(config: &Config) -> anyhow::Result<Sink> {
    let sink_config = SinkConfig::new(config.sink.clone())?;
    let store = storage::open_store(&sink_config, &config.store).await?;
    Ok(Sink::new(sink_config, store))
}
