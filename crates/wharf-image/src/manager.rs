//! Image operations exposed to the orchestration layer.

use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;

use tokio_util::io::{StreamReader, SyncIoBridge};
use wharf_common::{Image, WharfError, WharfResult};
use wharf_runtime::{ContainerRuntime, RuntimeImage};

use crate::pipe::{PIPE_DEPTH, PipeWriter, pipe};
use crate::rewrite::rewrite_archive;
use crate::sniff;
use crate::source::ImageSource;

/// Output buffered before a chunk is handed to the pipe.
const WRITE_BUFFER: usize = 64 * 1024;

/// Lists, imports and deletes runtime images by orchestrator image id.
#[derive(Clone)]
pub struct ImageManager {
    runtime: Arc<dyn ContainerRuntime>,
    source: Arc<dyn ImageSource>,
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager").finish_non_exhaustive()
    }
}

fn require_id(id: &str) -> WharfResult<&str> {
    if id.is_empty() {
        Err(WharfError::MissingImageId)
    } else {
        Ok(id)
    }
}

fn not_found(id: &str) -> WharfError {
    WharfError::ImageNotFound {
        reference: id.to_string(),
    }
}

/// Sniff, decompress and rewrite `input` into `writer`.
///
/// Any failure is also pushed down the pipe so the consuming load fails.
fn produce<R>(input: R, writer: PipeWriter, id: &str) -> WharfResult<()>
where
    R: Read + Send + 'static,
{
    let failure = writer.clone();
    let result = sniff::decompressed(input)
        .map_err(WharfError::from)
        .and_then(|reader| {
            let output = BufWriter::with_capacity(WRITE_BUFFER, writer);
            let mut output = rewrite_archive(reader, output, id)?;
            output.flush()?;
            Ok(())
        });

    if let Err(error) = &result {
        tracing::debug!(image = id, error = %error, "Archive rewrite failed");
        failure.fail(io::Error::other(error.to_string()));
    }
    result
}

impl ImageManager {
    /// Create a manager over a runtime and an archive source.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, source: Arc<dyn ImageSource>) -> Self {
        Self { runtime, source }
    }

    /// Every tagged runtime image, identified by its repository name.
    ///
    /// # Errors
    ///
    /// Propagates runtime failures.
    pub async fn list(&self) -> WharfResult<Vec<Image>> {
        let images = self.runtime.list_images().await?;
        Ok(images
            .iter()
            .filter_map(|image| {
                image
                    .repository()
                    .map(|repository| Image::from_bytes(repository, image.size_bytes))
            })
            .collect())
    }

    /// The image named `id`.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::ImageNotFound`] if the runtime has no such image.
    pub async fn get(&self, id: &str) -> WharfResult<Image> {
        let id = require_id(id)?;
        self.named(id)
            .await?
            .map(|image| Image::from_bytes(id, image.size_bytes))
            .ok_or_else(|| not_found(id))
    }

    /// The runtime image tagged `id:latest`; content-id matches don't count.
    async fn named(&self, id: &str) -> WharfResult<Option<RuntimeImage>> {
        Ok(self
            .runtime
            .inspect_image(&format!("{id}:latest"))
            .await?
            .filter(|image| image.has_repository(id)))
    }

    /// Make image `id` available in the runtime, downloading it if needed.
    ///
    /// The archive is streamed through the rewrite into the runtime's load
    /// call without being held in memory, and its repository is renamed to
    /// `id:latest` on the way.
    ///
    /// # Errors
    ///
    /// Fails on a download error, a malformed archive, a runtime load failure,
    /// or if the image is still missing after the load.
    pub async fn import(&self, id: &str) -> WharfResult<Image> {
        let id = require_id(id)?;

        if let Some(existing) = self.named(id).await? {
            tracing::debug!(image = id, "Image already present");
            return Ok(Image::from_bytes(id, existing.size_bytes));
        }

        let download = self.source.fetch(id).await?;
        let input = SyncIoBridge::new(StreamReader::new(download));
        let (writer, archive) = pipe(PIPE_DEPTH);
        let target = id.to_string();
        let producer = tokio::task::spawn_blocking(move || produce(input, writer, &target));

        let loaded = self.runtime.load_image(archive).await;
        let produced = producer.await.map_err(|e| WharfError::Internal {
            message: format!("archive rewrite task failed: {e}"),
        })?;

        match (produced, loaded) {
            // The load hung up first; its error is the real one.
            (Err(WharfError::Io(e)), Err(load)) if e.kind() == io::ErrorKind::BrokenPipe => {
                return Err(load);
            }
            (Err(e), _) | (Ok(()), Err(e)) => return Err(e),
            (Ok(()), Ok(())) => {}
        }

        let image = self.named(id).await?.ok_or_else(|| not_found(id))?;
        tracing::info!(image = id, size_bytes = image.size_bytes, "Imported image");
        Ok(Image::from_bytes(id, image.size_bytes))
    }

    /// Remove image `id` and return what was removed.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::ImageNotFound`] if the runtime has no such image.
    pub async fn delete(&self, id: &str) -> WharfResult<Image> {
        let image = self.get(id).await?;
        self.runtime.remove_image(id).await?;
        tracing::info!(image = id, "Deleted image");
        Ok(image)
    }
}
