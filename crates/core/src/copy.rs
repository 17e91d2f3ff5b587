//! Copy orchestration
//!
//! Picks the cheapest strategy for a copy between two handles: a backend-native
//! server-side copy when both ends are the same kind of backend and the
//! platform offers one, otherwise a streamed read into write.

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::traits::Storage;

/// Copy `src` on `src_backend` to `dst` on `dst_backend`.
///
/// Both paths are resolved before the source is opened, so an invalid
/// destination fails without touching either backend. The source is never
/// modified.
#[instrument(skip_all, fields(src = %src, dst = %dst, from = src_backend.name(), to = dst_backend.name()))]
pub async fn copy(
    src_backend: &dyn Storage,
    src: &str,
    dst_backend: &dyn Storage,
    dst: &str,
    progress: Option<Progress>,
) -> Result<()> {
    let src_path = src_backend.resolve(src)?;
    let dst_path = dst_backend.resolve(dst)?;

    if src_path.is_root() {
        return Err(Error::InvalidPath("copy source must name an object".into()));
    }
    if dst_path.is_root() {
        return Err(Error::InvalidPath("copy destination must name an object".into()));
    }

    if std::ptr::addr_eq(src_backend, dst_backend) && src_path == dst_path {
        if !src_backend.exists(&src_path.key()).await? {
            return Err(Error::NotFound(src_path.to_string()));
        }
        debug!("source and destination are identical, nothing to copy");
        return Ok(());
    }

    if src_backend.kind() == dst_backend.kind()
        && src_backend
            .native_copy(&src_path, dst_backend, &dst_path)
            .await?
    {
        debug!("completed with server-side copy");
        return Ok(());
    }

    debug!("streaming copy");
    let source = src_backend.read(&src_path.key(), None).await?;
    dst_backend
        .write(&dst_path.key(), source, None, progress)
        .await
}
