//! Scoped temporary files used while importing and transcoding.

use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{fs, fs::File, io::AsyncWriteExt};

use crate::client::ByteStream;

/// Drain `stream` into a new file at `path`, returning the byte count.
pub async fn spool_stream(mut stream: ByteStream, path: &Path) -> io::Result<u64> {
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Move `from` to `to`, copying when they sit on different filesystems.
pub async fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices || err.raw_os_error() == Some(18) => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        }
        Err(err) => Err(err),
    }
}
