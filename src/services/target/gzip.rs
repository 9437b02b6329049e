//! On-the-fly gzip transcoding of published content.
//!
//! The source is spooled to a scoped staging directory and compressed into a
//! second file with a fixed buffer, so memory stays bounded for arbitrarily
//! large assets. The uncompressed copy is kept so a failed compression can
//! still publish the original bytes.

use flate2::{Compression, write::GzEncoder};
use futures::StreamExt;
use std::{
    fs,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{client::ByteStream, services::staging};

pub const GZIP_BUFFER_SIZE: usize = 512 * 1024;

/// Blocking compression of `(input, output, level)`, returning the output size.
pub type Compressor = fn(&Path, &Path, u32) -> io::Result<u64>;

/// Spooled original and its compressed copy. Both go away on drop.
pub struct GzipStaging {
    _dir: TempDir,
    original: PathBuf,
    compressed: PathBuf,
}

impl GzipStaging {
    /// Drain `source` into the staging directory.
    pub async fn spool(source: ByteStream) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let original = dir.path().join("original");
        let compressed = dir.path().join("compressed.gz");
        staging::spool_stream(source, &original).await?;
        Ok(Self {
            _dir: dir,
            original,
            compressed,
        })
    }

    /// Compress the original at `level`, returning the compressed size.
    pub async fn compress(&self, level: u32) -> io::Result<u64> {
        self.compress_with(compress_file, level).await
    }

    pub async fn compress_with(&self, compressor: Compressor, level: u32) -> io::Result<u64> {
        let input = self.original.clone();
        let output = self.compressed.clone();
        tokio::task::spawn_blocking(move || compressor(&input, &output, level))
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
    }

    pub async fn open_original(&self) -> io::Result<ByteStream> {
        open_file_stream(&self.original).await
    }

    pub async fn open_compressed(&self) -> io::Result<ByteStream> {
        open_file_stream(&self.compressed).await
    }
}

async fn open_file_stream(path: &Path) -> io::Result<ByteStream> {
    let file = File::open(path).await?;
    Ok(ReaderStream::with_capacity(file, GZIP_BUFFER_SIZE).boxed())
}

/// Blocking chunked compression of `input` into `output`.
pub fn compress_file(input: &Path, output: &Path, level: u32) -> io::Result<u64> {
    let mut reader = fs::File::open(input)?;
    let writer = BufWriter::with_capacity(GZIP_BUFFER_SIZE, fs::File::create(output)?);
    let mut encoder = GzEncoder::new(writer, Compression::new(level));
    let mut buffer = vec![0u8; GZIP_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buffer[..read])?;
    }
    let mut writer = encoder.finish()?;
    writer.flush()?;
    drop(writer);
    Ok(fs::metadata(output)?.len())
}
