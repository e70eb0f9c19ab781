use crate::error::WriteError;
use crate::sample::{Sample, SampleFormat, Track};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Magic number for clip files: "CLIP"
const CLIP_MAGIC: [u8; 4] = *b"CLIP";
const CLIP_VERSION: u32 = 1;
const CLIP_HEADER_SIZE: usize = 32;
const SAMPLE_COUNT_OFFSET: u64 = 24;
const RECORD_HEADER_SIZE: usize = 32;
/// Largest payload a record may claim; anything bigger is corruption
const MAX_RECORD_PAYLOAD: usize = 256 * 1024 * 1024;

const CLIP_EXTENSION: &str = "clip";
const PARTIAL_EXTENSION: &str = "part";

/// Storage that opens one append-only target per clip
#[async_trait]
pub trait ClipSink: Send + Sync {
    async fn open(&self, clip_id: Uuid) -> Result<Box<dyn ClipTarget>, WriteError>;
}

/// An open, append-only clip output
#[async_trait]
pub trait ClipTarget: Send {
    async fn append(&mut self, sample: &Sample) -> Result<(), WriteError>;

    /// Flush everything and turn the target into an immutable artifact
    async fn finalize(self: Box<Self>) -> Result<PathBuf, WriteError>;
}

/// File-backed sink writing `<clip-id>.clip` files into a directory
pub struct FileClipSink {
    dir: PathBuf,
    sync_interval: Duration,
}

impl FileClipSink {
    pub fn new<P: Into<PathBuf>>(dir: P, sync_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            sync_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn into_shared(self) -> Arc<dyn ClipSink> {
        Arc::new(self)
    }
}

#[async_trait]
impl ClipSink for FileClipSink {
    async fn open(&self, clip_id: Uuid) -> Result<Box<dyn ClipTarget>, WriteError> {
        let target = FileClipTarget::create(clip_id, &self.dir, self.sync_interval).await?;
        Ok(Box::new(target))
    }
}

/// Byte store underneath a clip file
#[async_trait]
pub trait ClipFile: Send {
    /// Write `bytes` at the current end of the file
    async fn append_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Cut the file back to `len` bytes; the next append lands there
    async fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;

    /// Overwrite bytes at `offset` without moving the append position
    async fn patch(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;

    async fn sync_to_disk(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl ClipFile for File {
    async fn append_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.write_all(bytes).await?;
        // Surface a failed write here rather than on some later record
        self.flush().await
    }

    async fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await?;
        self.seek(std::io::SeekFrom::Start(len)).await?;
        Ok(())
    }

    async fn patch(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        let end = self.stream_position().await?;
        self.seek(std::io::SeekFrom::Start(offset)).await?;
        self.write_all(bytes).await?;
        self.seek(std::io::SeekFrom::Start(end)).await?;
        Ok(())
    }

    async fn sync_to_disk(&mut self) -> std::io::Result<()> {
        self.flush().await?;
        self.sync_data().await
    }
}

/// Clip file writer; the file carries a `.part` suffix until finalized.
///
/// Every record is written with a single append. A failed append is cut
/// back to the end of the last complete record, so the file stays readable
/// and later samples still land on a record boundary.
pub struct FileClipTarget<F: ClipFile = File> {
    file: F,
    clip_id: Uuid,
    partial_path: PathBuf,
    final_path: PathBuf,
    sample_count: u32,
    /// End of the last complete record
    committed_len: u64,
    last_sync: Instant,
    sync_interval: Duration,
}

impl FileClipTarget<File> {
    pub async fn create(clip_id: Uuid, dir: &Path, sync_interval: Duration) -> Result<Self, WriteError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            WriteError::storage(format!("Failed to create clip directory: {}", e))
        })?;

        let partial_path = dir.join(format!("{}.{}.{}", clip_id, CLIP_EXTENSION, PARTIAL_EXTENSION));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&partial_path)
            .await
            .map_err(|e| WriteError::storage(format!("Failed to create clip file: {}", e)))?;

        Self::with_file(file, clip_id, dir, sync_interval).await
    }
}

impl<F: ClipFile> FileClipTarget<F> {
    /// Start a clip in an already opened, empty `<clip-id>.clip.part` file in `dir`
    pub async fn with_file(
        file: F,
        clip_id: Uuid,
        dir: &Path,
        sync_interval: Duration,
    ) -> Result<Self, WriteError> {
        let mut target = Self {
            file,
            clip_id,
            partial_path: dir.join(format!("{}.{}.{}", clip_id, CLIP_EXTENSION, PARTIAL_EXTENSION)),
            final_path: dir.join(format!("{}.{}", clip_id, CLIP_EXTENSION)),
            sample_count: 0,
            committed_len: 0,
            last_sync: Instant::now(),
            sync_interval,
        };

        target.write_header().await?;

        info!("Created clip file {}", target.partial_path.display());
        Ok(target)
    }

    async fn write_header(&mut self) -> Result<(), WriteError> {
        let mut header = Vec::with_capacity(CLIP_HEADER_SIZE);
        header.extend_from_slice(&CLIP_MAGIC);
        header.extend_from_slice(&CLIP_VERSION.to_le_bytes());
        header.extend_from_slice(self.clip_id.as_bytes());
        // Sample count placeholder, patched on finalize
        header.extend_from_slice(&0u32.to_le_bytes());
        // Reserved
        header.extend_from_slice(&0u32.to_le_bytes());

        self.file
            .append_bytes(&header)
            .await
            .map_err(|e| WriteError::storage(format!("Failed to write clip header: {}", e)))?;
        self.committed_len = header.len() as u64;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), WriteError> {
        self.file
            .sync_to_disk()
            .await
            .map_err(|e| WriteError::storage(format!("Failed to sync clip: {}", e)))?;

        self.last_sync = Instant::now();
        debug!("Synced clip {} to disk", self.clip_id);
        Ok(())
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

fn encode_record(sample: &Sample) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + sample.data.len());
    record.extend_from_slice(&(sample.timestamp.as_nanos() as u64).to_le_bytes());
    record.extend_from_slice(&sample.id.to_le_bytes());
    record.push(sample.track.index() as u8);
    record.push(sample.format.to_byte());
    record.extend_from_slice(&0u16.to_le_bytes());
    record.extend_from_slice(&sample.width.to_le_bytes());
    record.extend_from_slice(&sample.height.to_le_bytes());
    record.extend_from_slice(&(sample.data.len() as u32).to_le_bytes());
    record.extend_from_slice(&sample.data);
    record
}

#[async_trait]
impl<F: ClipFile + 'static> ClipTarget for FileClipTarget<F> {
    async fn append(&mut self, sample: &Sample) -> Result<(), WriteError> {
        let record = encode_record(sample);
        if let Err(e) = self.file.append_bytes(&record).await {
            // Drop whatever part of the record reached the file
            if let Err(cut) = self.file.truncate_to(self.committed_len).await {
                warn!(
                    "Could not cut clip {} back to {} bytes: {}",
                    self.clip_id, self.committed_len, cut
                );
            }
            return Err(WriteError::storage(format!("Failed to append sample: {}", e)));
        }

        self.committed_len += record.len() as u64;
        self.sample_count += 1;

        // The record is written either way; a failed sync is retried on the next append
        if self.last_sync.elapsed() > self.sync_interval {
            if let Err(e) = self.sync().await {
                warn!("{}", e);
            }
        }
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<PathBuf, WriteError> {
        let clip_id = self.clip_id;
        let sample_count = self.sample_count;

        self.file
            .truncate_to(self.committed_len)
            .await
            .map_err(|e| WriteError::storage(format!("Failed to trim clip on finalize: {}", e)))?;
        self.file
            .patch(SAMPLE_COUNT_OFFSET, &sample_count.to_le_bytes())
            .await
            .map_err(|e| WriteError::storage(format!("Failed to update sample count: {}", e)))?;
        self.file
            .sync_to_disk()
            .await
            .map_err(|e| WriteError::storage(format!("Failed to sync clip on finalize: {}", e)))?;

        let FileClipTarget {
            file,
            partial_path,
            final_path,
            ..
        } = *self;
        drop(file);

        tokio::fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| WriteError::storage(format!("Failed to publish clip file: {}", e)))?;

        info!(
            "Finalized clip {} ({} samples) at {}",
            clip_id,
            sample_count,
            final_path.display()
        );
        Ok(final_path)
    }
}

async fn write_sample_count(file: &mut File, sample_count: u32) -> Result<(), WriteError> {
    file.seek(std::io::SeekFrom::Start(SAMPLE_COUNT_OFFSET))
        .await
        .map_err(|e| WriteError::storage(format!("Failed to seek in clip: {}", e)))?;
    file.write_all(&sample_count.to_le_bytes())
        .await
        .map_err(|e| WriteError::storage(format!("Failed to update sample count: {}", e)))?;
    file.sync_all()
        .await
        .map_err(|e| WriteError::storage(format!("Failed to sync clip: {}", e)))
}

/// Streaming reader over a clip file
pub struct ClipReader {
    file: File,
    clip_id: Uuid,
    sample_count: u32,
    /// Offset just past the last complete record read
    position: u64,
    file_len: u64,
}

impl ClipReader {
    /// Open a clip file and validate its header
    pub async fn open(path: &Path) -> Result<Self, WriteError> {
        let mut file = File::open(path)
            .await
            .map_err(|e| WriteError::storage(format!("Failed to open clip file: {}", e)))?;

        let file_len = file
            .metadata()
            .await
            .map_err(|e| WriteError::storage(format!("Failed to stat clip file: {}", e)))?
            .len();

        let mut header = [0u8; CLIP_HEADER_SIZE];
        file.read_exact(&mut header).await.map_err(|e| WriteError::Corrupt {
            details: format!("Failed to read clip header: {}", e),
        })?;

        if header[0..4] != CLIP_MAGIC {
            return Err(WriteError::Corrupt {
                details: "bad magic number".to_string(),
            });
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != CLIP_VERSION {
            return Err(WriteError::Corrupt {
                details: format!("unsupported clip version {}", version),
            });
        }

        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&header[8..24]);
        let sample_count = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);

        Ok(Self {
            file,
            clip_id: Uuid::from_bytes(id_bytes),
            sample_count,
            position: CLIP_HEADER_SIZE as u64,
            file_len,
        })
    }

    pub fn clip_id(&self) -> Uuid {
        self.clip_id
    }

    /// Sample count recorded in the header (0 for an unfinalized file)
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Read the next sample; `None` at end of file or at a truncated tail record
    pub async fn next_sample(&mut self) -> Result<Option<Sample>, WriteError> {
        let mut head = [0u8; RECORD_HEADER_SIZE];
        match self.file.read_exact(&mut head).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let le_u64 = |range: std::ops::Range<usize>| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&head[range]);
            u64::from_le_bytes(bytes)
        };
        let le_u32 = |range: std::ops::Range<usize>| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&head[range]);
            u32::from_le_bytes(bytes)
        };

        let timestamp = Duration::from_nanos(le_u64(0..8));
        let sample_id = le_u64(8..16);
        let track = Track::from_index(head[16]).ok_or_else(|| WriteError::Corrupt {
            details: format!("unknown track {}", head[16]),
        })?;
        let format = SampleFormat::from_byte(head[17]).ok_or_else(|| WriteError::Corrupt {
            details: format!("unknown sample format {}", head[17]),
        })?;
        let width = le_u32(20..24);
        let height = le_u32(24..28);
        let data_len = le_u32(28..32) as usize;

        if data_len > MAX_RECORD_PAYLOAD {
            return Err(WriteError::Corrupt {
                details: format!("record claims {} payload bytes", data_len),
            });
        }
        let remaining = self
            .file_len
            .saturating_sub(self.position + RECORD_HEADER_SIZE as u64);
        if data_len as u64 > remaining {
            // Truncated tail record
            return Ok(None);
        }

        let mut data = vec![0u8; data_len];
        match self.file.read_exact(&mut data).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        self.position += (RECORD_HEADER_SIZE + data_len) as u64;

        let mut sample = Sample::new(sample_id, track, timestamp, data, format);
        sample.width = width;
        sample.height = height;
        Ok(Some(sample))
    }

    pub async fn read_all(&mut self) -> Result<Vec<Sample>, WriteError> {
        let mut samples = Vec::with_capacity(self.sample_count as usize);
        while let Some(sample) = self.next_sample().await? {
            samples.push(sample);
        }
        Ok(samples)
    }
}

/// Repair clip files left open by a crash.
///
/// Each `.part` file is truncated to its last complete record, its header
/// count is rewritten and it is renamed to a regular clip file.
pub async fn recover_partial_clips(dir: &Path) -> Result<Vec<PathBuf>, WriteError> {
    let mut recovered = Vec::new();

    if !dir.exists() {
        return Ok(recovered);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| WriteError::storage(format!("Failed to read clip directory: {}", e)))?;

    let mut partials = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| WriteError::storage(format!("Failed to read directory entry: {}", e)))?
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some(PARTIAL_EXTENSION) {
            partials.push(path);
        }
    }

    for partial_path in partials {
        match recover_partial_clip(&partial_path).await {
            Ok(final_path) => recovered.push(final_path),
            Err(e) => warn!(
                "Could not recover partial clip {}: {}",
                partial_path.display(),
                e
            ),
        }
    }

    if !recovered.is_empty() {
        info!("Recovered {} partial clip(s)", recovered.len());
    }
    Ok(recovered)
}

async fn recover_partial_clip(partial_path: &Path) -> Result<PathBuf, WriteError> {
    let mut reader = ClipReader::open(partial_path).await?;
    let mut sample_count = 0u32;
    loop {
        match reader.next_sample().await {
            Ok(Some(_)) => sample_count += 1,
            Ok(None) => break,
            // Everything from the first unreadable record on is dropped
            Err(WriteError::Corrupt { details }) => {
                warn!(
                    "Partial clip {} is corrupt after {} samples: {}",
                    partial_path.display(),
                    sample_count,
                    details
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    let intact_len = reader.position;
    drop(reader);

    let mut file = OpenOptions::new()
        .write(true)
        .open(partial_path)
        .await
        .map_err(|e| WriteError::storage(format!("Failed to reopen partial clip: {}", e)))?;
    file.set_len(intact_len)
        .await
        .map_err(|e| WriteError::storage(format!("Failed to truncate partial clip: {}", e)))?;
    write_sample_count(&mut file, sample_count).await?;
    drop(file);

    // "<id>.clip.part" -> "<id>.clip"
    let final_path = partial_path.with_extension("");
    tokio::fs::rename(partial_path, &final_path)
        .await
        .map_err(|e| WriteError::storage(format!("Failed to rename recovered clip: {}", e)))?;

    info!(
        "Recovered clip {} with {} samples",
        final_path.display(),
        sample_count
    );
    Ok(final_path)
}
