//! Binary layout of `.tbv` diagnostics archives.
//!
//! ```text
//! header (64 bytes) | title (UTF-8) | frame data ... | frame table
//! ```
//!
//! All integers are little endian. The frame table sits at the end of the
//! file, one entry per frame, and records the simulated time each frame
//! shows so a player can seek by time without decoding pixels.

use std::io;

/// Magic bytes identifying a diagnostics archive.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"TBVA";

/// Current format version.
pub const ARCHIVE_VERSION: u16 = 2;

/// Titles longer than this are rejected when reading.
pub const MAX_TITLE_LEN: u32 = 4096;

/// Compression of the stored frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// Raw RGB8 bytes.
    #[default]
    None,
    /// LZ4 block compression with the size prepended.
    Lz4,
}

impl CompressionType {
    fn code(self) -> u16 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
        }
    }

    fn from_code(code: u16) -> io::Result<Self> {
        match code {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            other => Err(invalid(format!("unknown compression {other}"))),
        }
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Fixed-size little-endian field cursor.
struct Fields<'a> {
    bytes: &'a mut [u8],
    at: usize,
}

impl Fields<'_> {
    fn put(&mut self, value: &[u8]) {
        self.bytes[self.at..self.at + value.len()].copy_from_slice(value);
        self.at += value.len();
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.at..self.at + N]);
        self.at += N;
        out
    }
}

fn time_to_bits(time: Option<f64>) -> f64 {
    time.unwrap_or(f64::NAN)
}

fn time_from_bits(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// What an archive holds: one diagnostic's frames at a fixed pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveHeader {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Panel grid of every frame.
    pub rows: u16,
    pub cols: u16,
    /// Edge length of one panel in pixels.
    pub panel_size: u32,
    pub frame_count: u64,
    /// Playback rate.
    pub fps: f32,
    pub compression: CompressionType,
    /// Byte length of the title following the header.
    pub title_len: u32,
    /// First and last simulated time among the frames.
    pub time_span: Option<(f64, f64)>,
}

impl ArchiveHeader {
    /// Magic(4) + Version(2) + Compression(2) + Width(4) + Height(4) +
    /// Rows(2) + Cols(2) + PanelSize(4) + FrameCount(8) + Fps(4) +
    /// TitleLen(4) + FirstTime(8) + LastTime(8) + Reserved(8) = 64
    pub const SIZE: usize = 64;

    /// Size of one decoded RGB frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * super::RgbFrame::CHANNELS as usize
    }

    /// Offset of the first frame's data.
    pub fn data_start(&self) -> u64 {
        Self::SIZE as u64 + self.title_len as u64
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let (first, last) = match self.time_span {
            Some((first, last)) => (first, last),
            None => (f64::NAN, f64::NAN),
        };
        let mut fields = Fields {
            bytes: &mut bytes,
            at: 0,
        };
        fields.put(ARCHIVE_MAGIC);
        fields.put(&ARCHIVE_VERSION.to_le_bytes());
        fields.put(&self.compression.code().to_le_bytes());
        fields.put(&self.width.to_le_bytes());
        fields.put(&self.height.to_le_bytes());
        fields.put(&self.rows.to_le_bytes());
        fields.put(&self.cols.to_le_bytes());
        fields.put(&self.panel_size.to_le_bytes());
        fields.put(&self.frame_count.to_le_bytes());
        fields.put(&self.fps.to_le_bytes());
        fields.put(&self.title_len.to_le_bytes());
        fields.put(&first.to_le_bytes());
        fields.put(&last.to_le_bytes());
        bytes
    }

    pub fn from_bytes(mut bytes: [u8; Self::SIZE]) -> io::Result<Self> {
        let mut fields = Fields {
            bytes: &mut bytes,
            at: 0,
        };
        if &fields.take::<4>() != ARCHIVE_MAGIC {
            return Err(invalid("not a TBVA archive".to_string()));
        }
        let version = u16::from_le_bytes(fields.take());
        if version != ARCHIVE_VERSION {
            return Err(invalid(format!("unsupported TBVA version {version}")));
        }
        let compression = CompressionType::from_code(u16::from_le_bytes(fields.take()))?;
        let width = u32::from_le_bytes(fields.take());
        let height = u32::from_le_bytes(fields.take());
        let rows = u16::from_le_bytes(fields.take());
        let cols = u16::from_le_bytes(fields.take());
        let panel_size = u32::from_le_bytes(fields.take());
        let frame_count = u64::from_le_bytes(fields.take());
        let fps = f32::from_le_bytes(fields.take());
        let title_len = u32::from_le_bytes(fields.take());
        let first = f64::from_le_bytes(fields.take());
        let last = f64::from_le_bytes(fields.take());

        if title_len > MAX_TITLE_LEN {
            return Err(invalid(format!("title of {title_len} bytes")));
        }
        let time_span = match (time_from_bits(first), time_from_bits(last)) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        };
        Ok(Self {
            width,
            height,
            rows,
            cols,
            panel_size,
            frame_count,
            fps,
            compression,
            title_len,
            time_span,
        })
    }
}

/// Frame-table entry: where one frame is stored and the time it shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEntry {
    /// Byte offset from the start of the file.
    pub offset: u64,
    /// Stored size in bytes.
    pub size: u32,
    /// Simulated time in seconds, `None` for still images.
    pub time: Option<f64>,
}

impl FrameEntry {
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut fields = Fields {
            bytes: &mut bytes,
            at: 0,
        };
        fields.put(&self.offset.to_le_bytes());
        fields.put(&self.size.to_le_bytes());
        fields.put(&time_to_bits(self.time).to_le_bytes());
        bytes
    }

    pub fn from_bytes(mut bytes: [u8; Self::SIZE]) -> Self {
        let mut fields = Fields {
            bytes: &mut bytes,
            at: 0,
        };
        let offset = u64::from_le_bytes(fields.take());
        let size = u32::from_le_bytes(fields.take());
        let time = time_from_bits(f64::from_le_bytes(fields.take()));
        Self { offset, size, time }
    }
}

/// Span of the finite times among `entries`.
pub fn time_span(entries: &[FrameEntry]) -> Option<(f64, f64)> {
    let mut times = entries.iter().filter_map(|e| e.time);
    let first = times.next()?;
    Some(times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
}

#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| invalid(e.to_string()))
}

#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(lz4_unavailable())
}

#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(lz4_unavailable())
}

#[cfg(not(feature = "lz4"))]
fn lz4_unavailable() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "LZ4 archives need the `lz4` feature",
    )
}
