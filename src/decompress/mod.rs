//! Transparent LZ4 decompression for compressed DBD files.
//!
//! The glider dockserver compresses DBD files frame by frame: each frame
//! is a big-endian `u16` compressed length followed by an LZ4 *block*
//! payload of at most [`MAX_FRAME_SIZE`] uncompressed bytes.  Past this
//! layer a compressed and an uncompressed stream are byte-identical.
//!
//! Compressed files are recognized by suffix: a four-character extension
//! whose third character is `c` (`.dcd`, `.ecd`, `.scd`, `.tcd`, ...).

use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Maximum uncompressed frame size produced by the dockserver.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// True when `path` matches the compressed DBD naming pattern `*.?c?`.
pub fn is_compressed(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.len() == 3 && ext.as_bytes()[1].eq_ignore_ascii_case(&b'c'),
        None => false,
    }
}

/// `io::Read` adapter that inflates LZ4 frames on demand.
pub struct Lz4FrameReader<R: Read> {
    inner:   R,
    buffer:  Vec<u8>,
    pos:     usize,
    eof:     bool,
}

impl<R: Read> Lz4FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: Vec::new(), pos: 0, eof: false }
    }

    /// Pull and decompress the next frame into the buffer.
    /// Returns false on EOF or a truncated trailing frame.
    fn read_frame(&mut self) -> io::Result<bool> {
        let frame_size = match self.inner.read_u16::<BigEndian>() {
            Ok(n) => n as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut compressed = vec![0u8; frame_size];
        if let Err(e) = self.inner.read_exact(&mut compressed) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(false);
            }
            return Err(e);
        }
        let decompressed = lz4_flex::block::decompress(&compressed, MAX_FRAME_SIZE)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.buffer = decompressed;
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for Lz4FrameReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut written = 0usize;
        while written < out.len() {
            if self.pos >= self.buffer.len() {
                if self.eof || !self.read_frame()? {
                    self.eof = true;
                    break;
                }
            }
            let avail = self.buffer.len() - self.pos;
            let take = avail.min(out.len() - written);
            out[written..written + take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
            written += take;
        }
        Ok(written)
    }
}

/// Open a DBD file for reading, inflating it transparently when the
/// suffix indicates compression.  The returned stream is buffered.
pub fn open_dbd(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_compressed(path) {
        Ok(Box::new(BufReader::new(Lz4FrameReader::new(BufReader::new(file)))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
