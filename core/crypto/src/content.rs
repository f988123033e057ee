//! Block-wise content encryption.
//!
//! # Format
//! - Header (16 bytes): magic `VGC1`, block size (u32 LE), plaintext length
//!   (u64 LE)
//! - Blocks: `nonce || ciphertext || tag`, one per `block_size` bytes of
//!   plaintext; an empty file still has one empty block
//!
//! Every block authenticates `header || block index || final flag`, so
//! reordered, dropped or appended blocks and edited headers all fail. The
//! plaintext length is readable from the header alone, which is how listings
//! report sizes without decrypting anything.

use std::io::{self, Read, Write};

use crate::aead::{decrypt_with_aad, encrypt_with_aad, NONCE_SIZE, TAG_SIZE};
use crate::keys::ContentKey;
use vaultgate_common::{Error, Result};

/// Magic bytes opening every encrypted file.
pub const MAGIC: &[u8; 4] = b"VGC1";

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Default plaintext block size (64 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Largest block size a reader will accept from a header.
pub const MAX_BLOCK_SIZE: u32 = 8 * 1024 * 1024;

/// Most a reader preallocates on the word of an unauthenticated length.
pub const PREALLOC_LIMIT: u64 = 16 * DEFAULT_BLOCK_SIZE as u64;

/// Parsed content header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHeader {
    pub block_size: u32,
    pub plaintext_len: u64,
}

impl ContentHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(MAGIC);
        bytes[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[8..].copy_from_slice(&self.plaintext_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &bytes[..4] != MAGIC {
            return Err(Error::Crypto("Not an encrypted content file".to_string()));
        }
        let mut block_size = [0u8; 4];
        block_size.copy_from_slice(&bytes[4..8]);
        let mut plaintext_len = [0u8; 8];
        plaintext_len.copy_from_slice(&bytes[8..]);

        let header = Self {
            block_size: u32::from_le_bytes(block_size),
            plaintext_len: u64::from_le_bytes(plaintext_len),
        };
        if header.block_size == 0 || header.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Crypto(format!(
                "Invalid block size: {}",
                header.block_size
            )));
        }
        Ok(header)
    }

    /// Number of blocks in the file (at least one).
    pub fn block_count(&self) -> u64 {
        self.plaintext_len.div_ceil(self.block_size as u64).max(1)
    }

    /// Size of a well-formed file with this header, or `None` if the
    /// declared length cannot describe a real file.
    pub fn encrypted_len(&self) -> Option<u64> {
        let overhead = self
            .block_count()
            .checked_mul((NONCE_SIZE + TAG_SIZE) as u64)?;
        (HEADER_SIZE as u64)
            .checked_add(overhead)?
            .checked_add(self.plaintext_len)
    }

    /// Check the declared plaintext length against the file size on disk.
    ///
    /// # Errors
    /// - `Crypto` if the two disagree
    pub fn check_file_len(&self, file_len: u64) -> Result<()> {
        match self.encrypted_len() {
            Some(expected) if expected == file_len => Ok(()),
            _ => Err(Error::Crypto(format!(
                "Declared length {} does not match file size {}",
                self.plaintext_len, file_len
            ))),
        }
    }

    fn block_len(&self, index: u64) -> usize {
        if index + 1 < self.block_count() {
            self.block_size as usize
        } else {
            (self.plaintext_len - index * self.block_size as u64) as usize
        }
    }
}

fn block_aad(header: &[u8; HEADER_SIZE], index: u64, last: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_SIZE + 9);
    aad.extend_from_slice(header);
    aad.extend_from_slice(&index.to_le_bytes());
    aad.push(u8::from(last));
    aad
}

/// Read and validate the header without touching any block.
pub fn read_header<R: Read>(mut reader: R) -> Result<ContentHeader> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Crypto("Truncated content header".to_string()),
        _ => Error::Io(e),
    })?;
    ContentHeader::from_bytes(&bytes)
}

/// Encrypt `plaintext` into `writer` using `block_size`-byte blocks.
///
/// Returns the number of bytes written.
pub fn encrypt_content<W: Write>(
    key: &ContentKey,
    plaintext: &[u8],
    block_size: u32,
    mut writer: W,
) -> Result<u64> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(Error::InvalidInput(format!(
            "Invalid block size: {}",
            block_size
        )));
    }
    let header = ContentHeader {
        block_size,
        plaintext_len: plaintext.len() as u64,
    };
    let header_bytes = header.to_bytes();
    writer.write_all(&header_bytes)?;
    let mut written = HEADER_SIZE as u64;

    let blocks = header.block_count();
    for index in 0..blocks {
        let start = (index * block_size as u64) as usize;
        let end = start + header.block_len(index);
        let aad = block_aad(&header_bytes, index, index + 1 == blocks);

        let encrypted = encrypt_with_aad(key.as_bytes(), &plaintext[start..end], &aad)?;
        writer.write_all(&encrypted)?;
        written += encrypted.len() as u64;
    }

    writer.flush()?;
    Ok(written)
}

/// Decrypting reader over an encrypted content file.
///
/// Blocks are read and authenticated one at a time as the caller consumes
/// plaintext, so memory use is bounded by the block size.
pub struct ContentReader<R> {
    inner: R,
    key: ContentKey,
    header: ContentHeader,
    header_bytes: [u8; HEADER_SIZE],
    next_block: u64,
    buffer: Vec<u8>,
    position: usize,
}

impl<R: Read> ContentReader<R> {
    /// Read the header from `inner` and prepare to decrypt.
    pub fn new(mut inner: R, key: ContentKey) -> Result<Self> {
        let header = read_header(&mut inner)?;
        Ok(Self {
            inner,
            key,
            header_bytes: header.to_bytes(),
            header,
            next_block: 0,
            buffer: Vec::new(),
            position: 0,
        })
    }

    pub fn header(&self) -> ContentHeader {
        self.header
    }

    /// Plaintext length declared by the header. Only authenticated once the
    /// first block decrypts.
    pub fn plaintext_len(&self) -> u64 {
        self.header.plaintext_len
    }

    /// Decrypt the whole remaining stream into memory.
    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.header.plaintext_len.min(PREALLOC_LIMIT) as usize);
        self.read_to_end(&mut out).map_err(unwrap_io)?;
        Ok(out)
    }

    fn fill_buffer(&mut self) -> Result<bool> {
        let blocks = self.header.block_count();
        if self.next_block == blocks {
            let mut probe = [0u8; 1];
            if self.inner.read(&mut probe)? != 0 {
                return Err(Error::Crypto("Trailing data after final block".to_string()));
            }
            return Ok(false);
        }

        let index = self.next_block;
        let plain_len = self.header.block_len(index);
        let mut encrypted = vec![0u8; NONCE_SIZE + plain_len + TAG_SIZE];
        self.inner
            .read_exact(&mut encrypted)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    Error::Crypto(format!("Truncated content at block {}", index))
                }
                _ => Error::Io(e),
            })?;

        let aad = block_aad(&self.header_bytes, index, index + 1 == blocks);
        self.buffer = decrypt_with_aad(self.key.as_bytes(), &encrypted, &aad)?;
        self.position = 0;
        self.next_block += 1;
        Ok(true)
    }
}

impl<R: Read> Read for ContentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position == self.buffer.len() {
            match self.fill_buffer() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(Error::Io(e)) => return Err(e),
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }

        let n = buf.len().min(self.buffer.len() - self.position);
        buf[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// Recover the crate error wrapped into an `io::Error` by [`ContentReader`].
pub fn unwrap_io(err: io::Error) -> Error {
    match err.get_ref().map(|inner| inner.is::<Error>()) {
        Some(true) => match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            _ => Error::Crypto("Content decryption failed".to_string()),
        },
        _ => Error::Io(err),
    }
}
