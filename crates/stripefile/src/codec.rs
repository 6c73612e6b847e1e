//! Block compression used for footers, stripe footers and column chunks
//!
//! Compressed regions are a sequence of blocks, each preceded by a 3-byte
//! little-endian header holding `(length << 1) | is_original`. An original
//! block is stored verbatim because compressing it did not help. Every block
//! decompresses to at most the file's compression block size. Files written
//! without compression store regions as-is with no block headers.

use std::io::{Read, Write};

use thiserror::Error;

use crate::footer::CompressionKind;

/// Largest block length a 3-byte header can describe
pub const MAX_BLOCK_SIZE: usize = (1 << 23) - 1;

const HEADER_SIZE: usize = 3;

/// Errors raised while compressing or decompressing a region
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("block header at byte {offset} is truncated")]
    TruncatedHeader { offset: usize },

    #[error("block at byte {offset} claims {length} bytes, only {available} remain")]
    TruncatedBlock {
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("block at byte {offset} decompresses past the block size of {block_size}")]
    BlockTooLarge { offset: usize, block_size: usize },

    #[error("zlib: {0}")]
    Zlib(std::io::Error),

    #[error("lz4: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),

    #[error("zstd: {0}")]
    Zstd(std::io::Error),
}

/// The codecs this build can read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zlib,
    Lz4,
    Zstd,
}

impl Codec {
    /// Codec for a compression kind, or `None` when it cannot be decoded here
    pub fn for_kind(kind: CompressionKind) -> Option<Codec> {
        match kind {
            CompressionKind::None => Some(Codec::None),
            CompressionKind::Zlib => Some(Codec::Zlib),
            CompressionKind::Lz4 => Some(Codec::Lz4),
            CompressionKind::Zstd => Some(Codec::Zstd),
            CompressionKind::Snappy | CompressionKind::Lzo => None,
        }
    }

    pub fn kind(self) -> CompressionKind {
        match self {
            Codec::None => CompressionKind::None,
            Codec::Zlib => CompressionKind::Zlib,
            Codec::Lz4 => CompressionKind::Lz4,
            Codec::Zstd => CompressionKind::Zstd,
        }
    }

    /// Decompress a whole region into a new buffer
    pub fn decompress(self, input: &[u8], block_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(input.len());
        self.decompress_into(input, block_size, &mut out)?;
        Ok(out)
    }

    /// Decompress a whole region, appending to `out`
    ///
    /// `out` may be a recycled buffer; its existing contents are kept.
    pub fn decompress_into(
        self,
        input: &[u8],
        block_size: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        if self == Codec::None {
            out.extend_from_slice(input);
            return Ok(());
        }

        let mut offset = 0;
        while offset < input.len() {
            let header = input
                .get(offset..offset + HEADER_SIZE)
                .ok_or(CodecError::TruncatedHeader { offset })?;
            let raw = header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
            let is_original = raw & 1 == 1;
            let length = raw >> 1;

            let start = offset + HEADER_SIZE;
            let block = input
                .get(start..start + length)
                .ok_or(CodecError::TruncatedBlock {
                    offset,
                    length,
                    available: input.len() - start,
                })?;

            if is_original {
                if length > block_size {
                    return Err(CodecError::BlockTooLarge { offset, block_size });
                }
                out.extend_from_slice(block);
            } else {
                self.decompress_block(block, block_size, out)
                    .map_err(|e| match e {
                        CodecError::BlockTooLarge { block_size, .. } => {
                            CodecError::BlockTooLarge { offset, block_size }
                        }
                        other => other,
                    })?;
            }
            offset = start + length;
        }
        Ok(())
    }

    fn decompress_block(
        self,
        block: &[u8],
        block_size: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let too_large = CodecError::BlockTooLarge { offset: 0, block_size };
        match self {
            Codec::None => out.extend_from_slice(block),
            Codec::Zlib => {
                let before = out.len();
                // one byte past the limit is enough to detect an oversized block
                let mut decoder =
                    flate2::read::DeflateDecoder::new(block).take(block_size as u64 + 1);
                decoder.read_to_end(out).map_err(CodecError::Zlib)?;
                if out.len() - before > block_size {
                    return Err(too_large);
                }
            }
            Codec::Lz4 => {
                let start = out.len();
                out.resize(start + block_size, 0);
                let written = lz4_flex::block::decompress_into(block, &mut out[start..]);
                match written {
                    Ok(n) => out.truncate(start + n),
                    Err(lz4_flex::block::DecompressError::OutputTooSmall { .. }) => {
                        out.truncate(start);
                        return Err(too_large);
                    }
                    Err(e) => {
                        out.truncate(start);
                        return Err(e.into());
                    }
                }
            }
            Codec::Zstd => {
                let decompressed =
                    zstd::bulk::decompress(block, block_size).map_err(CodecError::Zstd)?;
                out.extend_from_slice(&decompressed);
            }
        }
        Ok(())
    }

    /// Compress a region into framed blocks of at most `block_size` bytes
    pub fn compress(self, input: &[u8], block_size: usize) -> Result<Vec<u8>, CodecError> {
        if self == Codec::None {
            return Ok(input.to_vec());
        }

        let mut out = Vec::with_capacity(input.len() / 2 + HEADER_SIZE);
        for chunk in input.chunks(block_size.clamp(1, MAX_BLOCK_SIZE)) {
            let compressed = self.compress_block(chunk)?;
            if compressed.len() < chunk.len() {
                write_header(compressed.len(), false, &mut out);
                out.extend_from_slice(&compressed);
            } else {
                write_header(chunk.len(), true, &mut out);
                out.extend_from_slice(chunk);
            }
        }
        Ok(out)
    }

    fn compress_block(self, chunk: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::None => Ok(chunk.to_vec()),
            Codec::Zlib => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(chunk).map_err(CodecError::Zlib)?;
                encoder.finish().map_err(CodecError::Zlib)
            }
            Codec::Lz4 => Ok(lz4_flex::block::compress(chunk)),
            Codec::Zstd => zstd::bulk::compress(chunk, 3).map_err(CodecError::Zstd),
        }
    }
}

fn write_header(length: usize, is_original: bool, out: &mut Vec<u8>) {
    let raw = (length << 1) | is_original as usize;
    out.extend_from_slice(&[raw as u8, (raw >> 8) as u8, (raw >> 16) as u8]);
}
