//! Common test utilities and fixtures

#![allow(dead_code)]

pub use mountvfs_e2e::*;

use bytes::Bytes;
use futures::stream;
use mountvfs::adapter::ByteStream;
use std::fs;
use std::path::Path;

/// Create a test file with content
pub fn create_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Create a test file with string content
pub fn create_file_str(path: &Path, content: &str) -> std::io::Result<()> {
    create_file(path, content.as_bytes())
}

/// Upload body made of one chunk
pub fn body(content: &[u8]) -> ByteStream {
    Box::pin(stream::iter(vec![Ok(Bytes::copy_from_slice(content))]))
}

/// Upload body split into chunks of `chunk` bytes
pub fn chunked_body(content: &[u8], chunk: usize) -> ByteStream {
    let chunks: Vec<mountvfs::Result<Bytes>> = content
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// Deterministic test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
