//! Request and response shapes for the transport
//!
//! The transport (HTTP or otherwise) maps each call onto a [`Method`], parses
//! the method's fixed argument shape into a [`Request`] and hands it to
//! [`Filesystem::handle`](crate::Filesystem::handle) together with the caller.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::adapter::ByteStream;
use crate::auth::User;
use crate::error::{Result, VfsError};

/// Transport verb a method is served under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

/// Every operation the VFS exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Capabilities,
    Readdir,
    Readfile,
    Writefile,
    Copy,
    Rename,
    Mkdir,
    Unlink,
    Exists,
    Stat,
    Url,
    Search,
    Touch,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::Capabilities,
        Method::Readdir,
        Method::Readfile,
        Method::Writefile,
        Method::Copy,
        Method::Rename,
        Method::Mkdir,
        Method::Unlink,
        Method::Exists,
        Method::Stat,
        Method::Url,
        Method::Search,
        Method::Touch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Capabilities => "capabilities",
            Method::Readdir => "readdir",
            Method::Readfile => "readfile",
            Method::Writefile => "writefile",
            Method::Copy => "copy",
            Method::Rename => "rename",
            Method::Mkdir => "mkdir",
            Method::Unlink => "unlink",
            Method::Exists => "exists",
            Method::Stat => "stat",
            Method::Url => "url",
            Method::Search => "search",
            Method::Touch => "touch",
        }
    }

    pub fn verb(&self) -> Verb {
        match self {
            Method::Capabilities
            | Method::Exists
            | Method::Stat
            | Method::Readdir
            | Method::Readfile
            | Method::Url => Verb::Get,
            _ => Verb::Post,
        }
    }

    /// Whether the method writes to its (destination) mountpoint
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Method::Writefile
                | Method::Mkdir
                | Method::Unlink
                | Method::Touch
                | Method::Rename
                | Method::Copy
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| VfsError::InvalidArgument(format!("Unknown method: {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Raw `Range` header value, e.g. `bytes=0-99`
    pub range: Option<String>,
    /// Serve as an attachment
    pub download: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MkdirOptions {
    /// Succeed when the directory already exists
    pub ensure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Replace an existing file (directories are never replaced)
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

/// A parsed call with its method-specific arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Capabilities { path: String },
    Readdir { path: String },
    Readfile { path: String, options: ReadOptions },
    Copy { from: String, to: String },
    Rename { from: String, to: String },
    Mkdir { path: String, options: MkdirOptions },
    Unlink { path: String },
    Exists { path: String },
    Stat { path: String },
    Url { path: String },
    Search { root: String, pattern: String },
    Touch { path: String },
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct PathWithOptions<O> {
    path: String,
    #[serde(default)]
    options: O,
}

#[derive(Deserialize)]
struct FromToArgs {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    root: String,
    pattern: String,
}

fn args<T: DeserializeOwned>(method: Method, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| VfsError::InvalidArgument(format!("Bad arguments for {}: {}", method, e)))
}

impl Request {
    /// Parse the fixed argument shape of `method` from a JSON object
    /// (query parameters for GET, body for POST).
    pub fn from_json(method: Method, value: serde_json::Value) -> Result<Self> {
        Ok(match method {
            Method::Capabilities => Request::Capabilities {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Readdir => Request::Readdir {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Readfile => {
                let a: PathWithOptions<ReadOptions> = args(method, value)?;
                Request::Readfile {
                    path: a.path,
                    options: a.options,
                }
            }
            Method::Writefile => {
                return Err(VfsError::InvalidArgument(
                    "writefile requires a multipart upload".to_string(),
                ))
            }
            Method::Copy => {
                let a: FromToArgs = args(method, value)?;
                Request::Copy {
                    from: a.from,
                    to: a.to,
                }
            }
            Method::Rename => {
                let a: FromToArgs = args(method, value)?;
                Request::Rename {
                    from: a.from,
                    to: a.to,
                }
            }
            Method::Mkdir => {
                let a: PathWithOptions<MkdirOptions> = args(method, value)?;
                Request::Mkdir {
                    path: a.path,
                    options: a.options,
                }
            }
            Method::Unlink => Request::Unlink {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Exists => Request::Exists {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Stat => Request::Stat {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Url => Request::Url {
                path: args::<PathArgs>(method, value)?.path,
            },
            Method::Search => {
                let a: SearchArgs = args(method, value)?;
                Request::Search {
                    root: a.root,
                    pattern: a.pattern,
                }
            }
            Method::Touch => Request::Touch {
                path: args::<PathArgs>(method, value)?.path,
            },
        })
    }

    pub fn method(&self) -> Method {
        match self {
            Request::Capabilities { .. } => Method::Capabilities,
            Request::Readdir { .. } => Method::Readdir,
            Request::Readfile { .. } => Method::Readfile,
            Request::Copy { .. } => Method::Copy,
            Request::Rename { .. } => Method::Rename,
            Request::Mkdir { .. } => Method::Mkdir,
            Request::Unlink { .. } => Method::Unlink,
            Request::Exists { .. } => Method::Exists,
            Request::Stat { .. } => Method::Stat,
            Request::Url { .. } => Method::Url,
            Request::Search { .. } => Method::Search,
            Request::Touch { .. } => Method::Touch,
        }
    }
}

/// One call in flight: what to do and on whose behalf. Never stored.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub request: Request,
    pub user: User,
}

impl RequestEnvelope {
    pub fn new(request: Request, user: User) -> Self {
        Self { request, user }
    }

    pub fn method(&self) -> Method {
        self.request.method()
    }
}

/// Multipart `writefile` payload
pub struct WriteUpload {
    pub path: String,
    pub options: WriteOptions,
    pub upload: ByteStream,
}

impl WriteUpload {
    /// Build from the multipart fields `path`, `options` (a JSON string) and `upload`
    pub fn from_fields(path: &str, options: Option<&str>, upload: ByteStream) -> Result<Self> {
        let options = match options.map(str::trim) {
            None | Some("") => WriteOptions::default(),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| VfsError::InvalidArgument(format!("Bad writefile options: {}", e)))?,
        };
        Ok(Self {
            path: path.to_string(),
            options,
            upload,
        })
    }
}

/// Inclusive byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered. Never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parse a `Range` header against a file of `size` bytes.
    ///
    /// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. Only the first range
    /// of a multi-range header is honored. The end is clamped to the file.
    /// A header that is malformed or uses another unit yields `None` and the
    /// whole file is served; a well-formed range that misses the file fails
    /// with `RangeNotSatisfiable`.
    pub fn parse(header: &str, size: u64) -> Result<Option<Self>> {
        let Some(spec) = header.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        let first = spec.split(',').next().unwrap_or_default().trim();
        let Some((start, end)) = first.split_once('-') else {
            return Ok(None);
        };

        let unsatisfiable = || VfsError::RangeNotSatisfiable(format!("{} for {} bytes", header, size));

        match (start.trim(), end.trim()) {
            ("", "") => Ok(None),
            ("", suffix) => {
                let Ok(n) = suffix.parse::<u64>() else {
                    return Ok(None);
                };
                if n == 0 || size == 0 {
                    return Err(unsatisfiable());
                }
                Ok(Some(ByteRange::new(size.saturating_sub(n), size - 1)))
            }
            (start, end) => {
                let Ok(start) = start.parse::<u64>() else {
                    return Ok(None);
                };
                let end = if end.is_empty() {
                    None
                } else {
                    match end.parse::<u64>() {
                        Ok(end) if end >= start => Some(end),
                        _ => return Ok(None),
                    }
                };
                if start >= size {
                    return Err(unsatisfiable());
                }
                let last = size - 1;
                Ok(Some(ByteRange::new(start, end.map_or(last, |e| e.min(last)))))
            }
        }
    }

    /// `Content-Range` header value
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// `Content-Disposition` for downloads, RFC 5987 encoded
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename*=utf-8''{}", encode_rfc5987(filename))
}

fn encode_rfc5987(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Streamed file body with status and headers
pub struct FileResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl FileResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for FileResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Result of a dispatched call
#[derive(Debug)]
pub enum Response {
    /// Small structured payload
    Json(serde_json::Value),
    /// File body streamed to the transport
    File(FileResponse),
}
