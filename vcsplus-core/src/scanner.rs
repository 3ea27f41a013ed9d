//! Discovery of the PlusROM endpoint embedded in a cartridge image.
//!
//! The endpoint is stored as a zero-terminated path followed by a zero-terminated host name. Most
//! formats locate it through the NMI vector at the end of the image; the PLS format always stores
//! it at offset 0.

use crate::address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vcsplus_proc_macros::NamedVariants;

pub const MIN_HOST_LEN: usize = 3;

// URI path characters minus the query/fragment delimiters
const PATH_SEPARATORS: &[u8] = b",-./:;=+!$&'()*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, NamedVariants)]
pub enum EndpointLocation {
    /// Follow the NMI vector (minus the 0x1000 cartridge base) to the string table
    #[name = "vector"]
    VectorDerived,
    /// The string table starts at image offset 0
    #[name = "fixed"]
    FixedOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("image of {len} bytes is too small to hold an NMI vector")]
    MissingVector { len: usize },
    #[error("NMI vector points to {offset}, outside of the {len}-byte image")]
    PointerOutOfRange { offset: i32, len: usize },
    #[error("path is not zero-terminated (stopped at offset {offset})")]
    PathNotTerminated { offset: usize },
    #[error("host is not zero-terminated (stopped at offset {offset})")]
    HostNotTerminated { offset: usize },
    #[error("host '{host}' is shorter than {MIN_HOST_LEN} characters")]
    HostTooShort { host: String },
    #[error("host '{host}' contains no dot")]
    HostWithoutDot { host: String },
}

/// A validated endpoint and the request URL composed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlusEndpoint {
    host: String,
    path: String,
    url: String,
}

impl PlusEndpoint {
    #[must_use]
    pub fn new(scheme: &str, host: &str, path: &str) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            url: format!("{scheme}://{host}/{path}"),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for PlusEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

#[must_use]
pub fn is_valid_path_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || PATH_SEPARATORS.contains(&byte)
}

#[must_use]
pub fn is_valid_host_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.'
}

/// Locate and validate the endpoint string pair in `image`.
///
/// # Errors
///
/// Returns an error describing why the image does not carry a usable endpoint. This is a
/// capability check; callers treat any error as "no bridge".
pub fn scan(
    image: &[u8],
    location: EndpointLocation,
    scheme: &str,
) -> Result<PlusEndpoint, SignatureError> {
    let start = match location {
        EndpointLocation::VectorDerived => vector_target(image)?,
        EndpointLocation::FixedOffset => 0,
    };

    let (path, path_end) = take_while(image, start, is_valid_path_char);
    if image.get(path_end) != Some(&0) {
        return Err(SignatureError::PathNotTerminated { offset: path_end });
    }

    let (host, host_end) = take_while(image, path_end + 1, is_valid_host_char);
    if image.get(host_end) != Some(&0) {
        return Err(SignatureError::HostNotTerminated { offset: host_end });
    }

    if host.len() < MIN_HOST_LEN {
        return Err(SignatureError::HostTooShort { host });
    }

    // Dotless hosts would mean an API on a bare TLD or an intranet name
    if !host.contains('.') {
        return Err(SignatureError::HostWithoutDot { host });
    }

    Ok(PlusEndpoint::new(scheme, &host, &path))
}

fn vector_target(image: &[u8]) -> Result<usize, SignatureError> {
    let len = image.len();
    if len < address::NMI_VECTOR_HIGH_FROM_END + 1 {
        return Err(SignatureError::MissingVector { len });
    }

    let high_index = len - address::NMI_VECTOR_HIGH_FROM_END;
    let high = i32::from(image[high_index]);
    let low = i32::from(image[high_index - 1]);
    let offset = (high - address::NMI_VECTOR_PAGE_BIAS) * 256 + low;

    match usize::try_from(offset) {
        Ok(start) if start < len => Ok(start),
        _ => Err(SignatureError::PointerOutOfRange { offset, len }),
    }
}

fn take_while(image: &[u8], start: usize, predicate: fn(u8) -> bool) -> (String, usize) {
    let mut end = start;
    while end < image.len() && predicate(image[end]) {
        end += 1;
    }

    let text = image.get(start..end).map(|bytes| bytes.iter().map(|&b| char::from(b)).collect());
    (text.unwrap_or_default(), end)
}
