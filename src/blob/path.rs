//! Path encoding
//!
//! Namespaces and keys are arbitrary bytes; on disk they are spelled with a
//! lowercase base-32 alphabet without padding so every name is a valid,
//! case-insensitive file name. An empty component is spelled `_`, which is
//! outside the alphabet.
//!
//! ```text
//!   packed single-piece file:  {ns}/{key}.sj1         (generation 0)
//!                              {ns}/{key}.{gen}.sj1   (name was taken)
//!   legacy one-file layout:    {ns}/{key[..2]}/{key[2..]}.sj1
//! ```

use std::path::{Path, PathBuf};

use data_encoding::BASE32_NOPAD;

use crate::error::{Result, StoreError};

use super::BlobRef;

/// Spelling of an empty namespace or key
const EMPTY_COMPONENT: &str = "_";

/// Characters of the key used for the legacy prefix directory
const LEGACY_PREFIX_LEN: usize = 2;

/// Encode bytes as unpadded lowercase base-32
pub fn encode(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data).to_ascii_lowercase()
}

/// Decode unpadded lowercase base-32
pub fn decode(text: &str) -> Result<Vec<u8>> {
    if text.bytes().any(|c| c.is_ascii_uppercase()) {
        return Err(StoreError::InvalidPath(format!(
            "base32 names are lowercase: {text}"
        )));
    }
    BASE32_NOPAD
        .decode(text.to_ascii_uppercase().as_bytes())
        .map_err(|e| StoreError::InvalidPath(format!("invalid base32 name {text}: {e}")))
}

/// Encode one namespace or key as a path component (never empty)
pub fn encode_component(data: &[u8]) -> String {
    if data.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        encode(data)
    }
}

/// Inverse of `encode_component`
pub fn decode_component(text: &str) -> Result<Vec<u8>> {
    match text {
        EMPTY_COMPONENT => Ok(Vec::new()),
        "" => Err(StoreError::InvalidPath("empty path component".to_string())),
        _ => decode(text),
    }
}

/// Relative name of the file a writer allocates for `blob`.
///
/// Generation 0 is the stable name; higher generations are only used when
/// an older file of the same name is still on disk.
pub fn piece_file_name(blob: &BlobRef, ext: &str, generation: u32) -> String {
    let ns = encode_component(&blob.namespace);
    let key = encode_component(&blob.key);
    match generation {
        0 => format!("{ns}/{key}.{ext}"),
        n => format!("{ns}/{key}.{n}.{ext}"),
    }
}

/// Path of a piece relative to a legacy store's blob directory
pub fn legacy_relative_path(blob: &BlobRef, ext: &str) -> PathBuf {
    let key = encode_component(&blob.key);
    let (prefix, rest) = key.split_at(key.len().min(LEGACY_PREFIX_LEN));
    PathBuf::from(encode_component(&blob.namespace))
        .join(prefix)
        .join(format!("{rest}.{ext}"))
}

/// Recover the ref from a legacy path (`{ns}/{prefix}/{rest}.{ext}`, relative)
pub fn parse_legacy_path(relative: &Path, ext: &str) -> Result<BlobRef> {
    let invalid = || StoreError::InvalidPath(relative.display().to_string());

    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str().ok_or_else(invalid))
        .collect::<Result<_>>()?;
    let [ns, prefix, file] = parts.as_slice() else {
        return Err(invalid());
    };

    let rest = file
        .strip_suffix(ext)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(invalid)?;

    Ok(BlobRef::new(
        decode_component(ns)?,
        decode_component(&format!("{prefix}{rest}"))?,
    ))
}

/// Join a relative name onto the store root, refusing anything that escapes it
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    let normal = candidate
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if relative.is_empty() || !normal {
        return Err(StoreError::InvalidPath(format!(
            "not a plain relative path: {relative}"
        )));
    }
    Ok(root.join(candidate))
}
