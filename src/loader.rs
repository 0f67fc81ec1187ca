//! Reading template source from disk.

use std::path::Path;

use crate::error::LoadError;

/// Read the file at `path` and decode it with `encoding`.
///
/// Encoding names are matched case-insensitively:
///
/// - `utf-8` / `utf8`: a leading byte order mark is dropped; invalid
///   sequences are a [`LoadError::Decode`].
/// - `ascii` / `us-ascii`: any byte above `0x7F` is a decode error.
/// - `latin-1` / `latin1` / `iso-8859-1`: every byte maps to the code
///   point of the same value.
///
/// Any other name is [`LoadError::UnsupportedEncoding`], reported before
/// the file is touched.
pub fn load_template_source(path: impl AsRef<Path>, encoding: &str) -> Result<String, LoadError> {
    let path = path.as_ref();
    let decoder = Encoding::parse(encoding)?;

    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let text = decoder.decode(bytes).map_err(|offset| LoadError::Decode {
        path: path.to_path_buf(),
        encoding: encoding.to_string(),
        offset,
    })?;

    tracing::debug!(
        path = %path.display(),
        encoding,
        bytes = text.len(),
        "loaded template source"
    );
    Ok(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Ascii,
    Latin1,
}

impl Encoding {
    fn parse(name: &str) -> Result<Self, LoadError> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            _ => Err(LoadError::UnsupportedEncoding {
                encoding: name.to_string(),
            }),
        }
    }

    /// Decode `bytes`, or return the offset of the first invalid byte.
    fn decode(self, bytes: Vec<u8>) -> Result<String, usize> {
        match self {
            Encoding::Utf8 => {
                let mut text = String::from_utf8(bytes).map_err(|e| e.utf8_error().valid_up_to())?;
                if text.starts_with('\u{feff}') {
                    text.drain(..'\u{feff}'.len_utf8());
                }
                Ok(text)
            }
            Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(offset),
                None => Ok(bytes.into_iter().map(char::from).collect()),
            },
            Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}
