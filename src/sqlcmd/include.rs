//! Reading script files for `-i` and `:R`

use std::path::Path;

use encoding_rs::{Encoding, WINDOWS_1252};

use crate::error::SqlcmdError;

/// Read a script file as text.
///
/// A byte order mark selects UTF-8 or UTF-16 and is dropped. Without one the
/// file must be UTF-8, else it is decoded as Windows-1252, which is common
/// for scripts saved on Windows.
pub fn read_script(path: &Path) -> Result<String, SqlcmdError> {
    let bytes = std::fs::read(path).map_err(|e| SqlcmdError::file(path, e))?;
    decode_script(bytes).map_err(|e| SqlcmdError::file(path, e))
}

fn decode_script(bytes: Vec<u8>) -> std::io::Result<String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(&bytes) {
        let (decoded, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(invalid_data());
        }
        return Ok(decoded.into_owned());
    }

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(err) => {
            let (decoded, _, had_errors) = WINDOWS_1252.decode(err.as_bytes());
            if had_errors {
                Err(invalid_data())
            } else {
                Ok(decoded.into_owned())
            }
        }
    }
}

fn invalid_data() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "File contains invalid characters",
    )
}
