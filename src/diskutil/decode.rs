/*! Decoding `diskutil`'s property list output

`diskutil` legitimately prints nothing for some disks, so empty output decodes to an empty record instead of
an error.
*/
use std::{
    io::Cursor,
    panic::{catch_unwind, AssertUnwindSafe},
};

use serde::de::DeserializeOwned;

use super::types::{DiskInfo, SystemPartitions};

/// Malformed property list output
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Decoding {kind} property list")]
    Plist {
        kind: &'static str,
        #[source]
        source: plist::Error,
    },
    #[error("Property list parser panicked while decoding {kind}: {message}")]
    Panicked { kind: &'static str, message: String },
}

pub fn decode_disk_info(raw: &[u8]) -> Result<DiskInfo, DecodeError> {
    decode("disk info", raw)
}

pub fn decode_system_partitions(raw: &[u8]) -> Result<SystemPartitions, DecodeError> {
    decode("disk list", raw)
}

/// Decode a property list into `T`, treating empty input as `T::default()`
///
/// Parser panics are caught and reported as [`DecodeError::Panicked`].
#[tracing::instrument(level = "trace", skip(raw), fields(len = raw.len()))]
pub(crate) fn decode<T>(kind: &'static str, raw: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Default,
{
    if raw.iter().all(u8::is_ascii_whitespace) {
        tracing::trace!("Empty input");
        return Ok(T::default());
    }

    let decoded = catch_unwind(AssertUnwindSafe(|| -> Result<T, plist::Error> {
        plist::from_reader(Cursor::new(raw))
    }))
    .map_err(|panic| DecodeError::Panicked {
        kind,
        message: panic_message(panic.as_ref()),
    })?;

    decoded.map_err(|source| DecodeError::Plist { kind, source })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".into()
    }
}
