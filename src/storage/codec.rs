//! Framed binary codec and the default object serializer.
//!
//! Every encoded value is:
//! - JSON for the payload (field order preserved)
//! - length-prefixed for framing
//! - CRC32-checked for corruption detection
//! - tagged with a codec version byte

use std::io::{Cursor, Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::object::VersionedObject;

use super::traits::ObjectSerializer;

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying StashDB files.
pub const MAGIC: [u8; 4] = *b"STSH";

/// Upper bound on a single frame (64 MiB).
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encodes a value as one frame.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {} exceeds maximum {MAX_FRAME_SIZE}", data.len()),
        ));
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Decodes one frame from a reader, verifying its checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is truncated
/// - `InvalidData` on version, size, checksum or JSON failure
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Reads and validates the file header, returning its version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

/// Default serializer: one checksummed JSON frame per object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ObjectSerializer for JsonSerializer {
    fn serialize(&self, obj: &VersionedObject) -> StoreResult<Vec<u8>> {
        encode(obj).map_err(|e| StoreError::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8], target_version: u32) -> StoreResult<VersionedObject> {
        let obj: VersionedObject = decode(&mut Cursor::new(bytes))
            .map_err(|e| StoreError::serialization(e.to_string()))?;
        if obj.version != target_version {
            return Err(StoreError::serialization(format!(
                "payload for {} is tagged v{}, record says v{target_version}",
                obj.canonical_name, obj.version
            )));
        }
        Ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as StoreErrorKind;
    use crate::object::{Fields, TypeKey, Uid};

    fn sample() -> VersionedObject {
        VersionedObject::new(
            &TypeKey::new("Dataset", 1),
            Uid::new(),
            Fields::new().with("name", "x").with("size", 3),
        )
    }

    #[test]
    fn test_frame_detects_corruption() {
        let mut encoded = encode(&"payload".to_string()).unwrap();
        encoded[7] ^= 0xFF;
        let result: IoResult<String> = decode(&mut Cursor::new(encoded));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_oversized_frame_header() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());
        let result: IoResult<String> = decode(&mut Cursor::new(bad));
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_truncated_frame_is_eof() {
        let encoded = encode(&"payload".to_string()).unwrap();
        let cut = encoded[..encoded.len() - 2].to_vec();
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);
        assert!(read_header(&mut Cursor::new(b"KYRO\x01".to_vec())).is_err());
    }

    #[test]
    fn test_serializer_preserves_field_order() {
        let obj = sample();
        let bytes = JsonSerializer.serialize(&obj).unwrap();
        let back = JsonSerializer.deserialize(&bytes, 1).unwrap();
        assert_eq!(back, obj);
        assert_eq!(back.fields.names().collect::<Vec<_>>(), vec!["name", "size"]);
    }

    #[test]
    fn test_serializer_checks_target_version() {
        let bytes = JsonSerializer.serialize(&sample()).unwrap();
        let err = JsonSerializer.deserialize(&bytes, 2).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Serialization);
    }
}
