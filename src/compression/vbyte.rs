use crate::core::error::{Error, ErrorKind, Result};

/// Variable byte encoding for integers (best for small integers)
pub struct VByteEncoder;

impl VByteEncoder {
    /// Values < 128 use 1 byte, < 16384 use 2 bytes, etc.
    pub fn encode_u64(output: &mut Vec<u8>, mut value: u64) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);  // Set continuation bit
            value >>= 7;
        }
        output.push(value as u8);  // Last byte without continuation bit
    }

    pub fn encode_u32(output: &mut Vec<u8>, value: u32) {
        Self::encode_u64(output, value as u64)
    }

    /// Decodes one value at `*pos` and advances it.
    pub fn decode_u64(input: &[u8], pos: &mut usize) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;

        while let Some(&byte) = input.get(*pos) {
            *pos += 1;
            value |= ((byte & 127) as u64) << shift;

            if byte & 128 == 0 {  // No continuation bit
                return Ok(value);
            }

            shift += 7;
            if shift > 63 {  // Max 10 bytes for u64
                return Err(Error::new(ErrorKind::Corruption, "VByte overflow".to_string()));
            }
        }

        Err(Error::new(ErrorKind::Corruption, "Incomplete VByte".to_string()))
    }

    pub fn decode_u32(input: &[u8], pos: &mut usize) -> Result<u32> {
        let value = Self::decode_u64(input, pos)?;
        u32::try_from(value)
            .map_err(|_| Error::new(ErrorKind::Corruption, format!("VByte value {} exceeds u32", value)))
    }
}
