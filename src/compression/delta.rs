use crate::compression::vbyte::VByteEncoder;
use crate::core::error::{Error, ErrorKind, Result};

/// Delta encoding for strictly increasing integers (doc ids, node ordinals)
pub struct DeltaEncoder;

impl DeltaEncoder {
    /// Writes the count followed by the gaps between consecutive values.
    pub fn encode_sorted(output: &mut Vec<u8>, values: &[u64]) -> Result<()> {
        VByteEncoder::encode_u64(output, values.len() as u64);
        let mut prev = 0u64;
        for (i, &value) in values.iter().enumerate() {
            if i > 0 && value <= prev {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("delta input not strictly increasing at index {}", i),
                ));
            }
            VByteEncoder::encode_u64(output, value - prev);
            prev = value;
        }
        Ok(())
    }

    pub fn decode_sorted(input: &[u8], pos: &mut usize) -> Result<Vec<u64>> {
        let count = VByteEncoder::decode_u64(input, pos)? as usize;
        if count > input.len().saturating_sub(*pos) {
            return Err(Error::new(ErrorKind::Corruption, "delta block count exceeds input".to_string()));
        }
        let mut values = Vec::with_capacity(count);
        let mut prev = 0u64;
        for i in 0..count {
            let gap = VByteEncoder::decode_u64(input, pos)?;
            if i > 0 && gap == 0 {
                return Err(Error::new(ErrorKind::Corruption, "zero gap in delta block".to_string()));
            }
            prev = prev.checked_add(gap)
                .ok_or_else(|| Error::new(ErrorKind::Corruption, "delta overflow".to_string()))?;
            values.push(prev);
        }
        Ok(values)
    }
}
