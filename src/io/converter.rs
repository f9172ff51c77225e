use crate::error::Error;

/// Reinterpret raw bytes as consecutive native-endian 32-bit floats.
///
/// Fails before producing anything when the length is not a multiple of 4.
pub fn floats_from_ne_bytes(bytes: &[u8]) -> Result<Vec<f32>, Error> {
    if bytes.len() % 4 != 0 {
        return Err(Error::MalformedSample { len: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Inverse of [`floats_from_ne_bytes`], the layout sample files are stored in.
pub fn floats_to_ne_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}
