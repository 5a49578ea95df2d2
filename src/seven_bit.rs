//! 7-bit-safe payload transcoding
//!
//! SysEx payload bytes must keep the high bit clear, so raw data is carried
//! in blocks of seven bytes: one mask byte holding the seven high bits,
//! followed by the seven low-seven-bit bytes.

/// Bytes of raw input per encoded block
const BLOCK_IN: usize = 7;

/// Bytes of encoded output per block
const BLOCK_OUT: usize = 8;

/// Encode raw bytes into the 7-bit-safe wire form.
///
/// Output length is always `ceil(data.len() / 7) * 8`. The final partial
/// block is zero-padded before encoding.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let blocks = data.len().div_ceil(BLOCK_IN);
    let mut out = Vec::with_capacity(blocks * BLOCK_OUT);

    for block in data.chunks(BLOCK_IN) {
        let mut mask = 0u8;
        for (j, &byte) in block.iter().enumerate() {
            if byte & 0x80 != 0 {
                mask |= 1 << j;
            }
        }
        out.push(mask);
        for &byte in block {
            out.push(byte & 0x7F);
        }
        // Zero-pad the last block to seven input bytes
        for _ in block.len()..BLOCK_IN {
            out.push(0);
        }
    }

    out
}

/// Decode the 7-bit-safe wire form back into raw bytes.
///
/// Produces `floor(encoded.len() / 8) * 7` bytes; trailing padding is
/// indistinguishable from real zero bytes, so the caller truncates to the
/// recorded payload length.
pub fn decode(encoded: &[u8]) -> Vec<u8> {
    let blocks = encoded.len() / BLOCK_OUT;
    let mut out = Vec::with_capacity(blocks * BLOCK_IN);

    for block in encoded.chunks_exact(BLOCK_OUT) {
        let mask = block[0];
        for j in 0..BLOCK_IN {
            let high = if mask & (1 << j) != 0 { 0x80 } else { 0 };
            out.push(high | (block[1 + j] & 0x7F));
        }
    }

    out
}
