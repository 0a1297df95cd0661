//! Length-prefixed JSON + binary envelope for the preprocess RPC.
//!
//! Wire form: ASCII decimal length of the JSON header, a literal `!`,
//! the UTF-8 JSON, then the concatenated binary sections. The JSON
//! references sections as `["buffer", start, end]` with offsets relative
//! to the start of the binary area.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::PreprocessError;

/// Reference to a binary section: `["buffer", start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRef(pub String, pub usize, pub usize);

impl BufferRef {
    /// Creates a reference covering `[start, end)`.
    pub fn new(start: usize, end: usize) -> Self {
        Self("buffer".to_string(), start, end)
    }
}

/// JSON header of a preprocess response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadHeader {
    pub has_mask: bool,
    pub has_audio: bool,
    pub has_clip: bool,
    /// Primary H.264/H.265 track.
    pub buffer: BufferRef,
    /// Alpha track, present for transparent sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_buffer: Option<BufferRef>,
}

/// Packs a header and its binary sections into the wire form.
///
/// The header's buffer references must already describe the section
/// layout produced by concatenating `sections` in order.
pub fn pack(header: &PayloadHeader, sections: &[&[u8]]) -> Result<Bytes, PreprocessError> {
    let json = serde_json::to_vec(header)
        .map_err(|e| PreprocessError::Payload(format!("header serialize failed: {e}")))?;
    let binary_len: usize = sections.iter().map(|s| s.len()).sum();

    let mut out = BytesMut::with_capacity(json.len() + binary_len + 16);
    out.put_slice(json.len().to_string().as_bytes());
    out.put_u8(b'!');
    out.put_slice(&json);
    for section in sections {
        out.put_slice(section);
    }
    Ok(out.freeze())
}

/// Builds a header plus section list for a main track and optional mask.
///
/// Returns the header with buffer references laid out back to back.
pub fn layout(
    main: &[u8],
    mask: Option<&[u8]>,
    has_audio: bool,
    has_clip: bool,
) -> PayloadHeader {
    let main_ref = BufferRef::new(0, main.len());
    let mask_ref = mask.map(|m| BufferRef::new(main.len(), main.len() + m.len()));
    PayloadHeader {
        has_mask: mask.is_some(),
        has_audio,
        has_clip,
        buffer: main_ref,
        mask_buffer: mask_ref,
    }
}

/// Unpacks a wire payload back into its header and binary area.
pub fn unpack(payload: &[u8]) -> Result<(PayloadHeader, Bytes), PreprocessError> {
    let bang = payload
        .iter()
        .position(|&b| b == b'!')
        .ok_or_else(|| PreprocessError::Payload("missing length delimiter".to_string()))?;
    let len: usize = std::str::from_utf8(&payload[..bang])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PreprocessError::Payload("bad length prefix".to_string()))?;

    let json_start = bang + 1;
    let json_end = json_start + len;
    if payload.len() < json_end {
        return Err(PreprocessError::Payload("truncated header".to_string()));
    }
    let header: PayloadHeader = serde_json::from_slice(&payload[json_start..json_end])
        .map_err(|e| PreprocessError::Payload(format!("header parse failed: {e}")))?;
    let binary = Bytes::copy_from_slice(&payload[json_end..]);

    let within = |r: &BufferRef| r.1 <= r.2 && r.2 <= binary.len();
    if !within(&header.buffer) || header.mask_buffer.as_ref().is_some_and(|r| !within(r)) {
        return Err(PreprocessError::Payload(
            "buffer reference out of bounds".to_string(),
        ));
    }
    Ok((header, binary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_exact_bytes() {
        let main = b"main-bitstream".as_slice();
        let mask = b"mask-bitstream!".as_slice();
        let header = layout(main, Some(mask), true, false);
        let wire = pack(&header, &[main, mask]).unwrap();

        let (parsed, binary) = unpack(&wire).unwrap();
        assert!(parsed.has_mask);
        assert!(parsed.has_audio);
        assert!(!parsed.has_clip);
        assert_eq!(&binary[parsed.buffer.1..parsed.buffer.2], main);
        let mask_ref = parsed.mask_buffer.unwrap();
        assert_eq!(&binary[mask_ref.1..mask_ref.2], mask);
    }

    #[test]
    fn wire_form_has_ascii_length_prefix() {
        let main = b"x".as_slice();
        let header = layout(main, None, false, false);
        let wire = pack(&header, &[main]).unwrap();
        let bang = wire.iter().position(|&b| b == b'!').unwrap();
        let len: usize = std::str::from_utf8(&wire[..bang]).unwrap().parse().unwrap();
        assert_eq!(wire.len(), bang + 1 + len + 1);
    }

    #[test]
    fn unpack_rejects_out_of_bounds_reference() {
        let header = PayloadHeader {
            has_mask: false,
            has_audio: false,
            has_clip: false,
            buffer: BufferRef::new(0, 100),
            mask_buffer: None,
        };
        let wire = pack(&header, &[b"short"]).unwrap();
        assert!(matches!(
            unpack(&wire),
            Err(PreprocessError::Payload(_))
        ));
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(unpack(b"no delimiter here").is_err());
        assert!(unpack(b"abc!{}").is_err());
    }
}
