//! Per-connection payload codecs.
//!
//! A [`PacketCodec`] is a reversible byte transform bound to exactly one
//! session. The dispatch core treats it as opaque: it calls
//! [`PacketCodec::decode`] on every inbound frame and [`PacketCodec::encode`]
//! on every outbound payload. Codecs may keep session-scoped key material, so
//! a [`CodecFactory`] produces a fresh instance for every accepted connection
//! and instances are never shared.

use lz4_flex::{compress_prepend_size, decompress};

use crate::error::CodecError;

/// Reversible transform between plain payloads and wire bytes.
pub trait PacketCodec: Send {
    /// Transform an outbound plain payload into wire bytes.
    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Transform inbound wire bytes back into the plain payload.
    fn decode(&mut self, wire: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Short name used in log output.
    fn name(&self) -> &'static str;
}

/// Produces one fresh codec per accepted session.
pub trait CodecFactory: Send + Sync {
    /// Create a new, independent codec instance.
    fn create(&self) -> Box<dyn PacketCodec>;
}

/// Blanket implementation for closures.
impl<F> CodecFactory for F
where
    F: Fn() -> Box<dyn PacketCodec> + Send + Sync,
{
    fn create(&self) -> Box<dyn PacketCodec> {
        self()
    }
}

// ---------------------------------------------------------------------------
// IdentityCodec
// ---------------------------------------------------------------------------

/// Pass-through codec. Wire bytes equal plain bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl PacketCodec for IdentityCodec {
    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plain.to_vec())
    }

    fn decode(&mut self, wire: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(wire.to_vec())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

// ---------------------------------------------------------------------------
// XorCodec
// ---------------------------------------------------------------------------

/// Single-byte XOR codec keyed per session.
///
/// Stands in for handshake-derived key material: each session owns its key
/// and nothing about it leaks to other sessions.
#[derive(Debug, Clone)]
pub struct XorCodec {
    key: u8,
}

impl XorCodec {
    /// Create a codec using `key` for both directions.
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    /// Replace the session key, e.g. once a handshake has agreed on one.
    pub fn rekey(&mut self, key: u8) {
        self.key = key;
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ self.key).collect()
    }
}

impl PacketCodec for XorCodec {
    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self.apply(plain))
    }

    fn decode(&mut self, wire: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self.apply(wire))
    }

    fn name(&self) -> &'static str {
        "xor"
    }
}

// ---------------------------------------------------------------------------
// Lz4Codec
// ---------------------------------------------------------------------------

/// Flag byte: payload follows uncompressed.
pub const LZ4_FLAG_NONE: u8 = 0x00;

/// Flag byte: payload is LZ4-compressed with its size prepended.
pub const LZ4_FLAG_COMPRESSED: u8 = 0x01;

/// Conditional LZ4 compression.
///
/// Payloads shorter than `threshold` go out raw behind a
/// [`LZ4_FLAG_NONE`] byte; larger ones are compressed. Inbound blocks that
/// declare a decompressed size above `max_decompressed_size` are refused
/// before any allocation happens.
#[derive(Debug, Clone)]
pub struct Lz4Codec {
    threshold: usize,
    max_decompressed_size: usize,
}

impl Lz4Codec {
    /// Create a codec that compresses payloads of at least `threshold` bytes.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            max_decompressed_size: crate::framing::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Cap the decompressed size accepted from the peer.
    pub fn with_max_decompressed_size(mut self, max: usize) -> Self {
        self.max_decompressed_size = max;
        self
    }
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PacketCodec for Lz4Codec {
    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        if plain.len() < self.threshold {
            let mut out = Vec::with_capacity(1 + plain.len());
            out.push(LZ4_FLAG_NONE);
            out.extend_from_slice(plain);
            return Ok(out);
        }
        let compressed = compress_prepend_size(plain);
        let mut out = Vec::with_capacity(1 + compressed.len());
        out.push(LZ4_FLAG_COMPRESSED);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn decode(&mut self, wire: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (flag, body) = wire
            .split_first()
            .ok_or_else(|| CodecError::Malformed("missing compression flag".into()))?;
        match *flag {
            LZ4_FLAG_NONE => Ok(body.to_vec()),
            LZ4_FLAG_COMPRESSED => {
                let (size, block) = body
                    .split_first_chunk::<4>()
                    .ok_or_else(|| CodecError::Malformed("missing size prefix".into()))?;
                let size = u32::from_le_bytes(*size) as usize;
                if size > self.max_decompressed_size {
                    return Err(CodecError::Malformed(format!(
                        "declared size {size} exceeds {}",
                        self.max_decompressed_size
                    )));
                }
                decompress(block, size).map_err(|e| CodecError::Malformed(e.to_string()))
            }
            other => Err(CodecError::Malformed(format!(
                "unknown compression flag 0x{other:02X}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payloads() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"LOGIN alice secret".to_vec(),
            vec![0x00, 0xFF, 0x7F, 0x80],
            (0..=255u8).collect(),
            vec![42u8; 4096],
        ]
    }

    #[test]
    fn test_identity_is_transparent_both_ways() {
        let mut codec = IdentityCodec;
        for payload in sample_payloads() {
            let decoded = codec.decode(&payload).unwrap();
            assert_eq!(codec.encode(&decoded).unwrap(), payload);
            let encoded = codec.encode(&payload).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), payload);
        }
    }

    #[test]
    fn test_xor_reverses_itself() {
        let mut codec = XorCodec::new(0x5A);
        for payload in sample_payloads() {
            let encoded = codec.encode(&payload).unwrap();
            if !payload.is_empty() {
                assert_ne!(encoded, payload);
            }
            assert_eq!(codec.decode(&encoded).unwrap(), payload);
        }
    }

    #[test]
    fn test_xor_keys_are_independent() {
        let mut a = XorCodec::new(0x11);
        let mut b = XorCodec::new(0x22);
        let wire = a.encode(b"walk 1 2").unwrap();
        assert_ne!(b.decode(&wire).unwrap(), b"walk 1 2");

        b.rekey(0x11);
        assert_eq!(b.decode(&wire).unwrap(), b"walk 1 2");
    }

    #[test]
    fn test_lz4_small_payload_is_not_compressed() {
        let mut codec = Lz4Codec::default();
        let wire = codec.encode(b"tiny").unwrap();
        assert_eq!(wire[0], LZ4_FLAG_NONE);
        assert_eq!(&wire[1..], b"tiny");
    }

    #[test]
    fn test_lz4_large_payload_is_compressed_and_restored() {
        let mut codec = Lz4Codec::default();
        let data = vec![7u8; 2048];
        let wire = codec.encode(&data).unwrap();
        assert_eq!(wire[0], LZ4_FLAG_COMPRESSED);
        assert!(wire.len() < data.len());
        assert_eq!(codec.decode(&wire).unwrap(), data);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let mut codec = Lz4Codec::default();
        assert!(matches!(codec.decode(&[]), Err(CodecError::Malformed(_))));
        assert!(matches!(
            codec.decode(&[0x09, 1, 2]),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode(&[LZ4_FLAG_COMPRESSED, 0x01]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_lz4_refuses_oversized_declared_length() {
        let mut codec = Lz4Codec::default().with_max_decompressed_size(1024);
        let result = codec.decode(&[LZ4_FLAG_COMPRESSED, 0xFF, 0xFF, 0xFF, 0x7F, 0x01]);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_factory_closure_creates_fresh_instances() {
        let factory = || Box::new(XorCodec::new(3)) as Box<dyn PacketCodec>;
        let mut first = factory.create();
        let second = factory.create();
        assert_eq!(first.name(), "xor");
        assert_eq!(second.name(), "xor");
        assert_eq!(first.encode(&[3]).unwrap(), vec![0]);
    }
}
