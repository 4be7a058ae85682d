//! Full-batch compression, selected by name via `compression_type`.
//!
//! One real codec crate per Cargo feature (`compression-gzip`,
//! `compression-lz4`, `compression-snappy`), so enabling or disabling a
//! codec at compile time drops its dependency entirely.

use std::io::Write;

use crate::error::ConfigError;

/// The compression codec applied to a sealed batch's encoded bytes before it
/// is placed in a produce request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
        }
    }

    pub fn parse(name: Option<&str>) -> Result<Self, ConfigError> {
        match name {
            None => Ok(Compression::None),
            Some("gzip") => Ok(Compression::Gzip),
            Some("snappy") => Ok(Compression::Snappy),
            Some("lz4") => Ok(Compression::Lz4),
            Some(other) => Err(ConfigError::InvalidCompressionType(other.to_owned())),
        }
    }

    /// `lz4` is only valid from broker protocol 0.8.2 onward.
    pub fn min_api_version(self) -> Option<(u16, u16, u16)> {
        match self {
            Compression::Lz4 => Some((0, 8, 2)),
            _ => None,
        }
    }

    /// Compress `input` in place, returning the codec's framed bytes.
    ///
    /// `Compression::None` is a zero-copy passthrough; the real codecs
    /// (`flate2`/`lz4`/`snap`) are only linked in when their Cargo feature
    /// is enabled.
    pub fn compress(self, input: &[u8]) -> Vec<u8> {
        match self {
            Compression::None => input.to_vec(),
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(input).expect("in-memory writer");
                encoder.finish().expect("in-memory writer")
            }
            #[cfg(not(feature = "compression-gzip"))]
            Compression::Gzip => panic!("compression-gzip feature not enabled"),
            #[cfg(feature = "compression-snappy")]
            Compression::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(Vec::new());
                encoder.write_all(input).expect("in-memory writer");
                encoder.into_inner().expect("in-memory writer")
            }
            #[cfg(not(feature = "compression-snappy"))]
            Compression::Snappy => panic!("compression-snappy feature not enabled"),
            #[cfg(feature = "compression-lz4")]
            Compression::Lz4 => {
                let mut encoder = lz4::EncoderBuilder::new()
                    .build(Vec::new())
                    .expect("in-memory writer");
                encoder.write_all(input).expect("in-memory writer");
                let (buf, result) = encoder.finish();
                result.expect("lz4 encode");
                buf
            }
            #[cfg(not(feature = "compression-lz4"))]
            Compression::Lz4 => panic!("compression-lz4 feature not enabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_passthrough() {
        let data = b"hello kafka".to_vec();
        assert_eq!(Compression::None.compress(&data), data);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(Compression::parse(Some("zstd")).is_err());
        assert_eq!(Compression::parse(None).unwrap(), Compression::None);
    }

    #[test]
    fn lz4_requires_newer_api() {
        assert_eq!(Compression::Lz4.min_api_version(), Some((0, 8, 2)));
        assert_eq!(Compression::None.min_api_version(), None);
    }
}
