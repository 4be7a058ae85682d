//! Key/value serializer plug-ins (`key_serializer` / `value_serializer`).
//!
//! Out of scope as a design ("plug-in functions `value → bytes`");
//! the crate ships pass-through conversions for the common byte-ish types as
//! the default, exactly as `aiokafka`'s `_serialize` falls back to the raw
//! value when no serializer is configured (see
//! `examples/original_source/aiokafka/producer.py`).
//!
//! Rather than storing a serializer callable per [`crate::producer::Producer`]
//! instance, serialization is expressed as a trait implemented on the
//! caller's key/value type, resolved at the `send` call site. A custom
//! "serializer" is simply a newtype implementing [`ToBytes`] (e.g. wrapping
//! `serde_json::Value`), which keeps `Producer::send` generic without
//! needing a type-erased `Arc<dyn Fn(..)>` slot per producer.

/// Converts an owned application-level value into the bytes placed on the
/// wire.
pub trait ToBytes {
    fn to_bytes(self) -> Vec<u8>;
}

impl ToBytes for Vec<u8> {
    fn to_bytes(self) -> Vec<u8> {
        self
    }
}

impl ToBytes for &[u8] {
    fn to_bytes(self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToBytes for String {
    fn to_bytes(self) -> Vec<u8> {
        self.into_bytes()
    }
}

impl ToBytes for &str {
    fn to_bytes(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}
