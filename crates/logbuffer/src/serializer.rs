//! Serializer Registry
//!
//! Maps a non-zero type tag to an encoder and decoder for one concrete
//! Rust type. The log buffer consults the registry on typed writes and
//! typed scans; raw records (tag 0) never touch it.
//!
//! Registration is a tagged-variant scheme rather than a class hierarchy:
//! every tag names exactly one type, and a typed scan is a tag filter.
//!
//! ## Example
//!
//! ```ignore
//! let mut registry = SerializerRegistry::new();
//! registry.register::<Order>(
//!     123,
//!     |order| serde_json::to_vec(order).expect("serializable"),
//!     |bytes| serde_json::from_slice(bytes).map_err(Into::into),
//! );
//! let buffer = LogBuffer::open_with_serializers(config, registry)?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use logbuffer_core::RAW_TYPE;

use crate::error::{BoxError, Error, Result};

type EncodeFn = Box<dyn Fn(&dyn Any) -> Option<Vec<u8>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> std::result::Result<Box<dyn Any + Send>, BoxError> + Send + Sync>;

struct RegisteredType {
    type_id: TypeId,
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Registry of `tag <-> (type, encoder, decoder)` bindings.
#[derive(Default)]
pub struct SerializerRegistry {
    by_tag: HashMap<u64, RegisteredType>,
    by_type: HashMap<TypeId, u64>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `tag` to type `T` with its encoder and decoder.
    ///
    /// # Panics
    ///
    /// Tag 0 is reserved for raw records, and both tags and types must be
    /// unique; violating either is a programmer error and panics.
    pub fn register<T, E, D>(&mut self, tag: u64, encode: E, decode: D) -> &mut Self
    where
        T: Any + Send,
        E: Fn(&T) -> Vec<u8> + Send + Sync + 'static,
        D: Fn(&[u8]) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let type_id = TypeId::of::<T>();
        assert!(tag != RAW_TYPE, "type tag 0 is reserved for raw records");
        assert!(
            !self.by_tag.contains_key(&tag),
            "type tag {tag} is already registered"
        );
        assert!(
            !self.by_type.contains_key(&type_id),
            "{type_name} is already registered"
        );

        self.by_tag.insert(
            tag,
            RegisteredType {
                type_id,
                type_name,
                encode: Box::new(move |value| value.downcast_ref::<T>().map(&encode)),
                decode: Box::new(move |bytes| {
                    decode(bytes).map(|value| Box::new(value) as Box<dyn Any + Send>)
                }),
            },
        );
        self.by_type.insert(type_id, tag);
        self
    }

    /// Tag registered for `T`, if any.
    pub fn tag_of<T: Any>(&self) -> Option<u64> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn contains_tag(&self, tag: u64) -> bool {
        self.by_tag.contains_key(&tag)
    }

    /// Name of the type registered for `tag`, if any.
    pub fn type_name(&self, tag: u64) -> Option<&'static str> {
        self.by_tag.get(&tag).map(|entry| entry.type_name)
    }

    pub(crate) fn type_id(&self, tag: u64) -> Option<TypeId> {
        self.by_tag.get(&tag).map(|entry| entry.type_id)
    }

    /// Encodes `value`, returning its tag and payload bytes.
    pub(crate) fn encode_value<T: Any>(&self, value: &T) -> Result<(u64, Vec<u8>)> {
        let no_encoder = || Error::NoEncoder {
            type_name: std::any::type_name::<T>(),
        };
        let tag = *self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or_else(no_encoder)?;
        let entry = self.by_tag.get(&tag).ok_or_else(no_encoder)?;
        let bytes = (entry.encode)(value).ok_or_else(no_encoder)?;
        Ok((tag, bytes))
    }

    /// Decodes a payload written with `tag` into `T`.
    pub(crate) fn decode_to<T: Any>(&self, tag: u64, bytes: &[u8]) -> Result<T> {
        let entry = self.by_tag.get(&tag).ok_or(Error::NoDecoder { tag })?;
        let boxed = (entry.decode)(bytes).map_err(|source| Error::Decode { tag, source })?;
        match boxed.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(Error::NoDecoder { tag }),
        }
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (tag, entry) in &self.by_tag {
            map.entry(tag, &entry.type_name);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Click {
        url: String,
    }

    fn registry() -> SerializerRegistry {
        let mut registry = SerializerRegistry::new();
        registry.register::<Order, _, _>(
            123,
            |order| serde_json::to_vec(order).expect("serializable"),
            |bytes| serde_json::from_slice(bytes).map_err(Into::into),
        );
        registry.register::<Click, _, _>(
            124,
            |click| serde_json::to_vec(click).expect("serializable"),
            |bytes| serde_json::from_slice(bytes).map_err(Into::into),
        );
        registry
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let registry = registry();
        let order = Order { id: 9 };

        let (tag, bytes) = registry.encode_value(&order).unwrap();
        assert_eq!(tag, 123);

        let back: Order = registry.decode_to(tag, &bytes).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_tag_lookup() {
        let registry = registry();
        assert_eq!(registry.tag_of::<Order>(), Some(123));
        assert_eq!(registry.tag_of::<Click>(), Some(124));
        assert_eq!(registry.tag_of::<String>(), None);
        assert!(registry.contains_tag(123));
        assert!(!registry.contains_tag(99));
    }

    #[test]
    fn test_type_name() {
        let registry = registry();
        assert!(registry.type_name(123).unwrap().ends_with("Order"));
        assert_eq!(registry.type_name(99), None);
    }

    #[test]
    fn test_unregistered_type_is_no_encoder() {
        let registry = registry();
        let err = registry.encode_value(&"plain string").unwrap_err();
        assert!(matches!(err, Error::NoEncoder { .. }));
    }

    #[test]
    fn test_unknown_tag_is_no_decoder() {
        let registry = registry();
        let err = registry.decode_to::<Order>(99, b"{}").unwrap_err();
        assert!(matches!(err, Error::NoDecoder { tag: 99 }));
    }

    #[test]
    fn test_decoder_failure_is_decode_error() {
        let registry = registry();
        let err = registry.decode_to::<Order>(123, b"not json").unwrap_err();
        assert!(matches!(err, Error::Decode { tag: 123, .. }));
    }

    #[test]
    #[should_panic(expected = "reserved for raw records")]
    fn test_tag_zero_rejected() {
        let mut registry = SerializerRegistry::new();
        registry.register::<Order, _, _>(0, |_| vec![], |_| Ok(Order { id: 0 }));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_tag_rejected() {
        let mut registry = SerializerRegistry::new();
        registry.register::<Order, _, _>(1, |_| vec![], |_| Ok(Order { id: 0 }));
        registry.register::<Click, _, _>(1, |_| vec![], |_| {
            Ok(Click {
                url: String::new(),
            })
        });
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_type_rejected() {
        let mut registry = SerializerRegistry::new();
        registry.register::<Order, _, _>(1, |_| vec![], |_| Ok(Order { id: 0 }));
        registry.register::<Order, _, _>(2, |_| vec![], |_| Ok(Order { id: 0 }));
    }
}
