//! Built-in leaf codecs for plain values.
//!
//! These cover the value families the crate understands out of the box;
//! richer, library-specific codecs are expected to be registered by the
//! embedding application.

use std::any::Any;
use std::io::{Read, Write};

use serde_json::Value;

use super::{Codec, CodecError};

/// Raw byte passthrough for `Vec<u8>` values.
#[derive(Debug, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn tag(&self) -> &'static str {
        "bytes"
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<Vec<u8>>()
    }

    fn encode(&mut self, value: &dyn Any, sink: &mut dyn Write) -> Result<(), CodecError> {
        let bytes = value
            .downcast_ref::<Vec<u8>>()
            .ok_or(CodecError::Unsupported)?;
        sink.write_all(bytes)?;
        Ok(())
    }

    fn decode(&mut self, source: &mut dyn Read) -> Result<Box<dyn Any>, CodecError> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        Ok(Box::new(bytes))
    }
}

/// UTF-8 text for `String` values.
#[derive(Debug, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn tag(&self) -> &'static str {
        "text"
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<String>()
    }

    fn encode(&mut self, value: &dyn Any, sink: &mut dyn Write) -> Result<(), CodecError> {
        let text = value
            .downcast_ref::<String>()
            .ok_or(CodecError::Unsupported)?;
        sink.write_all(text.as_bytes())?;
        Ok(())
    }

    fn decode(&mut self, source: &mut dyn Read) -> Result<Box<dyn Any>, CodecError> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        Ok(Box::new(String::from_utf8(bytes)?))
    }
}

/// JSON documents for [`serde_json::Value`] values.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn tag(&self) -> &'static str {
        "json"
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<Value>()
    }

    fn encode(&mut self, value: &dyn Any, sink: &mut dyn Write) -> Result<(), CodecError> {
        let document = value.downcast_ref::<Value>().ok_or(CodecError::Unsupported)?;
        serde_json::to_writer(&mut *sink, document)?;
        Ok(())
    }

    fn decode(&mut self, source: &mut dyn Read) -> Result<Box<dyn Any>, CodecError> {
        let document: Value = serde_json::from_reader(source)?;
        Ok(Box::new(document))
    }
}
