//! Wire message envelope.
//!
//! Every exchange on a channel is a [`WireMessage`]. The envelope itself is
//! always bincode; the payload inside it is encoded per the message's
//! [`Encoding`] tag, so each side reads whatever the peer chose to send
//! without prior negotiation. A payload whose length differs from
//! `payload_size` was lz4-compressed before framing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// What a message carries.
#[derive(
    Copy, Clone, Debug, PartialEq, serde_repr::Serialize_repr, serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum MessageKind {
    /// An engine request, payload is a `Request`.
    Call = 0,
    /// A successful answer, payload is a `Response`.
    Reply = 1,
    /// A failed answer, payload is an `EngineFault`.
    Fault = 2,
    /// Liveness probe, empty payload.
    Ping = 3,
    /// Liveness answer, empty payload.
    Pong = 4,
    /// Orderly shutdown notice, empty payload.
    Goodbye = 5,
}

/// Payload serialization format.
#[derive(
    Copy, Clone, Debug, PartialEq, serde_repr::Serialize_repr, serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum Encoding {
    Bincode = 0,
    #[cfg(feature = "msgpack_encoding")]
    MsgPack = 1,
    #[cfg(feature = "json_encoding")]
    Json = 2,
}

impl Default for Encoding {
    fn default() -> Self {
        Self::Bincode
    }
}

/// A single framed exchange unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub encoding: Encoding,
    /// Uncompressed payload size. Differs from `payload.len()` only when
    /// the payload is compressed.
    pub payload_size: u32,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Serializes `value` into a new message, optionally compressing it.
    pub fn pack<P>(kind: MessageKind, encoding: Encoding, value: &P, compress: bool) -> Result<Self>
    where
        P: Serialize,
    {
        let payload = encode_payload(value, encoding)?;
        let payload_size = payload.len() as u32;
        #[cfg(feature = "lz4")]
        let payload = if compress {
            lz4::block::compress(&payload, None, false)?
        } else {
            payload
        };
        #[cfg(not(feature = "lz4"))]
        let _ = compress;
        Ok(Self {
            kind,
            encoding,
            payload_size,
            payload,
        })
    }

    /// An empty control message such as a ping or goodbye.
    pub fn control(kind: MessageKind) -> Self {
        Self {
            kind,
            encoding: Encoding::default(),
            payload_size: 0,
            payload: Vec::new(),
        }
    }

    /// Deserializes the payload, decompressing first when the sizes differ.
    pub fn unpack<P>(&self) -> Result<P>
    where
        P: DeserializeOwned,
    {
        if self.payload.len() as u32 != self.payload_size {
            #[cfg(feature = "lz4")]
            {
                let bytes = lz4::block::decompress(&self.payload, Some(self.payload_size as i32))?;
                return decode_payload(&bytes, self.encoding);
            }
            #[cfg(not(feature = "lz4"))]
            return Err(Error::Protocol(
                "peer sent a compressed payload but this build carries no lz4".to_string(),
            ));
        }
        decode_payload(&self.payload, self.encoding)
    }

    /// Packs the envelope itself. The envelope is always bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn encode_payload<P>(value: &P, encoding: Encoding) -> Result<Vec<u8>>
where
    P: Serialize,
{
    match encoding {
        Encoding::Bincode => Ok(bincode::serialize(value)?),
        #[cfg(feature = "msgpack_encoding")]
        Encoding::MsgPack => {
            let mut buf = Vec::new();
            value.serialize(&mut rmp_serde::Serializer::new(&mut buf))?;
            Ok(buf)
        }
        #[cfg(feature = "json_encoding")]
        Encoding::Json => Ok(serde_json::to_vec(value)?),
    }
}

fn decode_payload<P>(bytes: &[u8], encoding: Encoding) -> Result<P>
where
    P: DeserializeOwned,
{
    match encoding {
        Encoding::Bincode => Ok(bincode::deserialize(bytes)?),
        #[cfg(feature = "msgpack_encoding")]
        Encoding::MsgPack => Ok(rmp_serde::from_read_ref(bytes)?),
        #[cfg(feature = "json_encoding")]
        Encoding::Json => Ok(serde_json::from_slice(bytes)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<f64>,
    }

    fn sample() -> Sample {
        Sample {
            name: "displacement".to_string(),
            values: (0..256).map(|i| i as f64 * 0.5).collect(),
        }
    }

    #[test]
    fn pack_unpack_round_trip() {
        let msg =
            WireMessage::pack(MessageKind::Call, Encoding::Bincode, &sample(), false).unwrap();
        assert_eq!(msg.payload_size as usize, msg.payload.len());
        let back: Sample = msg.unpack().unwrap();
        assert_eq!(back, sample());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn compressed_payloads_decompress_transparently() {
        let msg = WireMessage::pack(MessageKind::Reply, Encoding::Bincode, &sample(), true).unwrap();
        assert_ne!(msg.payload_size as usize, msg.payload.len());
        let bytes = msg.to_bytes().unwrap();
        let back: Sample = WireMessage::from_bytes(&bytes).unwrap().unpack().unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn control_messages_carry_nothing() {
        let msg = WireMessage::control(MessageKind::Ping);
        assert!(msg.payload.is_empty());
        assert_eq!(msg.payload_size, 0);
    }
}
