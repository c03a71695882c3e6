//! Tokio codec for framing packets over a byte stream.
//!
//! Wraps [`Packet::decode`] / [`Packet::encode`] so a `Framed` stream can
//! speak the protocol directly. An incomplete packet maps to `Ok(None)`, the
//! way `tokio_util` expects "wait for more bytes" to be signalled.

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec {
    compression: CompressionKind,
}

impl PacketCodec {
    pub fn new(compression: CompressionKind) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> CompressionKind {
        self.compression
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match Packet::decode(src, self.compression) {
            Ok((packet, used)) => {
                src.advance(used);
                Ok(Some(packet))
            }
            Err(ProtocolError::NeedMoreData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let bytes = item.encode(self.compression)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::BadLoginReason;

    #[test]
    fn test_decoder_waits_for_split_packet() {
        let mut codec = PacketCodec::default();
        let bytes = Packet::StartLogin {
            username: "dave".into(),
        }
        .encode(CompressionKind::Zlib)
        .unwrap();

        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&bytes[5..]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.packet_type(), crate::core::packet::PacketType::StartLogin);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_drains_back_to_back_packets() {
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Packet::KeepAlive, &mut buf).unwrap();
        codec
            .encode(
                Packet::BadLogin {
                    reason: BadLoginReason::General,
                },
                &mut buf,
            )
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::KeepAlive));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::BadLogin { .. })
        ));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decoder_surfaces_corruption() {
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::from(&[200u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Corrupt(_))
        ));
    }
}
