//! Message Channel: packets in, frames out, and back.
//!
//! Every `send` builds a new encoder over a new buffer and every `receive`
//! builds a new decoder over exactly one frame payload. Encoders and
//! decoders never outlive a single message, so equal-but-distinct values
//! sent in succession always decode independently.

use std::io::{Read, Write};

use pairwire_transport::Stream;
use serde::{Deserialize, Serialize};

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::message::Packet;
use crate::reader::{transport_to_frame_error, FrameReader};
use crate::writer::FrameWriter;

/// Outbound half of a message channel.
pub struct ChannelSender<W> {
    writer: FrameWriter<W>,
}

impl<W: Write> ChannelSender<W> {
    pub fn new(inner: W, config: FrameConfig) -> Self {
        Self {
            writer: FrameWriter::with_config(inner, config),
        }
    }

    /// Encode `packet` as one self-contained frame, write it and flush.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let mut payload = Vec::with_capacity(128);
        {
            let mut encoder = serde_json::Serializer::new(&mut payload);
            packet.serialize(&mut encoder).map_err(FrameError::Encode)?;
        }
        self.writer.send(&payload)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Inbound half of a message channel.
pub struct ChannelReceiver<R> {
    reader: FrameReader<R>,
}

impl<R: Read> ChannelReceiver<R> {
    pub fn new(inner: R, config: FrameConfig) -> Self {
        Self {
            reader: FrameReader::with_config(inner, config),
        }
    }

    /// Blocking read of exactly one packet.
    ///
    /// The payload must hold one complete packet and nothing else.
    pub fn receive(&mut self) -> Result<Packet> {
        let frame = self.reader.read_frame()?;
        let mut decoder = serde_json::Deserializer::from_slice(&frame.payload);
        let packet = Packet::deserialize(&mut decoder).map_err(FrameError::Decode)?;
        decoder.end().map_err(FrameError::Decode)?;
        Ok(packet)
    }

    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

/// Both halves of a channel over one transport stream.
pub struct MessageChannel {
    sender: ChannelSender<Stream>,
    receiver: ChannelReceiver<Stream>,
}

impl MessageChannel {
    /// Wrap `stream`, applying timeouts from `config`. The read half uses a
    /// cloned descriptor so the halves can live on different threads.
    pub fn open(stream: Stream, config: FrameConfig) -> Result<Self> {
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        let read_half = stream.try_clone().map_err(transport_to_frame_error)?;

        Ok(Self {
            sender: ChannelSender::new(stream, config.clone()),
            receiver: ChannelReceiver::new(read_half, config),
        })
    }

    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        self.sender.send(packet)
    }

    pub fn receive(&mut self) -> Result<Packet> {
        self.receiver.receive()
    }

    pub fn split(self) -> (ChannelSender<Stream>, ChannelReceiver<Stream>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use serde_json::json;

    use super::*;
    use crate::codec::encode_frame;
    use crate::message::{DisconnectSignal, Message};

    fn wire_of(packets: &[Packet]) -> Vec<u8> {
        let mut sender = ChannelSender::new(Cursor::new(Vec::new()), FrameConfig::default());
        for packet in packets {
            sender.send(packet).unwrap();
        }
        sender.into_inner().into_inner()
    }

    #[test]
    fn repeated_equal_values_decode_independently() {
        let shared = json!({"name": "tile", "pos": [1, 2]});
        let first = Packet::Value(json!({"a": shared.clone(), "b": shared.clone()}));
        let mut second_inner = shared.clone();
        second_inner["pos"] = json!([9, 9]);
        let second = Packet::Value(json!({"a": second_inner.clone(), "b": second_inner}));

        let wire = wire_of(&[first.clone(), second.clone(), first.clone()]);
        let mut receiver = ChannelReceiver::new(Cursor::new(wire), FrameConfig::default());

        assert_eq!(receiver.receive().unwrap(), first);
        assert_eq!(receiver.receive().unwrap(), second);
        assert_eq!(receiver.receive().unwrap(), first);
        assert!(matches!(
            receiver.receive(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn every_packet_kind_survives_the_channel() {
        let packets = vec![
            Packet::from(Message::value(json!([1, null, "x"]))),
            Packet::from(Message::routed("chat", json!({"text": "hello"}))),
            Packet::from(DisconnectSignal::NOTICE),
            Packet::from(DisconnectSignal::ACK),
        ];
        let wire = wire_of(&packets);
        let mut receiver = ChannelReceiver::new(Cursor::new(wire), FrameConfig::default());
        for expected in packets {
            assert_eq!(receiver.receive().unwrap(), expected);
        }
    }

    #[test]
    fn unknown_type_is_decode_error() {
        let mut wire = BytesMut::new();
        encode_frame(br#"{"type":"mystery","body":1}"#, &mut wire).unwrap();
        let mut receiver = ChannelReceiver::new(Cursor::new(wire.to_vec()), FrameConfig::default());
        assert!(matches!(receiver.receive(), Err(FrameError::Decode(_))));
    }

    #[test]
    fn trailing_bytes_in_frame_rejected() {
        let mut wire = BytesMut::new();
        encode_frame(br#"{"type":"value","body":1} {"type":"value","body":2}"#, &mut wire)
            .unwrap();
        let mut receiver = ChannelReceiver::new(Cursor::new(wire.to_vec()), FrameConfig::default());
        assert!(matches!(receiver.receive(), Err(FrameError::Decode(_))));
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let mut wire = BytesMut::new();
        encode_frame(b"{not-json", &mut wire).unwrap();
        let mut receiver = ChannelReceiver::new(Cursor::new(wire.to_vec()), FrameConfig::default());
        assert!(matches!(receiver.receive(), Err(FrameError::Decode(_))));
    }

    #[test]
    fn oversize_message_rejected_before_write() {
        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut sender = ChannelSender::new(Cursor::new(Vec::new()), cfg);
        let err = sender
            .send(&Packet::Value(json!("this is definitely too long")))
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(sender.get_ref().get_ref().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn channel_over_stream_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut a = MessageChannel::open(Stream::from(left), FrameConfig::default()).unwrap();
        let (_b_tx, mut b_rx) = MessageChannel::open(Stream::from(right), FrameConfig::default())
            .unwrap()
            .split();

        let packet = Packet::from(Message::routed("ping", json!(1)));
        a.send(&packet).unwrap();
        assert_eq!(b_rx.receive().unwrap(), packet);
    }
}
