//! Binary packet framing for the TCP peer link.
//!
//! Every packet starts with a one-byte tag; integers are little-endian.
//!
//! ```text
//! 0x01 frame         pts u64 | width u32 | height u32 | len u32 | pixels
//! 0x02 text          len u32 | utf-8
//! 0x03 channel open  len u32 | utf-8 label
//! ```

use anyhow::{anyhow, bail, Result};
use std::io::{ErrorKind, Read, Write};

use crate::frame::{Frame, CHANNELS};

const TAG_FRAME: u8 = 0x01;
const TAG_TEXT: u8 = 0x02;
const TAG_CHANNEL_OPEN: u8 = 0x03;

/// Largest accepted raster (4096x4096 RGB).
pub const MAX_FRAME_BYTES: usize = 4096 * 4096 * CHANNELS;

/// Largest accepted text payload.
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Frame(Frame),
    Text(String),
    ChannelOpen(String),
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Packet::Frame(frame) => encode_frame(&mut out, frame),
            Packet::Text(text) => encode_text(&mut out, TAG_TEXT, text),
            Packet::ChannelOpen(label) => encode_text(&mut out, TAG_CHANNEL_OPEN, label),
        }
        out
    }
}

fn encode_frame(out: &mut Vec<u8>, frame: &Frame) {
    out.reserve(21 + frame.pixels().len());
    out.push(TAG_FRAME);
    out.extend_from_slice(&frame.pts.to_le_bytes());
    out.extend_from_slice(&frame.width.to_le_bytes());
    out.extend_from_slice(&frame.height.to_le_bytes());
    out.extend_from_slice(&(frame.pixels().len() as u32).to_le_bytes());
    out.extend_from_slice(frame.pixels());
}

fn encode_text(out: &mut Vec<u8>, tag: u8, text: &str) {
    out.push(tag);
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

/// Write one frame packet without building an intermediate packet.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let mut header = Vec::with_capacity(21);
    header.push(TAG_FRAME);
    header.extend_from_slice(&frame.pts.to_le_bytes());
    header.extend_from_slice(&frame.width.to_le_bytes());
    header.extend_from_slice(&frame.height.to_le_bytes());
    header.extend_from_slice(&(frame.pixels().len() as u32).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(frame.pixels())?;
    Ok(())
}

/// Read one packet. `Ok(None)` on a clean end of stream between packets.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Packet>> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    match tag[0] {
        TAG_FRAME => {
            let pts = read_u64(reader)?;
            let width = read_u32(reader)?;
            let height = read_u32(reader)?;
            let len = read_u32(reader)? as usize;
            if len > MAX_FRAME_BYTES {
                bail!("frame length {} exceeds maximum {}", len, MAX_FRAME_BYTES);
            }
            let mut pixels = vec![0u8; len];
            reader.read_exact(&mut pixels)?;
            let frame = Frame::from_pixels(pixels, width, height, pts).ok_or_else(|| {
                anyhow!("frame length {} does not match {}x{}", len, width, height)
            })?;
            Ok(Some(Packet::Frame(frame)))
        }
        TAG_TEXT => Ok(Some(Packet::Text(read_text(reader)?))),
        TAG_CHANNEL_OPEN => Ok(Some(Packet::ChannelOpen(read_text(reader)?))),
        other => bail!("unknown packet tag 0x{:02x}", other),
    }
}

fn read_text<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader)? as usize;
    if len > MAX_TEXT_BYTES {
        bail!("text length {} exceeds maximum {}", len, MAX_TEXT_BYTES);
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| anyhow!("text packet is not valid utf-8"))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::render_ball;

    #[test]
    fn frame_and_text_packets_decode() {
        let frame = render_ball(32, 24, (10, 10), 4, 6000);
        let mut stream = Vec::new();
        write_frame(&mut stream, &frame).unwrap();
        assert_eq!(stream, Packet::Frame(frame.clone()).encode());
        stream.extend(Packet::Text("coords,1,2".into()).encode());
        stream.extend(Packet::ChannelOpen("coords".into()).encode());

        let mut reader = stream.as_slice();
        assert_eq!(read_packet(&mut reader).unwrap(), Some(Packet::Frame(frame)));
        assert_eq!(
            read_packet(&mut reader).unwrap(),
            Some(Packet::Text("coords,1,2".into()))
        );
        assert_eq!(
            read_packet(&mut reader).unwrap(),
            Some(Packet::ChannelOpen("coords".into()))
        );
        assert_eq!(read_packet(&mut reader).unwrap(), None);
    }

    #[test]
    fn truncated_packet_is_an_error() {
        let bytes = Packet::Text("calculated,1,2,3,4".into()).encode();
        let mut reader = &bytes[..bytes.len() - 1];
        assert!(read_packet(&mut reader).is_err());
    }

    #[test]
    fn oversized_and_inconsistent_lengths_are_rejected() {
        let mut bytes = vec![TAG_TEXT];
        bytes.extend_from_slice(&(MAX_TEXT_BYTES as u32 + 1).to_le_bytes());
        assert!(read_packet(&mut bytes.as_slice()).is_err());

        let mut bytes = vec![TAG_FRAME];
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(read_packet(&mut bytes.as_slice()).is_err());

        assert!(read_packet(&mut [0x7fu8].as_slice()).is_err());
    }
}
