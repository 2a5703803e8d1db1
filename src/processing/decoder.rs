//! OSC datagram decoding.
//!
//! # Wire Format
//!
//! Trackers send OSC 1.0 messages over UDP, one position per message:
//!
//! ```text
//! ┌──────────────────────┬────────────────┬──────────────────────────────┐
//! │ Address pattern      │ Type tags      │ Arguments (big-endian)       │
//! │ "/red\0\0\0\0"       │ ",ffff\0\0\0"  │ x, y, width, height (f32)    │
//! └──────────────────────┴────────────────┴──────────────────────────────┘
//! ```
//!
//! Packet parsing and encoding are done by `rosc`. Bundles are flattened and
//! every contained message is returned, down to [`MAX_BUNDLE_DEPTH`] levels of
//! nesting. Only messages with exactly four `f` arguments become position
//! samples; everything else is rejected.

use rosc::{OscBundle, OscMessage, OscPacket, OscType};

use super::queue::PositionSample;

/// Arguments carried by a position message.
pub const POSITION_ARGUMENT_COUNT: usize = 4;

/// Deepest bundle nesting accepted in a datagram.
pub const MAX_BUNDLE_DEPTH: usize = 16;

const BUNDLE_TAG: &[u8] = b"#bundle\0";
// Tag plus 64-bit time tag
const BUNDLE_HEADER_LEN: usize = 16;

/// OSC decoding and encoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("bundles nested deeper than {0} levels")]
    BundleTooDeep(usize),

    #[error("could not encode packet: {0}")]
    Encode(String),

    #[error("expected {expected} arguments, got {got}")]
    WrongArgumentCount { expected: usize, got: usize },

    #[error("argument {index} has type '{tag}', only 'f' (float32) is supported")]
    UnsupportedArgumentType { index: usize, tag: char },
}

/// Position decoded from a message, with the address it was sent to.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPosition {
    pub address: String,
    pub sample: PositionSample,
}

fn type_tag(arg: &OscType) -> char {
    match arg {
        OscType::Int(_) => 'i',
        OscType::Float(_) => 'f',
        OscType::String(_) => 's',
        OscType::Blob(_) => 'b',
        OscType::Time(_) => 't',
        OscType::Long(_) => 'h',
        OscType::Double(_) => 'd',
        OscType::Char(_) => 'c',
        OscType::Color(_) => 'r',
        OscType::Midi(_) => 'm',
        OscType::Bool(true) => 'T',
        OscType::Bool(false) => 'F',
        OscType::Array(_) => '[',
        OscType::Nil => 'N',
        OscType::Inf => 'I',
    }
}

// -----------------------------------------------------------------------------
// DECODING
// -----------------------------------------------------------------------------

/// Deepest bundle nesting in a raw datagram, walked without recursion.
///
/// Fails as soon as a level past [`MAX_BUNDLE_DEPTH`] is found. Element
/// sizes that run past the end are left for the parser to report.
fn bundle_depth(data: &[u8]) -> Result<usize, DecodeError> {
    let mut deepest = 0;
    let mut pending = vec![(data, 0usize)];

    while let Some((element, depth)) = pending.pop() {
        if !element.starts_with(BUNDLE_TAG) {
            continue;
        }
        let depth = depth + 1;
        if depth > MAX_BUNDLE_DEPTH {
            return Err(DecodeError::BundleTooDeep(MAX_BUNDLE_DEPTH));
        }
        deepest = deepest.max(depth);

        let mut rest = element.get(BUNDLE_HEADER_LEN..).unwrap_or_default();
        while let Some(size) = rest.get(..4) {
            let size = u32::from_be_bytes([size[0], size[1], size[2], size[3]]) as usize;
            let Some(inner) = size.checked_add(4).and_then(|end| rest.get(4..end)) else {
                break;
            };
            pending.push((inner, depth));
            rest = &rest[4 + size..];
        }
    }
    Ok(deepest)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(message) => out.push(message),
        OscPacket::Bundle(OscBundle { content, .. }) => {
            for packet in content {
                flatten(packet, out);
            }
        }
    }
}

/// Parse a datagram into its messages, unpacking bundles.
pub fn parse_packet(data: &[u8]) -> Result<Vec<OscMessage>, DecodeError> {
    bundle_depth(data)?;
    let (_, packet) = rosc::decoder::decode_udp(data)
        .map_err(|e| DecodeError::Malformed(format!("{:?}", e)))?;

    let mut messages = Vec::new();
    flatten(packet, &mut messages);
    Ok(messages)
}

/// Validate a message and extract its position.
///
/// Arguments arrive as x, y, width, height. The timestamp is left unset.
pub fn decode_position(message: &OscMessage) -> Result<PositionSample, DecodeError> {
    if message.args.len() != POSITION_ARGUMENT_COUNT {
        return Err(DecodeError::WrongArgumentCount {
            expected: POSITION_ARGUMENT_COUNT,
            got: message.args.len(),
        });
    }

    let mut values = [0.0f32; POSITION_ARGUMENT_COUNT];
    for (index, arg) in message.args.iter().enumerate() {
        match arg {
            OscType::Float(value) => values[index] = *value,
            other => {
                return Err(DecodeError::UnsupportedArgumentType {
                    index,
                    tag: type_tag(other),
                })
            }
        }
    }

    let [x, y, width, height] = values;
    Ok(PositionSample::new(x, y, width, height))
}

/// Decode every valid position in a datagram.
///
/// Malformed packets and rejected messages are logged and dropped.
pub fn decode_positions(data: &[u8]) -> Vec<DecodedPosition> {
    let messages = match parse_packet(data) {
        Ok(messages) => messages,
        Err(e) => {
            log::warn!("Dropping malformed datagram ({} bytes): {}", data.len(), e);
            return Vec::new();
        }
    };

    messages
        .into_iter()
        .filter_map(|message| match decode_position(&message) {
            Ok(sample) => Some(DecodedPosition {
                address: message.addr,
                sample,
            }),
            Err(e) => {
                log::warn!("Rejected message on {}: {}", message.addr, e);
                None
            }
        })
        .collect()
}

// -----------------------------------------------------------------------------
// ENCODING
// -----------------------------------------------------------------------------

/// Serialize a message to OSC bytes.
pub fn encode_message(address: &str, args: Vec<OscType>) -> Result<Vec<u8>, DecodeError> {
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args,
    });
    rosc::encoder::encode(&packet).map_err(|e| DecodeError::Encode(format!("{:?}", e)))
}

/// Position message in wire order: x, y, width, height.
pub fn encode_position(
    address: &str,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
) -> Result<Vec<u8>, DecodeError> {
    encode_message(
        address,
        vec![
            OscType::Float(x),
            OscType::Float(y),
            OscType::Float(width),
            OscType::Float(height),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::OscTime;

    fn message(address: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args,
        })
    }

    fn bundle(content: Vec<OscPacket>) -> OscPacket {
        OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: 0,
                fractional: 1,
            },
            content,
        })
    }

    fn position(address: &str, x: f32, y: f32, width: f32, height: f32) -> OscPacket {
        message(
            address,
            vec![
                OscType::Float(x),
                OscType::Float(y),
                OscType::Float(width),
                OscType::Float(height),
            ],
        )
    }

    /// `levels` bundles wrapped around one position message, built
    /// byte by byte.
    fn nested_bundles(levels: usize) -> Vec<u8> {
        let inner = encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap();
        let level_len = BUNDLE_HEADER_LEN + 4;
        let mut out = Vec::with_capacity(levels * level_len + inner.len());
        for level in 0..levels {
            let element_len = inner.len() + level_len * (levels - level - 1);
            out.extend_from_slice(BUNDLE_TAG);
            out.extend_from_slice(&1u64.to_be_bytes());
            out.extend_from_slice(&(element_len as u32).to_be_bytes());
        }
        out.extend_from_slice(&inner);
        out
    }

    #[test]
    fn test_position_wire_layout() {
        let bytes = encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap();
        // "/red" + 4 pad, ",ffff" + 3 pad, 4 floats
        assert_eq!(bytes.len(), 8 + 8 + 16);
        assert_eq!(&bytes[..8], b"/red\0\0\0\0");
        assert_eq!(&bytes[8..16], b",ffff\0\0\0");
        assert_eq!(&bytes[16..20], &1.0f32.to_be_bytes());
    }

    #[test]
    fn test_decode_preserves_width_height_order() {
        let bytes = encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap();
        let decoded = decode_positions(&bytes);
        assert_eq!(decoded.len(), 1);

        let sample = decoded[0].sample;
        assert_eq!(decoded[0].address, "/red");
        assert_eq!(sample.x, 1.0);
        assert_eq!(sample.y, 2.0);
        assert_eq!(sample.width, 3.0);
        assert_eq!(sample.height, 4.0);
        assert_eq!(sample.timestamp, 0);
        assert_eq!(sample.emission_payload(), [1.0, 2.0, 4.0, 3.0]);
    }

    #[test]
    fn test_rejects_three_arguments() {
        let bytes = encode_message(
            "/red",
            vec![OscType::Float(1.0), OscType::Float(2.0), OscType::Float(3.0)],
        )
        .unwrap();
        let messages = parse_packet(&bytes).unwrap();
        assert_eq!(
            decode_position(&messages[0]),
            Err(DecodeError::WrongArgumentCount {
                expected: 4,
                got: 3
            })
        );
        assert!(decode_positions(&bytes).is_empty());
    }

    #[test]
    fn test_rejects_non_float_argument() {
        let bytes = encode_message(
            "/red",
            vec![
                OscType::Float(1.0),
                OscType::Int(2),
                OscType::Float(3.0),
                OscType::Float(4.0),
            ],
        )
        .unwrap();
        let messages = parse_packet(&bytes).unwrap();
        assert_eq!(
            decode_position(&messages[0]),
            Err(DecodeError::UnsupportedArgumentType { index: 1, tag: 'i' })
        );
        assert!(decode_positions(&bytes).is_empty());

        let doubles = encode_message("/red", vec![OscType::Double(1.0); 4]).unwrap();
        let messages = parse_packet(&doubles).unwrap();
        assert_eq!(
            decode_position(&messages[0]),
            Err(DecodeError::UnsupportedArgumentType { index: 0, tag: 'd' })
        );
    }

    #[test]
    fn test_truncated_packet() {
        let bytes = encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap();
        let cut = &bytes[..bytes.len() - 2];
        assert!(matches!(parse_packet(cut), Err(DecodeError::Malformed(_))));
        assert!(decode_positions(cut).is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_positions(&[]).is_empty());
        assert!(decode_positions(b"garbage").is_empty());
        assert!(decode_positions(b"/red").is_empty());
    }

    #[test]
    fn test_bundle_unpacks_every_message() {
        let packet = bundle(vec![
            position("/red", 1.0, 2.0, 3.0, 4.0),
            message("/status", vec![OscType::Int(1)]),
            bundle(vec![position("/blue", 5.0, 6.0, 7.0, 8.0)]),
        ]);
        let bytes = rosc::encoder::encode(&packet).unwrap();

        let messages = parse_packet(&bytes).unwrap();
        assert_eq!(messages.len(), 3);

        let positions = decode_positions(&bytes);
        let addresses: Vec<&str> = positions.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(addresses, vec!["/red", "/blue"]);
        assert_eq!(positions[1].sample.height, 8.0);
    }

    #[test]
    fn test_bundle_depth_limit() {
        let bytes = nested_bundles(MAX_BUNDLE_DEPTH);
        assert_eq!(bundle_depth(&bytes), Ok(MAX_BUNDLE_DEPTH));
        assert_eq!(decode_positions(&bytes).len(), 1);

        let bytes = nested_bundles(MAX_BUNDLE_DEPTH + 1);
        assert_eq!(
            parse_packet(&bytes),
            Err(DecodeError::BundleTooDeep(MAX_BUNDLE_DEPTH))
        );
        assert!(decode_positions(&bytes).is_empty());
    }

    #[test]
    fn test_deeply_nested_bundle_is_dropped() {
        // Fits in one UDP datagram
        let bytes = nested_bundles(3_000);
        assert!(bytes.len() < 65_536);

        // Listener threads run on the default thread stack
        let decoded = std::thread::spawn(move || decode_positions(&bytes))
            .join()
            .unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_bad_bundle_element_size() {
        let mut bytes = BUNDLE_TAG.to_vec();
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&64u32.to_be_bytes());
        bytes.extend_from_slice(&encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap());
        assert_eq!(bundle_depth(&bytes), Ok(1));
        assert!(decode_positions(&bytes).is_empty());
    }
}
