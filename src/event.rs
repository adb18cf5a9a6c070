//! Raw lifecycle event model and payload decoding
//!
//! Lifecycle events arrive as a kind id plus an opaque little-endian payload
//! whose field widths depend on the pointer width of the recording process.
//! Decoding is per-event fallible: one corrupt payload must not take down a
//! multi-hour capture, so every error here names a single event.

use thiserror::Error;

/// Event id for resource creation (allocate).
pub const EVENT_CREATE: u16 = 33;
/// Event id for in-place or relocating resize.
pub const EVENT_RESIZE: u16 = 34;
/// Event id for container teardown (bulk release of everything inside).
pub const EVENT_TEARDOWN: u16 = 35;
/// Event id for resource destruction (free).
pub const EVENT_DESTROY: u16 = 36;

/// Errors for decoding a single raw event
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown event id {0}")]
    UnknownEventId(u16),

    #[error("payload truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("size {0:#x} does not fit in a signed 64-bit byte count")]
    SizeOverflow(u64),
}

/// Pointer width of the process that emitted an event.
///
/// Narrow payloads carry 4-byte container/address/size fields, wide payloads
/// 8-byte fields. The width is flagged per event, not per capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Narrow,
    Wide,
}

impl PointerWidth {
    fn field_len(self) -> usize {
        match self {
            PointerWidth::Narrow => 4,
            PointerWidth::Wide => 8,
        }
    }
}

/// One undecoded lifecycle event as handed over by the trace source.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Event kind id (see the `EVENT_*` constants)
    pub id: u16,
    /// Owning process
    pub process: u32,
    /// Thread the event fired on
    pub thread: u32,
    /// Capture-relative timestamp in nanoseconds
    pub timestamp: i64,
    /// Field width of the payload
    pub width: PointerWidth,
    /// Raw payload bytes, little-endian fields
    pub payload: Vec<u8>,
}

/// A creation event: `(container, size, address)` in payload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatePayload {
    pub container: u64,
    pub size: i64,
    pub address: u64,
}

/// A destruction event: `(container, address)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyPayload {
    pub container: u64,
    pub address: u64,
}

/// A resize event: `(container, new_address, old_address, new_size, old_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePayload {
    pub container: u64,
    pub new_address: u64,
    pub old_address: u64,
    pub new_size: i64,
    pub old_size: i64,
}

/// A container teardown event: `(container)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPayload {
    pub container: u64,
}

/// A fully decoded lifecycle event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEvent {
    Create(CreatePayload),
    Destroy(DestroyPayload),
    Resize(ResizePayload),
    Teardown(TeardownPayload),
}

impl RawEvent {
    /// Decode the payload according to the event id and pointer width.
    pub fn decode(&self) -> Result<DecodedEvent, DecodeError> {
        let mut cursor = FieldCursor {
            data: &self.payload,
            pos: 0,
            width: self.width,
        };

        match self.id {
            EVENT_CREATE => {
                let container = cursor.read()?;
                let size = checked_size(cursor.read()?)?;
                let address = cursor.read()?;
                Ok(DecodedEvent::Create(CreatePayload {
                    container,
                    size,
                    address,
                }))
            }
            EVENT_DESTROY => {
                let container = cursor.read()?;
                let address = cursor.read()?;
                Ok(DecodedEvent::Destroy(DestroyPayload { container, address }))
            }
            EVENT_RESIZE => {
                let container = cursor.read()?;
                let new_address = cursor.read()?;
                let old_address = cursor.read()?;
                let new_size = checked_size(cursor.read()?)?;
                let old_size = checked_size(cursor.read()?)?;
                Ok(DecodedEvent::Resize(ResizePayload {
                    container,
                    new_address,
                    old_address,
                    new_size,
                    old_size,
                }))
            }
            EVENT_TEARDOWN => {
                let container = cursor.read()?;
                Ok(DecodedEvent::Teardown(TeardownPayload { container }))
            }
            other => Err(DecodeError::UnknownEventId(other)),
        }
    }
}

/// Sizes are unsigned on the wire; reject anything that cannot be represented
/// as a signed byte count instead of wrapping.
fn checked_size(raw: u64) -> Result<i64, DecodeError> {
    i64::try_from(raw).map_err(|_| DecodeError::SizeOverflow(raw))
}

struct FieldCursor<'a> {
    data: &'a [u8],
    pos: usize,
    width: PointerWidth,
}

impl FieldCursor<'_> {
    fn read(&mut self) -> Result<u64, DecodeError> {
        let len = self.width.field_len();
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated {
                need: end,
                got: self.data.len(),
            })?;
        self.pos = end;

        Ok(match self.width {
            PointerWidth::Narrow => {
                u64::from(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            PointerWidth::Wide => u64::from_le_bytes(bytes.try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u16, width: PointerWidth, payload: Vec<u8>) -> RawEvent {
        RawEvent {
            id,
            process: 1234,
            thread: 1,
            timestamp: 0,
            width,
            payload,
        }
    }

    fn narrow_fields(fields: &[u32]) -> Vec<u8> {
        fields.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn wide_fields(fields: &[u64]) -> Vec<u8> {
        fields.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_narrow_create() {
        let event = raw(
            EVENT_CREATE,
            PointerWidth::Narrow,
            narrow_fields(&[0x1000, 64, 0x2000]),
        );
        assert_eq!(
            event.decode().unwrap(),
            DecodedEvent::Create(CreatePayload {
                container: 0x1000,
                size: 64,
                address: 0x2000,
            })
        );
    }

    #[test]
    fn test_decode_wide_create() {
        let event = raw(
            EVENT_CREATE,
            PointerWidth::Wide,
            wide_fields(&[0xdead_0000_1000, 4096, 0xbeef_0000_2000]),
        );
        assert_eq!(
            event.decode().unwrap(),
            DecodedEvent::Create(CreatePayload {
                container: 0xdead_0000_1000,
                size: 4096,
                address: 0xbeef_0000_2000,
            })
        );
    }

    #[test]
    fn test_decode_resize_field_order() {
        // Payload order is (container, new_address, old_address, new_size, old_size)
        let event = raw(
            EVENT_RESIZE,
            PointerWidth::Narrow,
            narrow_fields(&[7, 0x30, 0x20, 256, 128]),
        );
        assert_eq!(
            event.decode().unwrap(),
            DecodedEvent::Resize(ResizePayload {
                container: 7,
                new_address: 0x30,
                old_address: 0x20,
                new_size: 256,
                old_size: 128,
            })
        );
    }

    #[test]
    fn test_decode_destroy_and_teardown() {
        let destroy = raw(EVENT_DESTROY, PointerWidth::Wide, wide_fields(&[7, 0x20]));
        assert_eq!(
            destroy.decode().unwrap(),
            DecodedEvent::Destroy(DestroyPayload {
                container: 7,
                address: 0x20,
            })
        );

        let teardown = raw(EVENT_TEARDOWN, PointerWidth::Narrow, narrow_fields(&[7]));
        assert_eq!(
            teardown.decode().unwrap(),
            DecodedEvent::Teardown(TeardownPayload { container: 7 })
        );
    }

    #[test]
    fn test_decode_truncated_payload() {
        let event = raw(EVENT_CREATE, PointerWidth::Wide, wide_fields(&[7]));
        assert_eq!(
            event.decode().unwrap_err(),
            DecodeError::Truncated { need: 16, got: 8 }
        );
    }

    #[test]
    fn test_decode_size_overflow() {
        let event = raw(
            EVENT_CREATE,
            PointerWidth::Wide,
            wide_fields(&[7, u64::MAX, 0x20]),
        );
        assert_eq!(
            event.decode().unwrap_err(),
            DecodeError::SizeOverflow(u64::MAX)
        );
    }

    #[test]
    fn test_decode_unknown_event_id() {
        let event = raw(99, PointerWidth::Narrow, vec![]);
        assert_eq!(event.decode().unwrap_err(), DecodeError::UnknownEventId(99));
    }

    #[test]
    fn test_narrow_size_always_fits() {
        // A 32-bit size can never overflow the signed 64-bit range
        let event = raw(
            EVENT_CREATE,
            PointerWidth::Narrow,
            narrow_fields(&[7, u32::MAX, 0x20]),
        );
        match event.decode().unwrap() {
            DecodedEvent::Create(p) => assert_eq!(p.size, i64::from(u32::MAX)),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
