//! Decoding hints the kernel shim encodes into a packet's firewall mark.
//!
//! Bit layout:
//! - bit `0x1000_0000`: the kernel has labelled this as the first packet of
//!   a new session.
//! - low byte (`0x0000_00ff`): interface id.
//! - bits `0x0300_0000` (shifted right 24): interface type, a 2-bit value.

const NEW_SESSION_BIT: u32 = 0x1000_0000;
const INTERFACE_ID_MASK: u32 = 0x0000_00ff;
const INTERFACE_TYPE_MASK: u32 = 0x0300_0000;
const INTERFACE_TYPE_SHIFT: u32 = 24;

/// Decoded fields of a packet mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMark {
    pub is_new_session: bool,
    pub interface_id: u8,
    pub interface_type: u8,
}

impl PacketMark {
    pub fn decode(mark: u32) -> Self {
        PacketMark {
            is_new_session: mark & NEW_SESSION_BIT != 0,
            interface_id: (mark & INTERFACE_ID_MASK) as u8,
            interface_type: ((mark & INTERFACE_TYPE_MASK) >> INTERFACE_TYPE_SHIFT) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_session_with_low_interface_id() {
        let m = PacketMark::decode(0x1000_0001);
        assert!(m.is_new_session);
        assert_eq!(m.interface_id, 1);
        assert_eq!(m.interface_type, 0);
    }

    #[test]
    fn decodes_interface_type_bits() {
        let m = PacketMark::decode(0x0200_002a);
        assert!(!m.is_new_session);
        assert_eq!(m.interface_id, 0x2a);
        assert_eq!(m.interface_type, 2);
    }
}
