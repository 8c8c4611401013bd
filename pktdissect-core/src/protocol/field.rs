//! Decoded field values.
//!
//! Values borrow from the packet buffer where the bytes exist verbatim
//! (`Str`, `Bytes`) and own their data when they have to be built
//! (`OwnedString`, `OwnedBytes`, `List`).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use compact_str::CompactString;

/// A decoded field value, tied to the lifetime of the packet buffer.
#[derive(Debug, Clone)]
pub enum FieldValue<'data> {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    /// Produced by `int`/`long` accessors
    Int64(i64),
    /// Single-bit fields and boolean accessors
    Bool(bool),

    IpAddr(IpAddr),
    MacAddr([u8; 6]),

    /// Text found verbatim in the packet
    Str(&'data str),
    /// Byte range of the packet (fields wider than 64 bits, payloads)
    Bytes(&'data [u8]),

    /// Constructed text (enum names, joined lists)
    OwnedString(CompactString),
    /// Constructed bytes (reassembled or decoded data)
    OwnedBytes(Vec<u8>),

    /// Multi-valued fields, e.g. SACK blocks.
    List(Vec<FieldValue<'data>>),

    /// Value could not be produced (field outside the captured bytes)
    Null,
}

/// A value that owns all its data.
pub type OwnedFieldValue = FieldValue<'static>;

impl<'data> FieldValue<'data> {
    /// The narrowest unsigned variant holding `length` bits.
    ///
    /// One bit decodes as `Bool`. Widths above 64 have no integer form.
    pub fn from_bits(bits: u64, length: i32) -> Self {
        match length {
            1 => FieldValue::Bool(bits != 0),
            2..=8 => FieldValue::UInt8(bits as u8),
            9..=16 => FieldValue::UInt16(bits as u16),
            17..=32 => FieldValue::UInt32(bits as u32),
            33..=64 => FieldValue::UInt64(bits),
            _ => FieldValue::Null,
        }
    }

    pub fn mac(bytes: &[u8]) -> Self {
        match bytes.get(..6) {
            Some(slice) => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(slice);
                FieldValue::MacAddr(mac)
            }
            None => FieldValue::Null,
        }
    }

    pub fn ipv4(bytes: &[u8]) -> Self {
        match bytes.get(..4) {
            Some(&[a, b, c, d]) => FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(a, b, c, d))),
            _ => FieldValue::Null,
        }
    }

    pub fn format_mac(mac: &[u8; 6]) -> String {
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Unsigned integer view; booleans read as 0/1.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt8(v) => Some(*v as u64),
            FieldValue::UInt16(v) => Some(*v as u64),
            FieldValue::UInt32(v) => Some(*v as u64),
            FieldValue::UInt64(v) => Some(*v),
            FieldValue::Int64(v) => u64::try_from(*v).ok(),
            FieldValue::Bool(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            FieldValue::UInt64(v) => i64::try_from(*v).ok(),
            other => other.as_u64().map(|v| v as i64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::OwnedString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::OwnedBytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue<'data>]> {
        match self {
            FieldValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Copy borrowed data so the value can outlive the packet.
    pub fn to_owned(&self) -> OwnedFieldValue {
        match self {
            FieldValue::UInt8(v) => FieldValue::UInt8(*v),
            FieldValue::UInt16(v) => FieldValue::UInt16(*v),
            FieldValue::UInt32(v) => FieldValue::UInt32(*v),
            FieldValue::UInt64(v) => FieldValue::UInt64(*v),
            FieldValue::Int64(v) => FieldValue::Int64(*v),
            FieldValue::Bool(v) => FieldValue::Bool(*v),
            FieldValue::IpAddr(v) => FieldValue::IpAddr(*v),
            FieldValue::MacAddr(v) => FieldValue::MacAddr(*v),
            FieldValue::Str(s) => FieldValue::OwnedString(CompactString::new(s)),
            FieldValue::Bytes(b) => FieldValue::OwnedBytes(b.to_vec()),
            FieldValue::OwnedString(s) => FieldValue::OwnedString(s.clone()),
            FieldValue::OwnedBytes(b) => FieldValue::OwnedBytes(b.clone()),
            FieldValue::List(items) => FieldValue::List(items.iter().map(|v| v.to_owned()).collect()),
            FieldValue::Null => FieldValue::Null,
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::UInt8(v) => write!(f, "{v}"),
            FieldValue::UInt16(v) => write!(f, "{v}"),
            FieldValue::UInt32(v) => write!(f, "{v}"),
            FieldValue::UInt64(v) => write!(f, "{v}"),
            FieldValue::Int64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::OwnedString(s) => f.write_str(s),
            FieldValue::Bytes(b) => write!(f, "[{} bytes]", b.len()),
            FieldValue::OwnedBytes(b) => write!(f, "[{} bytes]", b.len()),
            FieldValue::IpAddr(addr) => write!(f, "{addr}"),
            FieldValue::MacAddr(mac) => f.write_str(&Self::format_mac(mac)),
            FieldValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            FieldValue::Null => f.write_str("NULL"),
        }
    }
}

// Borrowed and owned variants of the same data compare equal.
impl<'b> PartialEq<FieldValue<'b>> for FieldValue<'_> {
    fn eq(&self, other: &FieldValue<'b>) -> bool {
        use FieldValue::*;
        match (self, other) {
            (UInt8(a), UInt8(b)) => a == b,
            (UInt16(a), UInt16(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (IpAddr(a), IpAddr(b)) => a == b,
            (MacAddr(a), MacAddr(b)) => a == b,
            (Str(_) | OwnedString(_), Str(_) | OwnedString(_)) => self.as_str() == other.as_str(),
            (Bytes(_) | OwnedBytes(_), Bytes(_) | OwnedBytes(_)) => {
                self.as_bytes() == other.as_bytes()
            }
            (List(a), List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y),
            (Null, Null) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits_widths() {
        assert_eq!(FieldValue::from_bits(1, 1), FieldValue::Bool(true));
        assert_eq!(FieldValue::from_bits(0x45, 8), FieldValue::UInt8(0x45));
        assert_eq!(FieldValue::from_bits(0x1fff, 13), FieldValue::UInt16(0x1fff));
        assert_eq!(FieldValue::from_bits(7, 24), FieldValue::UInt32(7));
        assert_eq!(FieldValue::from_bits(7, 48), FieldValue::UInt64(7));
        assert!(FieldValue::from_bits(7, 0).is_null());
        assert!(FieldValue::from_bits(7, 65).is_null());
    }

    #[test]
    fn test_zero_copy_bytes() {
        let packet = vec![0x45, 0x00, 0x00, 0x28, 0xde, 0xad, 0xbe, 0xef];
        let value = FieldValue::Bytes(&packet[4..]);

        match value {
            FieldValue::Bytes(b) => {
                assert_eq!(b, &[0xde, 0xad, 0xbe, 0xef]);
                assert!(std::ptr::eq(b.as_ptr(), packet[4..].as_ptr()));
            }
            _ => panic!("Expected Bytes variant"),
        }
    }

    #[test]
    fn test_borrowed_owned_equality() {
        let borrowed = FieldValue::Str("tcp");
        let owned = FieldValue::OwnedString(CompactString::new("tcp"));
        assert_eq!(borrowed, owned);
        assert_eq!(owned, borrowed);

        let data = [1u8, 2, 3];
        assert_eq!(FieldValue::Bytes(&data), FieldValue::OwnedBytes(vec![1, 2, 3]));
        assert_ne!(FieldValue::UInt8(1), FieldValue::UInt16(1));
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(FieldValue::Bool(true).as_u64(), Some(1));
        assert_eq!(FieldValue::Int64(-1).as_u64(), None);
        assert_eq!(FieldValue::Int64(-1).as_i64(), Some(-1));
        assert_eq!(FieldValue::UInt16(1500).as_i64(), Some(1500));
        assert_eq!(FieldValue::Str("x").as_u64(), None);
    }

    #[test]
    fn test_addresses() {
        let ip = FieldValue::ipv4(&[192, 168, 1, 1]);
        assert_eq!(ip.to_string(), "192.168.1.1");
        assert!(FieldValue::ipv4(&[1, 2]).is_null());

        let mac = FieldValue::mac(&[0, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_list_to_owned() {
        let packet = b"test";
        let list = FieldValue::List(vec![
            FieldValue::Str(std::str::from_utf8(packet).unwrap()),
            FieldValue::UInt32(42),
        ]);
        let owned = list.to_owned();

        assert_eq!(list, owned);
        assert_eq!(owned.to_string(), "[test, 42]");
        match &owned {
            FieldValue::List(items) => assert!(matches!(&items[0], FieldValue::OwnedString(_))),
            _ => panic!("Expected List variant"),
        }
    }
}
