//! Announcement payload.
//!
//! ```text
//! byte   : 1
//! u16-be : node id length
//! bytes  : node id
//! u16-be : address length
//! bytes  : address (host:port)
//! ```

use crate::identity::NodeId;
use crate::transport::TransportError;

const MARKER: u8 = 1;

/// A node advertising one address it can be dialed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub node_id: NodeId,
    pub address: String,
}

impl Announcement {
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let id = self.node_id.as_bytes();
        let address = self.address.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| TransportError::InvalidAnnouncement("node id too long"))?;
        let address_len = u16::try_from(address.len())
            .map_err(|_| TransportError::InvalidAnnouncement("address too long"))?;

        let mut buf = Vec::with_capacity(5 + id.len() + address.len());
        buf.push(MARKER);
        buf.extend_from_slice(&id_len.to_be_bytes());
        buf.extend_from_slice(id);
        buf.extend_from_slice(&address_len.to_be_bytes());
        buf.extend_from_slice(address);
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, TransportError> {
        let (&marker, rest) = payload
            .split_first()
            .ok_or(TransportError::InvalidAnnouncement("empty payload"))?;
        if marker != MARKER {
            return Err(TransportError::InvalidAnnouncement("unknown marker"));
        }
        let (id, rest) = split_field(rest)?;
        let (address, rest) = split_field(rest)?;
        if !rest.is_empty() {
            return Err(TransportError::InvalidAnnouncement("trailing bytes"));
        }
        if id.is_empty() {
            return Err(TransportError::InvalidAnnouncement("empty node id"));
        }
        let address = std::str::from_utf8(address)
            .map_err(|_| TransportError::InvalidAnnouncement("address is not utf-8"))?;

        Ok(Self::new(NodeId::from(id), address))
    }
}

fn split_field(buf: &[u8]) -> Result<(&[u8], &[u8]), TransportError> {
    if buf.len() < 2 {
        return Err(TransportError::InvalidAnnouncement("truncated length"));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let rest = &buf[2..];
    if rest.len() < len {
        return Err(TransportError::InvalidAnnouncement("truncated field"));
    }
    Ok(rest.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let announcement = Announcement::new(NodeId::from(vec![0xaa, 0xbb]), "0.0.0.0:9000");
        let encoded = announcement.encode().unwrap();
        assert_eq!(&encoded[..5], &[1, 0, 2, 0xaa, 0xbb]);
        assert_eq!(&encoded[5..7], &[0, 12]);
        assert_eq!(&encoded[7..], b"0.0.0.0:9000");
        assert_eq!(Announcement::decode(&encoded).unwrap(), announcement);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let good = Announcement::new(NodeId::from(vec![7; 4]), "10.0.0.1:9000")
            .encode()
            .unwrap();

        assert!(Announcement::decode(&[]).is_err());
        let mut wrong_marker = good.clone();
        wrong_marker[0] = 2;
        assert!(Announcement::decode(&wrong_marker).is_err());
        assert!(Announcement::decode(&good[..good.len() - 1]).is_err());
        let mut trailing = good.clone();
        trailing.push(0);
        assert!(Announcement::decode(&trailing).is_err());
        assert!(Announcement::decode(&[1, 0, 0, 0, 0]).is_err());
    }
}
