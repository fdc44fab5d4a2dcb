use serde::Serialize;

use slam_globalmap::TsdfEntry;
use slam_localmap::LocalMap;

use crate::error::{BridgeError, Result};

const HEADER_LEN: usize = 4 + 4 + 12 + 12 + 12;

/// Wire message published to the visualization bridge: a header describing
/// how to interpret the payload, plus the local map's raw cell storage in
/// its natural order (z-major, then y, then x).
///
/// `header` derives `Serialize` so it can be logged structurally; the cell
/// payload itself stays a packed binary blob, matching the single-field
/// `(value,weight)` encoding spec'd for the persisted map.
#[derive(Debug, Clone, Serialize)]
pub struct TSDFBridgeMessage {
    pub tau: i32,
    pub map_resolution: i32,
    pub size: (i32, i32, i32),
    pub center: (i32, i32, i32),
    pub ring_offset: (i32, i32, i32),
    #[serde(skip)]
    pub cells: Vec<TsdfEntry>,
}

impl TSDFBridgeMessage {
    pub fn from_local_map(map: &LocalMap, tau: i32, map_resolution: i32) -> Self {
        let center = map.center();
        TSDFBridgeMessage {
            tau,
            map_resolution,
            size: map.size(),
            center: (center.x, center.y, center.z),
            ring_offset: map.ring_offset(),
            cells: map.raw_cells().to_vec(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.cells.len() * 4);
        buf.extend_from_slice(&self.tau.to_be_bytes());
        buf.extend_from_slice(&self.map_resolution.to_be_bytes());
        for v in [self.size.0, self.size.1, self.size.2] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        for v in [self.center.0, self.center.1, self.center.2] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        for v in [self.ring_offset.0, self.ring_offset.1, self.ring_offset.2] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        for entry in &self.cells {
            buf.extend_from_slice(&entry.to_raw().to_be_bytes());
        }
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BridgeError::TruncatedPayload { expected: HEADER_LEN, got: bytes.len() });
        }
        let mut read = |off: usize| i32::from_be_bytes(bytes[off..off + 4].try_into().unwrap());
        let tau = read(0);
        let map_resolution = read(4);
        let size = (read(8), read(12), read(16));
        let center = (read(20), read(24), read(28));
        let ring_offset = (read(32), read(36), read(40));

        let cell_count = (size.0 as i64 * size.1 as i64 * size.2 as i64) as usize;
        let expected = HEADER_LEN + cell_count * 4;
        if bytes.len() != expected {
            return Err(BridgeError::TruncatedPayload { expected, got: bytes.len() });
        }
        let cells = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| TsdfEntry::from_raw(i32::from_be_bytes(c.try_into().unwrap())))
            .collect();

        Ok(TSDFBridgeMessage { tau, map_resolution, size, center, ring_offset, cells })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slam_geometry::Point3i;

    #[test]
    fn pack_unpack_round_trips() {
        let mut map = LocalMap::new((3, 3, 3), Point3i::new(1, 2, 3), TsdfEntry::default());
        *map.value_mut(Point3i::new(1, 2, 3)).unwrap() = TsdfEntry::new(42, 7);
        let msg = TSDFBridgeMessage::from_local_map(&map, 1000, 64);

        let bytes = msg.pack();
        let decoded = TSDFBridgeMessage::unpack(&bytes).unwrap();

        assert_eq!(decoded.tau, 1000);
        assert_eq!(decoded.map_resolution, 64);
        assert_eq!(decoded.size, (3, 3, 3));
        assert_eq!(decoded.center, (1, 2, 3));
        assert_eq!(decoded.cells, msg.cells);
    }

    #[test]
    fn unpack_rejects_truncated_payload() {
        assert!(TSDFBridgeMessage::unpack(&[0u8; 10]).is_err());
    }
}
