/// Side length, in cells, of a single persisted chunk. Chosen so a chunk
/// covers a few meters at the default map resolution without the
/// dense `Vec<TsdfEntry>` becoming unwieldy to stage/merge as a unit.
pub const CHUNK_SIZE: usize = 16;
const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// A single TSDF cell: a signed distance value and an accumulation weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TsdfEntry {
    pub value: i16,
    pub weight: i16,
}

impl TsdfEntry {
    pub fn new(value: i16, weight: i16) -> Self {
        TsdfEntry { value, weight }
    }

    /// Packs into the raw 32 bit wire/on-disk representation: value in the
    /// high 16 bits, weight in the low 16 bits, matching the original
    /// kernel's packed `std::pair<int16_t,int16_t>` layout.
    pub fn to_raw(self) -> i32 {
        ((self.value as u16 as i32) << 16) | (self.weight as u16 as i32)
    }

    pub fn from_raw(raw: i32) -> Self {
        let value = (raw >> 16) as i16;
        let weight = (raw & 0xFFFF) as i16;
        TsdfEntry { value, weight }
    }
}

/// Integer coordinates of a chunk within the unbounded global map, in
/// units of [`CHUNK_SIZE`] cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkKey {
    pub fn new(cx: i32, cy: i32, cz: i32) -> Self {
        ChunkKey { cx, cy, cz }
    }

    /// The chunk containing a given cell coordinate.
    pub fn containing(cell_x: i32, cell_y: i32, cell_z: i32) -> (ChunkKey, usize) {
        let size = CHUNK_SIZE as i32;
        let cx = slam_geometry::floor_div(cell_x, size);
        let cy = slam_geometry::floor_div(cell_y, size);
        let cz = slam_geometry::floor_div(cell_z, size);
        let lx = (cell_x - cx * size) as usize;
        let ly = (cell_y - cy * size) as usize;
        let lz = (cell_z - cz * size) as usize;
        let idx = lx + ly * CHUNK_SIZE + lz * CHUNK_SIZE * CHUNK_SIZE;
        (ChunkKey::new(cx, cy, cz), idx)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + b"map/".len());
        buf.extend_from_slice(b"map/");
        buf.extend_from_slice(&self.cx.to_be_bytes());
        buf.extend_from_slice(&self.cy.to_be_bytes());
        buf.extend_from_slice(&self.cz.to_be_bytes());
        buf
    }
}

/// A dense block of [`CHUNK_VOLUME`] cells, the unit of persistence for
/// the global map's backing store.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub cells: Box<[TsdfEntry]>,
    pub dirty: bool,
}

impl Chunk {
    pub fn empty(default: TsdfEntry) -> Self {
        Chunk { cells: vec![default; CHUNK_VOLUME].into_boxed_slice(), dirty: false }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHUNK_VOLUME * 4);
        for entry in self.cells.iter() {
            buf.extend_from_slice(&entry.to_raw().to_be_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CHUNK_VOLUME * 4 {
            return None;
        }
        let mut cells = Vec::with_capacity(CHUNK_VOLUME);
        for chunk4 in bytes.chunks_exact(4) {
            let raw = i32::from_be_bytes([chunk4[0], chunk4[1], chunk4[2], chunk4[3]]);
            cells.push(TsdfEntry::from_raw(raw));
        }
        Some(Chunk { cells: cells.into_boxed_slice(), dirty: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_roundtrip_preserves_value_and_weight() {
        let e = TsdfEntry::new(-1234, 789);
        assert_eq!(TsdfEntry::from_raw(e.to_raw()), e);
    }

    #[test]
    fn chunk_containing_wraps_at_boundary() {
        let (key, idx) = ChunkKey::containing(-1, 0, 0);
        assert_eq!(key, ChunkKey::new(-1, 0, 0));
        assert_eq!(idx, CHUNK_SIZE - 1);

        let (key2, idx2) = ChunkKey::containing(0, 0, 0);
        assert_eq!(key2, ChunkKey::new(0, 0, 0));
        assert_eq!(idx2, 0);
    }

    #[test]
    fn chunk_encode_decode_roundtrip() {
        let mut chunk = Chunk::empty(TsdfEntry::default());
        chunk.cells[5] = TsdfEntry::new(42, 7);
        let bytes = chunk.encode();
        let decoded = Chunk::decode(&bytes).unwrap();
        assert_eq!(decoded.cells[5], TsdfEntry::new(42, 7));
    }
}
