//! Persistent, chunked TSDF map.
//!
//! Backed by `sled`, a pure-Rust embedded ordered key-value store, used the
//! way the original used HDF5: `map/<cx>_<cy>_<cz>` keys hold chunk blobs,
//! `poses/<index>` keys hold the pose history, one per registered scan.

mod chunk;
mod error;

pub use chunk::{Chunk, ChunkKey, TsdfEntry, CHUNK_SIZE};
pub use error::{GlobalMapError, Result};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use slam_geometry::FloatTransform;

/// Chunked, lazily-loaded, lazily-persisted TSDF map of unbounded extent.
///
/// Reads and writes go through an in-memory cache first; a chunk is only
/// pulled from or pushed to `sled` on a cache miss or an explicit
/// [`GlobalMap::write_back`].
pub struct GlobalMap {
    db: sled::Db,
    cache: Mutex<HashMap<ChunkKey, Chunk>>,
    default_entry: TsdfEntry,
    next_pose_index: Mutex<u64>,
}

impl GlobalMap {
    pub fn open(path: &Path, default_value: i16, default_weight: i16) -> Result<Self> {
        let db = sled::open(path)?;
        let next_pose_index = db
            .get(b"poses/_count")?
            .map(|v| u64::from_be_bytes(v.as_ref().try_into().unwrap_or_default()))
            .unwrap_or(0);
        Ok(GlobalMap {
            db,
            cache: Mutex::new(HashMap::new()),
            default_entry: TsdfEntry::new(default_value, default_weight),
            next_pose_index: Mutex::new(next_pose_index),
        })
    }

    /// Loads a chunk into the cache (from disk if present) and returns a
    /// clone of it. Callers mutate their own copy and call
    /// [`GlobalMap::put_chunk`] to stage it back.
    pub fn get_chunk(&self, key: ChunkKey) -> Result<Chunk> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(chunk) = cache.get(&key) {
            return Ok(chunk.clone());
        }
        let chunk = match self.db.get(key.encode())? {
            Some(bytes) => Chunk::decode(bytes.as_ref()).ok_or_else(|| {
                GlobalMapError::CorruptChunk {
                    cx: key.cx,
                    cy: key.cy,
                    cz: key.cz,
                    expected: CHUNK_SIZE.pow(3) * 4,
                    got: bytes.len(),
                }
            })?,
            None => Chunk::empty(self.default_entry),
        };
        cache.insert(key, chunk.clone());
        Ok(chunk)
    }

    /// Stages an updated chunk into the cache, marking it dirty so the next
    /// [`GlobalMap::write_back`] persists it.
    pub fn put_chunk(&self, key: ChunkKey, mut chunk: Chunk) {
        chunk.dirty = true;
        self.cache.lock().unwrap().insert(key, chunk);
    }

    /// Flushes every dirty cached chunk to the backing store.
    pub fn write_back(&self) -> Result<()> {
        let mut cache = self.cache.lock().unwrap();
        for (key, chunk) in cache.iter_mut() {
            if !chunk.dirty {
                continue;
            }
            self.db.insert(key.encode(), chunk.encode())?;
            chunk.dirty = false;
        }
        self.db.flush()?;
        tracing::debug!(target: "slam_globalmap", "write_back flushed dirty chunks");
        Ok(())
    }

    /// Appends a registered pose to the persisted history. Pose indices
    /// must be contiguous; out-of-order writes would silently reorder a
    /// trajectory on reload.
    pub fn save_pose(&self, index: u64, pose: &FloatTransform) -> Result<()> {
        let mut next = self.next_pose_index.lock().unwrap();
        if index != *next {
            return Err(GlobalMapError::NonContiguousPose { index, expected: *next });
        }
        let key = format!("poses/{index:020}");
        let mut buf = [0u8; 12 * 8];
        let mut w = 0;
        for r in 0..3 {
            for c in 0..4 {
                buf[w..w + 8].copy_from_slice(&pose.m[r][c].to_be_bytes());
                w += 8;
            }
        }
        self.db.insert(key.as_bytes(), &buf[..])?;
        *next += 1;
        self.db.insert(b"poses/_count", &next.to_be_bytes())?;
        Ok(())
    }

    pub fn load_pose(&self, index: u64) -> Result<Option<FloatTransform>> {
        let key = format!("poses/{index:020}");
        let Some(bytes) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let mut m = [[0.0f64; 4]; 4];
        m[3][3] = 1.0;
        let mut r = 0;
        for row in 0..3 {
            for col in 0..4 {
                let off = r * 8;
                m[row][col] = f64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
                r += 1;
            }
        }
        Ok(Some(FloatTransform { m }))
    }

    pub fn pose_count(&self) -> u64 {
        *self.next_pose_index.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slam_geometry::FloatTransform;

    #[test]
    fn chunk_round_trips_through_write_back_and_cache_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let map = GlobalMap::open(dir.path(), 1000, 0).unwrap();
        let key = ChunkKey::new(2, -1, 0);
        let mut chunk = map.get_chunk(key).unwrap();
        chunk.cells[0] = TsdfEntry::new(-500, 50);
        map.put_chunk(key, chunk);
        map.write_back().unwrap();

        // reopen fresh map against the same path, forcing a disk read
        drop(map);
        let map2 = GlobalMap::open(dir.path(), 1000, 0).unwrap();
        let reloaded = map2.get_chunk(key).unwrap();
        assert_eq!(reloaded.cells[0], TsdfEntry::new(-500, 50));
        assert_eq!(reloaded.cells[1], TsdfEntry::new(1000, 0));
    }

    #[test]
    fn pose_history_must_be_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let map = GlobalMap::open(dir.path(), 0, 0).unwrap();
        let pose = FloatTransform::identity();
        map.save_pose(0, &pose).unwrap();
        assert!(map.save_pose(2, &pose).is_err());
        map.save_pose(1, &pose).unwrap();
        assert_eq!(map.pose_count(), 2);
    }

    #[test]
    fn pose_round_trips_translation() {
        let dir = tempfile::tempdir().unwrap();
        let map = GlobalMap::open(dir.path(), 0, 0).unwrap();
        let pose = FloatTransform::translation(1.5, -2.0, 3.25);
        map.save_pose(0, &pose).unwrap();
        let loaded = map.load_pose(0).unwrap().unwrap();
        assert_eq!(loaded.translation_vec(), (1.5, -2.0, 3.25));
    }
}
