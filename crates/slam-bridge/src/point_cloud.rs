use slam_geometry::Point3i;

use crate::error::{BridgeError, Result};

/// A scan with fixed ring count. Columns are stored sequentially: all
/// rings of one firing, then all rings of the next, matching the original
/// `msg::PointCloud` layout (`[C1R1 C1R2 ... C1Rn C2R1 ...]`).
#[derive(Debug, Clone)]
pub struct PointCloud {
    pub points: Vec<Point3i>,
    pub rings: u16,
}

impl PointCloud {
    /// Validates the column-major/ring-count invariant from the data model
    /// (`len % rings == 0`) instead of assuming it, the way the original
    /// implicitly trusted the driver to produce a conforming layout.
    pub fn new(points: Vec<Point3i>, rings: u16) -> Result<Self> {
        if rings == 0 || points.len() % rings as usize != 0 {
            return Err(BridgeError::RingCountMismatch { points: points.len(), rings });
        }
        Ok(PointCloud { points, rings })
    }

    pub fn columns(&self) -> usize {
        self.points.len() / self.rings as usize
    }
}
