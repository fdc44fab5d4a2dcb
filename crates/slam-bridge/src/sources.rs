//! Driver/visualization-facing interfaces. Real sensor I/O and network
//! publishing are out of scope (spec §1); these traits are the seam a
//! driver or visualization process would implement, plus ring-buffer
//! backed implementations used for in-process wiring and tests.

use std::sync::Arc;

use slam_concurrency::{RingBuffer, Stamped};
use slam_imu::ImuSample;

use crate::point_cloud::PointCloud;
use crate::tsdf_message::TSDFBridgeMessage;

pub trait CloudSource: Send {
    fn recv(&mut self) -> Option<Stamped<PointCloud>>;
}

pub trait ImuSource: Send {
    fn recv(&mut self) -> Option<Stamped<ImuSample>>;
}

pub trait VisualizationSink: Send {
    fn publish(&mut self, msg: TSDFBridgeMessage);
}

/// A [`CloudSource`] fed by a [`RingBuffer`], the in-process stand-in for a
/// driver process or ROS bridge subscriber.
pub struct RingCloudSource {
    buffer: Arc<RingBuffer<Stamped<PointCloud>>>,
}

impl RingCloudSource {
    pub fn new(buffer: Arc<RingBuffer<Stamped<PointCloud>>>) -> Self {
        RingCloudSource { buffer }
    }
}

impl CloudSource for RingCloudSource {
    fn recv(&mut self) -> Option<Stamped<PointCloud>> {
        self.buffer.pop()
    }
}

pub struct RingImuSource {
    buffer: Arc<RingBuffer<Stamped<ImuSample>>>,
}

impl RingImuSource {
    pub fn new(buffer: Arc<RingBuffer<Stamped<ImuSample>>>) -> Self {
        RingImuSource { buffer }
    }
}

impl ImuSource for RingImuSource {
    fn recv(&mut self) -> Option<Stamped<ImuSample>> {
        self.buffer.pop()
    }
}

/// A [`VisualizationSink`] that pushes into a ring buffer with
/// `push_overwrite`, matching spec §4.8/§5's "visualization buffer is
/// overwrite-only" policy.
pub struct RingVisualizationSink {
    buffer: Arc<RingBuffer<TSDFBridgeMessage>>,
}

impl RingVisualizationSink {
    pub fn new(buffer: Arc<RingBuffer<TSDFBridgeMessage>>) -> Self {
        RingVisualizationSink { buffer }
    }
}

impl VisualizationSink for RingVisualizationSink {
    fn publish(&mut self, msg: TSDFBridgeMessage) {
        self.buffer.push_overwrite(msg);
    }
}

/// Discards every message. Used where a visualization sink is wired but
/// nothing downstream is listening (e.g. headless test runs).
#[derive(Default)]
pub struct NullVisualizationSink;

impl VisualizationSink for NullVisualizationSink {
    fn publish(&mut self, _msg: TSDFBridgeMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use slam_geometry::Point3i;
    use slam_globalmap::TsdfEntry;
    use slam_localmap::LocalMap;

    #[test]
    fn ring_cloud_source_drains_in_fifo_order() {
        let buf = Arc::new(RingBuffer::new(4));
        buf.push(Stamped::new(PointCloud::new(vec![Point3i::ZERO], 1).unwrap(), 1));
        buf.push(Stamped::new(PointCloud::new(vec![Point3i::ZERO], 1).unwrap(), 2));
        let mut source = RingCloudSource::new(buf);
        assert_eq!(source.recv().unwrap().timestamp_ns, 1);
        assert_eq!(source.recv().unwrap().timestamp_ns, 2);
    }

    #[test]
    fn ring_visualization_sink_overwrites_oldest() {
        let buf = Arc::new(RingBuffer::new(1));
        let mut sink = RingVisualizationSink::new(buf.clone());
        let map = LocalMap::new((3, 3, 3), Point3i::ZERO, TsdfEntry::default());
        sink.publish(TSDFBridgeMessage::from_local_map(&map, 100, 64));
        sink.publish(TSDFBridgeMessage::from_local_map(&map, 200, 64));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.pop().unwrap().tau, 200);
    }

    #[test]
    fn null_sink_accepts_without_panicking() {
        let map = LocalMap::new((3, 3, 3), Point3i::ZERO, TsdfEntry::default());
        NullVisualizationSink.publish(TSDFBridgeMessage::from_local_map(&map, 1, 1));
    }
}
