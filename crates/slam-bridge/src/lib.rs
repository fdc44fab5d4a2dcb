//! External interface data contracts: the wire types named in spec §6 and
//! the driver/visualization traits that the core consumes as interfaces
//! only. Sensor drivers, the visualization process, and ROS-style
//! bridging are out of scope (spec §1); this crate stops at the seam.

mod error;
mod point_cloud;
mod sources;
mod tsdf_message;

pub use error::{BridgeError, Result};
pub use point_cloud::PointCloud;
pub use sources::{
    CloudSource, ImuSource, NullVisualizationSink, RingCloudSource, RingImuSource,
    RingVisualizationSink, VisualizationSink,
};
pub use tsdf_message::TSDFBridgeMessage;
