pub mod axis;
pub mod derive;
pub mod sparse;
pub mod tensor;

pub use axis::AxisSet;
pub use derive::{derive_channels, ChannelKind};
pub use sparse::PointSeries;
pub use tensor::CounterTensor;
