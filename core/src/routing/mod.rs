//! Message routing inside the router process.

mod fanout;
mod pipe;
mod virtual_pair;

pub use fanout::{DeliveryReport, FanOut, SharedTarget, TargetId};
pub use pipe::PipeWriter;
pub use virtual_pair::{PairSettings, VirtualPortPair};
