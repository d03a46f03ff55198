pub mod chunk;
pub mod codec;
pub mod command;
pub mod reply;

pub use chunk::ChunkData;
pub use codec::{DoorCodec, MAX_FRAME_SIZE};
pub use command::Command;
pub use reply::{Metrics, Reply, StateInfo};
