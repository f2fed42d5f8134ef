pub mod mbr;
pub mod tile;

pub use mbr::Mbr;
pub use tile::{FrameKey, MAX_LEVEL, SINGLE_FRAME, TileAddress};
