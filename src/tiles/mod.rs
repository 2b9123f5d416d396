pub mod extent;
pub mod layout;
pub mod qsbr;
pub mod store;
pub mod swap;
pub mod tile;

pub use layout::{ChannelDepth, ChannelLayout, Pixel};
pub use qsbr::{Qsbr, ReaderContext};
pub use store::{TileCell, TileStore};
pub use swap::{MemorySwapper, TileSwapper};
pub use tile::{Tile, TileData};
