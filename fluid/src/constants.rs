/// Regions a single solver can hold, not counting the phantom tile.
pub const MAX_REGIONS: usize = 16;
/// Atlas slots per solver: one per region plus the phantom tile at index 0.
pub const MAX_TILES: usize = MAX_REGIONS + 1;
pub const PHANTOM_TILE: usize = 0;
/// Smallest edge length a framebuffer is ever allocated with.
pub const MIN_FRAMEBUFFER_SIZE: u32 = 32;
pub const BYTES_PER_MEGABYTE: u64 = 1_048_576;
/// Region sizes are multiplied by this before packing so that the packer
/// works on integer-ish extents.
pub const PACKING_SCALE: f32 = 1024.0;
/// Expected packing efficiency used to size the initial shelf.
pub const PACKING_EFFICIENCY: f32 = 0.95;
pub const EPSILON: f32 = 0.00001;
