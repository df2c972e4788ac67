//! Engine constants shared by the wire layer and the shadow world.

/// Simulation timing
pub mod time {
    /// Client tick rate in Hz
    pub const TICK_RATE: u32 = 35;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / TICK_RATE as f32;
    /// Tick duration in microseconds
    pub const TICK_DURATION_US: u64 = 1_000_000 / TICK_RATE as u64;
}

/// Networking constants
pub mod net {
    /// Maximum datagram size accepted or produced
    pub const MAX_DATAGRAM_SIZE: usize = 1400;
    /// Remembered frame set ids
    pub const SET_HISTORY_SIZE: usize = 100;
    /// Remembered resend ids
    pub const RESEND_HISTORY_SIZE: usize = 200;
    /// Default inbound packet queue capacity
    pub const PACKET_QUEUE_CAPACITY: usize = 256;
}

/// Client mobj bookkeeping
pub mod mobj {
    /// Hash buckets in the client mobj table
    pub const HASH_SIZE: usize = 256;
    /// Mobjs not updated for this long are expired (milliseconds)
    pub const TIMEOUT_MS: u64 = 4000;
    /// Bits of the selector copied into real player mobjs
    pub const SELECTOR_MASK: u32 = 0x00ff_ffff;
}

/// Players
pub mod players {
    /// Maximum number of player slots
    pub const MAX_PLAYERS: usize = 16;
    /// Player sprites carried in a player delta
    pub const MAX_PSPRITES: usize = 2;
}

/// Movement smoothing
pub mod smoother {
    /// Buffered future samples
    pub const FUTURE_POINTS: usize = 2;
    /// Per-axis distance below which past and now count as the same point
    pub const MOVE_EPSILON: f32 = 0.001;
}

/// Spatial structures
pub mod spatial {
    /// Collision blockmap cell size (map units)
    pub const BLOCKMAP_CELL_SIZE: f32 = 128.0;
    /// Initial capacity for blockmap cell vectors
    pub const CELL_INITIAL_CAPACITY: usize = 8;
}
