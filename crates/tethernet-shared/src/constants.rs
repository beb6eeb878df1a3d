//! Shared numeric defaults. Individual `Config` structs in `tethernet-replication`
//! default to these, and may be overridden per call site.

/// Simulation tick rate used by the prediction/reconciliation movement model.
pub const TICK_RATE_HZ: u32 = 60;

/// Fixed timestep implied by [`TICK_RATE_HZ`], in seconds.
pub const FIXED_DT_SECONDS: f64 = 1.0 / TICK_RATE_HZ as f64;

/// Maximum UDP payload the packet layer targets, matching common MTU-safe
/// practice (1200 bytes leaves headroom under the 1500-byte Ethernet MTU
/// after IP/UDP headers and any tunneling overhead).
pub const MAX_PACKET_SIZE: usize = 1200;

/// Capacity of the snapshot/input ring buffers. Must be a power of two; see
/// `tethernet_replication::ring_buffer`.
pub const DEFAULT_RING_BUFFER_CAPACITY: usize = 64;

/// LZ77 sliding window cap used by the packet layer's custom compressor.
pub const LZ77_WINDOW_SIZE: usize = 256;
