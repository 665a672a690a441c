//! Engine configuration.

/// Connection-wide configuration knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// SETTINGS_MAX_FRAME_SIZE advertised to the peer.
    pub max_frame_size: u32,
    /// SETTINGS_INITIAL_WINDOW_SIZE advertised to the peer (per-stream
    /// receive window).
    pub initial_window_size: u32,
    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to the peer. `None`
    /// leaves it unlimited and omits the parameter.
    pub max_concurrent_streams: Option<u32>,
    /// Connection-level receive window the engine maintains via
    /// WINDOW_UPDATE replenishment.
    pub connection_window_size: u32,
    /// When true, small writes are batched and flushed lazily; when false,
    /// every frame is flushed immediately (lower latency, more syscalls).
    pub flush_delay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: 16384,
            initial_window_size: 65535,
            max_concurrent_streams: None,
            connection_window_size: 65535,
            flush_delay: false,
        }
    }
}
