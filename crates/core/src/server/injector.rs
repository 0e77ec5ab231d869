use std::time::Duration;

use tokio::time::Instant;

/// Decides when parameter sets should be re-sent ahead of a non-key frame.
///
/// Players that join mid-GOP, or lose the key frame, can only start decoding
/// once they see SPS/PPS again.
#[derive(Debug)]
pub struct ParamInjector {
    enabled: bool,
    interval: Duration,
    last: Option<Instant>,
}

impl ParamInjector {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            last: None,
        }
    }

    /// Returns `true` when the packetizer should emit parameter sets before this frame.
    ///
    /// Key frames carry their own parameter sets and restart the interval.
    pub fn should_inject(&mut self, key_frame: bool) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Instant::now();
        if key_frame {
            self.last = Some(now);
            return false;
        }
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
