use parking_lot::Mutex;

/// Per-connection source of S7 TPDU references.
///
/// Values stay within `1..=0xFFFF`; after `0xFFFF` the counter restarts
/// at 1, so 0 is never handed out.
#[derive(Debug)]
pub struct TpduGenerator {
    next: Mutex<u16>,
}

impl TpduGenerator {
    pub fn new(initial: u16) -> Self {
        Self {
            next: Mutex::new(initial.max(1)),
        }
    }

    /// Return the current value and advance.
    pub fn next_id(&self) -> u16 {
        let mut guard = self.next.lock();
        let id = *guard;
        *guard = if id == u16::MAX { 1 } else { id + 1 };
        id
    }
}

impl Default for TpduGenerator {
    fn default() -> Self {
        Self::new(10)
    }
}
