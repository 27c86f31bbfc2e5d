//! GC object header
//!
//! Every heap object carries a header with the collector's per-object bits.

/// Collector bits stored next to each heap object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcHeader {
    /// Mark bit for GC (true = reachable)
    marked: bool,

    /// Finalizer still pending
    finalizable: bool,

    /// Runtime bridge object (loader bridge or static instance)
    bridge: bool,
}

impl GcHeader {
    /// Create a new GC header
    pub fn new(finalizable: bool, bridge: bool) -> Self {
        Self {
            marked: false,
            finalizable,
            bridge,
        }
    }

    /// Check if this object is marked
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Mark this object as reachable; returns false if it already was
    #[inline]
    pub fn mark(&mut self) -> bool {
        !std::mem::replace(&mut self.marked, true)
    }

    /// Unmark this object (for next GC cycle)
    #[inline]
    pub fn unmark(&mut self) {
        self.marked = false;
    }

    /// Check if the finalizer has not run yet
    #[inline]
    pub fn is_finalizable(&self) -> bool {
        self.finalizable
    }

    /// Queue for finalization: the object survives this cycle only
    #[inline]
    pub fn clear_finalizable(&mut self) {
        self.finalizable = false;
    }

    /// Check if this is a runtime bridge object
    #[inline]
    pub fn is_bridge(&self) -> bool {
        self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_mark_unmark() {
        let mut header = GcHeader::new(false, false);
        assert!(!header.is_marked());

        assert!(header.mark());
        assert!(header.is_marked());
        assert!(!header.mark());

        header.unmark();
        assert!(!header.is_marked());
    }

    #[test]
    fn test_header_finalizable() {
        let mut header = GcHeader::new(true, false);
        assert!(header.is_finalizable());

        header.clear_finalizable();
        assert!(!header.is_finalizable());
        assert!(!header.is_bridge());
    }
}
