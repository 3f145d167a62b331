//! Behavioral models evaluated by the simulation kernel.
//!
//! A model declares the signals it is sensitive to; whenever one of them
//! changes in a delta cycle the kernel calls [`Model::eval`] with a view
//! of the settled signal state. Returned updates are applied in the next
//! delta, so downstream observers see pre-update values at the triggering
//! edge, as with nonblocking assignments.

use std::collections::HashSet;

use crate::kernel::{SignalId, SignalState};

/// Read-only view of the signal store during one delta cycle.
pub struct SignalView<'a> {
    signals: &'a [SignalState],
    changed: &'a HashSet<SignalId>,
}

impl<'a> SignalView<'a> {
    pub(crate) fn new(signals: &'a [SignalState], changed: &'a HashSet<SignalId>) -> Self {
        SignalView { signals, changed }
    }

    /// The signal's settled value in this delta.
    pub fn value(&self, id: SignalId) -> i64 {
        self.signals[id.as_raw() as usize].value
    }

    /// The signal's value before this delta.
    pub fn prev(&self, id: SignalId) -> i64 {
        self.signals[id.as_raw() as usize].prev
    }

    /// True if the signal changed in this delta.
    pub fn changed(&self, id: SignalId) -> bool {
        self.changed.contains(&id)
    }

    /// True if the signal transitioned low-to-high in this delta.
    pub fn rose(&self, id: SignalId) -> bool {
        self.changed(id) && self.prev(id) == 0 && self.value(id) != 0
    }

    /// True if the signal transitioned high-to-low in this delta.
    pub fn fell(&self, id: SignalId) -> bool {
        self.changed(id) && self.prev(id) != 0 && self.value(id) == 0
    }
}

/// A behavioral hardware model.
pub trait Model {
    /// Signals whose changes wake this model.
    fn sensitivity(&self) -> Vec<SignalId>;

    /// Reacts to a delta cycle; returned `(signal, value)` pairs are
    /// applied in the next delta.
    fn eval(&mut self, view: &SignalView<'_>) -> Vec<(SignalId, i64)>;
}

/// A rising-edge D flip-flop: `q` follows `d` one delta after each rising
/// `clk` edge.
pub struct Dff {
    clk: SignalId,
    d: SignalId,
    q: SignalId,
}

impl Dff {
    /// Builds a flip-flop over the given signals.
    pub fn new(clk: SignalId, d: SignalId, q: SignalId) -> Self {
        Dff { clk, d, q }
    }
}

impl Model for Dff {
    fn sensitivity(&self) -> Vec<SignalId> {
        vec![self.clk]
    }

    fn eval(&mut self, view: &SignalView<'_>) -> Vec<(SignalId, i64)> {
        if view.rose(self.clk) {
            vec![(self.q, view.value(self.d))]
        } else {
            Vec::new()
        }
    }
}

/// Signal bundle for [`AxiLiteRegFile`].
#[derive(Clone, Copy)]
pub struct AxiLitePorts {
    /// Clock.
    pub clk: SignalId,
    /// Write-address channel: address, valid, ready.
    pub awaddr: SignalId,
    /// Write-address valid.
    pub awvalid: SignalId,
    /// Write-data channel: data, valid.
    pub wdata: SignalId,
    /// Write-data valid.
    pub wvalid: SignalId,
    /// Write-response valid.
    pub bvalid: SignalId,
    /// Write-response ready (driven by the master).
    pub bready: SignalId,
    /// Read-address channel: address, valid.
    pub araddr: SignalId,
    /// Read-address valid.
    pub arvalid: SignalId,
    /// Read-data value.
    pub rdata: SignalId,
    /// Read-data valid.
    pub rvalid: SignalId,
    /// Read-data ready (driven by the master).
    pub rready: SignalId,
}

/// A word-addressed AXI-Lite register file.
///
/// Address and write channels are accepted in the same cycle (the slave
/// is always ready); responses assert `bvalid`/`rvalid` one delta after
/// the accepting edge and drop them after the master's ready handshake.
/// Byte addresses are word-aligned by dropping the two low bits.
pub struct AxiLiteRegFile {
    ports: AxiLitePorts,
    words: Vec<i64>,
}

impl AxiLiteRegFile {
    /// A register file with `words` 32-bit locations.
    pub fn new(ports: AxiLitePorts, words: usize) -> Self {
        AxiLiteRegFile {
            ports,
            words: vec![0; words],
        }
    }

    fn word_index(&self, byte_addr: i64) -> usize {
        ((byte_addr as usize) >> 2) % self.words.len()
    }
}

impl Model for AxiLiteRegFile {
    fn sensitivity(&self) -> Vec<SignalId> {
        vec![self.ports.clk]
    }

    fn eval(&mut self, view: &SignalView<'_>) -> Vec<(SignalId, i64)> {
        if !view.rose(self.ports.clk) {
            return Vec::new();
        }
        let p = self.ports;
        let mut updates = Vec::new();

        if view.value(p.bvalid) != 0 {
            if view.value(p.bready) != 0 {
                updates.push((p.bvalid, 0));
            }
        } else if view.value(p.awvalid) != 0 && view.value(p.wvalid) != 0 {
            let index = self.word_index(view.value(p.awaddr));
            self.words[index] = view.value(p.wdata) & 0xFFFF_FFFF;
            updates.push((p.bvalid, 1));
        }

        if view.value(p.rvalid) != 0 {
            if view.value(p.rready) != 0 {
                updates.push((p.rvalid, 0));
            }
        } else if view.value(p.arvalid) != 0 {
            let index = self.word_index(view.value(p.araddr));
            updates.push((p.rdata, self.words[index]));
            updates.push((p.rvalid, 1));
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(values: &[(i64, i64)]) -> Vec<SignalState> {
        values
            .iter()
            .enumerate()
            .map(|(i, (value, prev))| SignalState {
                name: format!("s{i}"),
                value: *value,
                prev: *prev,
            })
            .collect()
    }

    #[test]
    fn dff_latches_on_rising_edge_only() {
        let clk = SignalId::from_raw(0);
        let d = SignalId::from_raw(1);
        let q = SignalId::from_raw(2);
        let mut dff = Dff::new(clk, d, q);

        let signals = state(&[(1, 0), (7, 7), (0, 0)]);
        let changed: HashSet<SignalId> = [clk].into_iter().collect();
        let view = SignalView::new(&signals, &changed);
        assert_eq!(dff.eval(&view), vec![(q, 7)]);

        // Falling edge: no latch.
        let signals = state(&[(0, 1), (7, 7), (7, 7)]);
        let view = SignalView::new(&signals, &changed);
        assert!(dff.eval(&view).is_empty());
    }

    #[test]
    fn view_edge_helpers() {
        let s = state(&[(1, 0), (0, 1), (5, 5)]);
        let changed: HashSet<SignalId> =
            [SignalId::from_raw(0), SignalId::from_raw(1)].into_iter().collect();
        let view = SignalView::new(&s, &changed);
        assert!(view.rose(SignalId::from_raw(0)));
        assert!(view.fell(SignalId::from_raw(1)));
        assert!(!view.changed(SignalId::from_raw(2)));
    }
}
