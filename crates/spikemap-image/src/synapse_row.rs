//! Synaptic rows and lists
//!
//! A row holds every synapse leaving one presynaptic atom. A list holds one
//! row per presynaptic atom of a projection. Target indices are global
//! postsynaptic atom indices until the row is packed for a slice.

use core::ops::RangeInclusive;

use crate::ids::SynapseType;

/// Connections of one presynaptic atom
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynapticRow {
    /// Postsynaptic atom indices
    pub target_indices: Vec<u32>,
    /// Weights in model units
    pub weights: Vec<f64>,
    /// Delays in timesteps
    pub delays: Vec<u32>,
    /// Synapse type of each connection
    pub synapse_types: Vec<SynapseType>,
}

impl SynapticRow {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one synapse
    pub fn push(&mut self, target: u32, weight: f64, delay: u32, synapse_type: SynapseType) {
        self.target_indices.push(target);
        self.weights.push(weight);
        self.delays.push(delay);
        self.synapse_types.push(synapse_type);
    }

    /// Number of synapses
    pub fn len(&self) -> usize {
        self.target_indices.len()
    }

    /// True if the row holds no synapses
    pub fn is_empty(&self) -> bool {
        self.target_indices.is_empty()
    }

    /// Iterate `(target, weight, delay, type)` tuples
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64, u32, SynapseType)> + '_ {
        (0..self.len()).map(move |i| {
            (
                self.target_indices[i],
                self.weights[i],
                self.delays[i],
                self.synapse_types[i],
            )
        })
    }

    fn filtered(&self, mut keep: impl FnMut(u32, u32) -> bool) -> SynapticRow {
        let mut row = SynapticRow::new();
        for (target, weight, delay, ty) in self.iter() {
            if keep(target, delay) {
                row.push(target, weight, delay, ty);
            }
        }
        row
    }

    /// Synapses whose target lies in `atoms`
    pub fn sub_row_by_atom(&self, atoms: RangeInclusive<u32>) -> SynapticRow {
        self.filtered(|target, _| atoms.contains(&target))
    }

    /// Synapses whose delay lies in `delays`
    pub fn sub_row_by_delay(&self, delays: RangeInclusive<u32>) -> SynapticRow {
        self.filtered(|_, delay| delays.contains(&delay))
    }

    /// Number of synapses targeting `atoms`
    pub fn n_connections(&self, atoms: RangeInclusive<u32>) -> usize {
        self.target_indices
            .iter()
            .filter(|t| atoms.contains(t))
            .count()
    }

    /// Negate every weight
    pub fn flip_weights(&mut self) {
        for w in &mut self.weights {
            *w = -*w;
        }
    }

    /// Smallest delay, `None` for an empty row
    pub fn min_delay(&self) -> Option<u32> {
        self.delays.iter().copied().min()
    }

    /// Largest delay, `None` for an empty row
    pub fn max_delay(&self) -> Option<u32> {
        self.delays.iter().copied().max()
    }

    /// Largest absolute weight
    pub fn max_abs_weight(&self) -> f64 {
        self.weights.iter().fold(0.0, |m, w| m.max(w.abs()))
    }
}

/// Rows of a projection, one per presynaptic atom
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynapticList {
    rows: Vec<SynapticRow>,
}

impl SynapticList {
    /// Wrap existing rows
    pub fn new(rows: Vec<SynapticRow>) -> Self {
        Self { rows }
    }

    /// Create `n_rows` empty rows
    pub fn with_empty_rows(n_rows: usize) -> Self {
        Self {
            rows: vec![SynapticRow::new(); n_rows],
        }
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// All rows
    pub fn rows(&self) -> &[SynapticRow] {
        &self.rows
    }

    /// All rows, mutably
    pub fn rows_mut(&mut self) -> &mut [SynapticRow] {
        &mut self.rows
    }

    /// Row of one presynaptic atom
    pub fn row(&self, pre_atom: usize) -> Option<&SynapticRow> {
        self.rows.get(pre_atom)
    }

    /// Total number of synapses
    pub fn n_synapses(&self) -> usize {
        self.rows.iter().map(SynapticRow::len).sum()
    }

    /// Largest number of synapses any row in `pre_atoms` has into `post_atoms`
    pub fn max_n_connections(
        &self,
        pre_atoms: RangeInclusive<u32>,
        post_atoms: RangeInclusive<u32>,
    ) -> usize {
        self.rows_in(pre_atoms)
            .map(|row| row.n_connections(post_atoms.clone()))
            .max()
            .unwrap_or(0)
    }

    fn rows_in(&self, pre_atoms: RangeInclusive<u32>) -> impl Iterator<Item = &SynapticRow> {
        let start = (*pre_atoms.start() as usize).min(self.rows.len());
        let end = (*pre_atoms.end() as usize + 1).min(self.rows.len()).max(start);
        self.rows[start..end].iter()
    }

    /// Smallest and largest delay over all rows, `None` if the list is empty
    pub fn min_max_delay(&self) -> Option<(u32, u32)> {
        let min = self.rows.iter().filter_map(SynapticRow::min_delay).min()?;
        let max = self.rows.iter().filter_map(SynapticRow::max_delay).max()?;
        Some((min, max))
    }

    /// Largest absolute weight over all rows
    pub fn max_abs_weight(&self) -> f64 {
        self.rows.iter().fold(0.0, |m, r| m.max(r.max_abs_weight()))
    }

    /// True if any row in `pre_atoms` reaches `post_atoms`
    pub fn is_connected(
        &self,
        pre_atoms: RangeInclusive<u32>,
        post_atoms: RangeInclusive<u32>,
    ) -> bool {
        self.rows_in(pre_atoms)
            .any(|row| row.n_connections(post_atoms.clone()) > 0)
    }

    /// Rows of `pre_atoms` restricted to targets in `post_atoms`
    pub fn atom_sublist(
        &self,
        pre_atoms: RangeInclusive<u32>,
        post_atoms: RangeInclusive<u32>,
    ) -> SynapticList {
        SynapticList::new(
            self.rows_in(pre_atoms)
                .map(|row| row.sub_row_by_atom(post_atoms.clone()))
                .collect(),
        )
    }

    /// Every row restricted to delays in `delays`
    pub fn delay_sublist(&self, delays: RangeInclusive<u32>) -> SynapticList {
        SynapticList::new(
            self.rows
                .iter()
                .map(|row| row.sub_row_by_delay(delays.clone()))
                .collect(),
        )
    }

    /// Negate every weight
    pub fn flip_weights(&mut self) {
        self.rows.iter_mut().for_each(SynapticRow::flip_weights);
    }

    /// Concatenate the rows of `other` onto matching rows of `self`
    pub fn merge(&mut self, other: &SynapticList) {
        if self.rows.len() < other.rows.len() {
            self.rows.resize(other.rows.len(), SynapticRow::new());
        }
        for (dst, src) in self.rows.iter_mut().zip(&other.rows) {
            for (t, w, d, ty) in src.iter() {
                dst.push(t, w, d, ty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> SynapticList {
        let mut a = SynapticRow::new();
        a.push(0, 0.5, 1, SynapseType::Excitatory);
        a.push(5, -0.25, 20, SynapseType::Inhibitory);
        let mut b = SynapticRow::new();
        b.push(3, 1.0, 4, SynapseType::Excitatory);
        SynapticList::new(vec![a, b, SynapticRow::new()])
    }

    #[test]
    fn test_queries() {
        let l = list();
        assert_eq!(l.n_synapses(), 3);
        assert_eq!(l.min_max_delay(), Some((1, 20)));
        assert_eq!(l.max_abs_weight(), 1.0);
        assert_eq!(l.max_n_connections(0..=2, 0..=4), 1);
        assert!(l.is_connected(1..=1, 3..=3));
        assert!(!l.is_connected(2..=2, 0..=10));
    }

    #[test]
    fn test_sublists() {
        let l = list();
        let sub = l.atom_sublist(0..=1, 4..=9);
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.row(0).unwrap().target_indices, vec![5]);
        assert!(sub.row(1).unwrap().is_empty());

        let short = l.delay_sublist(1..=16);
        assert_eq!(short.n_synapses(), 2);
    }

    #[test]
    fn test_flip_and_merge() {
        let mut l = list();
        l.flip_weights();
        assert_eq!(l.row(0).unwrap().weights, vec![-0.5, 0.25]);

        let mut extra = SynapticList::with_empty_rows(4);
        extra.rows_mut()[3].push(1, 0.1, 2, SynapseType::Excitatory);
        l.merge(&extra);
        assert_eq!(l.n_rows(), 4);
        assert_eq!(l.n_synapses(), 4);
    }

    #[test]
    fn test_empty_list_has_no_delay_range() {
        assert_eq!(SynapticList::with_empty_rows(3).min_max_delay(), None);
    }
}
