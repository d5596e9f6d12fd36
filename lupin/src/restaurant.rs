//! Per-document Chinese restaurant: sentences are customers, tables sit
//! on tree leaves and carry a level distribution.

use crate::error::{Result, SamplerError};
use crate::stick_breaking::TruncatedStickBreaking;
use crate::topic_tree::NodeId;
use special::Gamma as SpecialGamma;
use std::collections::{BTreeMap, BTreeSet};

/// Ewens sampling formula: log probability of a partition with block
/// sizes `counts` under concentration `alpha`.
pub fn crp_log_probability(counts: impl IntoIterator<Item = u32>, alpha: f64) -> f64 {
    let mut num_blocks = 0usize;
    let mut total = 0u64;
    let mut gsum = 0.0;
    for n in counts.into_iter().filter(|&n| n > 0) {
        num_blocks += 1;
        total += n as u64;
        gsum += (n as f64).ln_gamma().0;
    }
    gsum + num_blocks as f64 * alpha.ln() + alpha.ln_gamma().0 - (total as f64 + alpha).ln_gamma().0
}

#[derive(Clone, Debug)]
pub struct Table {
    index: usize,
    born: i64,
    leaf: Option<NodeId>,
    stick: TruncatedStickBreaking,
    customers: BTreeSet<usize>,
}

impl Table {
    pub fn new(index: usize, born: i64, stick: TruncatedStickBreaking) -> Self {
        Self {
            index,
            born,
            leaf: None,
            stick,
            customers: BTreeSet::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn born(&self) -> i64 {
        self.born
    }

    /// Leaf of the table's current path
    pub fn leaf(&self) -> Option<NodeId> {
        self.leaf
    }

    pub fn set_leaf(&mut self, leaf: Option<NodeId>) {
        self.leaf = leaf;
    }

    pub fn stick(&self) -> &TruncatedStickBreaking {
        &self.stick
    }

    pub fn stick_mut(&mut self) -> &mut TruncatedStickBreaking {
        &mut self.stick
    }

    /// Sentence indices seated here
    pub fn customers(&self) -> &BTreeSet<usize> {
        &self.customers
    }

    pub fn num_customers(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Restaurant {
    tables: BTreeMap<usize, Table>,
    inactive: BTreeSet<usize>,
}

impl Restaurant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_indices(&self) -> Vec<usize> {
        self.tables.keys().copied().collect()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn total_customers(&self) -> usize {
        self.tables.values().map(Table::num_customers).sum()
    }

    pub fn table(&self, index: usize) -> Result<&Table> {
        self.tables
            .get(&index)
            .ok_or_else(|| SamplerError::InvalidState(format!("no table {}", index)))
    }

    pub fn table_mut(&mut self, index: usize) -> Result<&mut Table> {
        self.tables
            .get_mut(&index)
            .ok_or_else(|| SamplerError::InvalidState(format!("no table {}", index)))
    }

    /// Smallest index not held by an active table
    pub fn next_table_index(&self) -> usize {
        match self.inactive.first() {
            Some(&i) => i,
            None => self.tables.len(),
        }
    }

    pub fn add_table(&mut self, table: Table) -> Result<()> {
        let index = table.index;
        if self.tables.contains_key(&index) {
            return Err(SamplerError::InvalidState(format!("table {} already exists", index)));
        }
        if !self.inactive.remove(&index) {
            let mut upper = self.tables.len() + self.inactive.len();
            while upper < index {
                self.inactive.insert(upper);
                upper += 1;
            }
        }
        self.tables.insert(index, table);
        Ok(())
    }

    pub fn remove_table(&mut self, index: usize) -> Result<Table> {
        let customers = self.table(index)?.num_customers();
        if customers > 0 {
            return Err(SamplerError::InvalidState(format!(
                "table {} still has {} customers",
                index, customers
            )));
        }
        let table = self.tables.remove(&index).ok_or_else(|| {
            SamplerError::InvalidState(format!("cannot remove missing table {}", index))
        })?;
        self.inactive.insert(index);
        Ok(table)
    }

    pub fn add_customer_to_table(&mut self, customer: usize, index: usize) -> Result<()> {
        if !self.table_mut(index)?.customers.insert(customer) {
            return Err(SamplerError::InvalidState(format!(
                "sentence {} already seated at table {}",
                customer, index
            )));
        }
        Ok(())
    }

    /// Returns true if the table is left empty
    pub fn remove_customer_from_table(&mut self, customer: usize, index: usize) -> Result<bool> {
        let table = self.table_mut(index)?;
        if !table.customers.remove(&customer) {
            return Err(SamplerError::InvalidState(format!(
                "sentence {} is not seated at table {}",
                customer, index
            )));
        }
        Ok(table.is_empty())
    }

    /// Ewens probability of the current seating under `alpha`
    pub fn joint_assignment_log_probability(&self, alpha: f64) -> f64 {
        crp_log_probability(self.tables.values().map(|t| t.num_customers() as u32), alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stick() -> TruncatedStickBreaking {
        TruncatedStickBreaking::new(2, 0.3, 50.0)
    }

    #[test]
    fn test_table_index_reuse() {
        let mut rest = Restaurant::new();
        for i in 0..3 {
            assert_eq!(rest.next_table_index(), i);
            rest.add_table(Table::new(i, 0, stick())).unwrap();
            rest.add_customer_to_table(i, i).unwrap();
        }
        assert!(rest.remove_customer_from_table(1, 1).unwrap());
        rest.remove_table(1).unwrap();
        assert_eq!(rest.next_table_index(), 1);
        rest.add_table(Table::new(1, 1, stick())).unwrap();
        assert_eq!(rest.next_table_index(), 3);
    }

    #[test]
    fn test_sparse_table_indices_leave_gaps_free() {
        let mut rest = Restaurant::new();
        rest.add_table(Table::new(3, 0, stick())).unwrap();
        assert_eq!(rest.next_table_index(), 0);
        rest.add_table(Table::new(0, 0, stick())).unwrap();
        assert_eq!(rest.next_table_index(), 1);
        assert!(rest.add_table(Table::new(3, 0, stick())).is_err());
    }

    #[test]
    fn test_customer_bookkeeping_errors() {
        let mut rest = Restaurant::new();
        rest.add_table(Table::new(0, 0, stick())).unwrap();
        rest.add_customer_to_table(4, 0).unwrap();
        assert!(rest.add_customer_to_table(4, 0).is_err());
        assert!(rest.remove_customer_from_table(5, 0).is_err());
        assert!(rest.remove_table(0).is_err());
        assert!(rest.add_customer_to_table(1, 7).is_err());
        assert_eq!(rest.total_customers(), 1);
    }

    #[test]
    fn test_ewens_formula() {
        // one table of two: alpha / (alpha) * 1 / (1 + alpha)
        let alpha: f64 = 2.0;
        assert_abs_diff_eq!(
            crp_log_probability([2], alpha),
            (1.0 / (1.0 + alpha)).ln(),
            epsilon = 1e-12
        );
        // two singletons: alpha / (1 + alpha)
        assert_abs_diff_eq!(
            crp_log_probability([1, 1], alpha),
            (alpha / (1.0 + alpha)).ln(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(crp_log_probability(std::iter::empty(), alpha), 0.0, epsilon = 1e-12);
    }
}
