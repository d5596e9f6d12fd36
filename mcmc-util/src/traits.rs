/// A sample that can be stored in a [`crate::McmcChain`] and summarized
/// element-wise.
pub trait ChainSample: Clone {
    /// Number of scalar components
    fn dim(&self) -> usize;

    /// Flat view of the scalar components
    fn as_slice(&self) -> &[f64];
}

impl ChainSample for Vec<f64> {
    fn dim(&self) -> usize {
        self.len()
    }

    fn as_slice(&self) -> &[f64] {
        self
    }
}

impl<const N: usize> ChainSample for [f64; N] {
    fn dim(&self) -> usize {
        N
    }

    fn as_slice(&self) -> &[f64] {
        &self[..]
    }
}
