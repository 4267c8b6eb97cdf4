/// A source of initial parameter values.
pub trait ParamGen {
    /// Samples `n` values from this generator.
    ///
    /// # Arguments
    /// * `n` - The amount of values to sample.
    ///
    /// # Returns
    /// The sampled values, or `None` if the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}
