/// Selects how the layers with different training and inference behaviour (batch normalization,
/// dropout) run a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Batch norms normalize with the batch statistics and update their running ones, dropout
    /// is active.
    #[default]
    Train,
    /// Batch norms use their running statistics, dropout is the identity.
    Eval,
    /// Batch norms use their running statistics without updating them, dropout is active.
    ///
    /// Back-propagating through a network in this mode leaves its buffers untouched.
    Frozen,
}
