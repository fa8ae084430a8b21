use rayon::prelude::*;

use crate::{MlErr, Result};

/// Clamps every value of `params` into `[-c, c]`.
///
/// This is the weight clipping step of a WGAN critic, it keeps the critic (approximately)
/// K-Lipschitz.
///
/// # Errors
/// An `InvalidClipValue` if `c` is not positive and finite.
pub fn clip_params(params: &mut [f32], c: f32) -> Result<()> {
    if !c.is_finite() || c <= 0. {
        return Err(MlErr::InvalidClipValue(c));
    }

    params.par_iter_mut().for_each(|p| *p = p.clamp(-c, c));
    Ok(())
}
