use super::Sigmoid;

/// An elementwise activation function.
///
/// Both `f` and `df` take the *pre-activation* value `z`.
#[derive(Debug, Clone)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Tanh,
    Relu,
    LeakyRelu { alpha: f32 },
    Linear,
}
use ActFn::*;

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Sigmoid(Sigmoid::new(amp))
    }

    pub fn tanh() -> Self {
        Tanh
    }

    pub fn relu() -> Self {
        Relu
    }

    pub fn leaky_relu(alpha: f32) -> Self {
        LeakyRelu { alpha }
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Sigmoid(a) => a.f(z),
            Tanh => z.tanh(),
            Relu => z.max(0.),
            LeakyRelu { alpha } => {
                if z > 0. {
                    z
                } else {
                    alpha * z
                }
            }
            Linear => z,
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            Sigmoid(a) => a.df(z),
            Tanh => 1. - z.tanh().powi(2),
            Relu => (z > 0.) as u8 as f32,
            LeakyRelu { alpha } => {
                if z > 0. {
                    1.
                } else {
                    *alpha
                }
            }
            Linear => 1.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_df(act_fn: &ActFn, z: f32) -> f32 {
        const H: f32 = 1e-3;
        (act_fn.f(z + H) - act_fn.f(z - H)) / (2. * H)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let act_fns = [
            ActFn::sigmoid(1.),
            ActFn::tanh(),
            ActFn::relu(),
            ActFn::leaky_relu(0.2),
            ActFn::Linear,
        ];

        for act_fn in &act_fns {
            for z in [-2.5, -0.7, 0.3, 1.9] {
                let diff = (act_fn.df(z) - numeric_df(act_fn, z)).abs();
                assert!(diff < 1e-2, "{act_fn:?} at {z}: {diff}");
            }
        }
    }

    #[test]
    fn tanh_stays_in_range() {
        for z in [-100., -1., 0., 1., 100.] {
            let a = ActFn::tanh().f(z);
            assert!((-1.0..=1.0).contains(&a));
        }
    }

    #[test]
    fn leaky_relu_scales_negatives() {
        let act_fn = ActFn::leaky_relu(0.2);
        assert_eq!(act_fn.f(-5.), -1.);
        assert_eq!(act_fn.f(3.), 3.);
    }
}
