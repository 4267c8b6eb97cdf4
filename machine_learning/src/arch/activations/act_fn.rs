use super::{LeakyRelu, Sigmoid, Tanh};

/// An element-wise activation function, applied after a layer's affine transform.
#[derive(Clone, Debug)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Tanh(Tanh),
    LeakyRelu(LeakyRelu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn tanh() -> Self {
        ActFn::Tanh(Tanh)
    }

    pub fn leaky_relu(slope: f32) -> Self {
        ActFn::LeakyRelu(LeakyRelu::new(slope))
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Tanh(a) => a.f(x),
            ActFn::LeakyRelu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Tanh(a) => a.df(x),
            ActFn::LeakyRelu(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_df(act_fn: &ActFn, x: f32) -> f32 {
        const H: f32 = 1e-3;
        (act_fn.f(x + H) - act_fn.f(x - H)) / (2. * H)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let act_fns = [ActFn::sigmoid(1.), ActFn::tanh(), ActFn::leaky_relu(0.2)];

        for act_fn in &act_fns {
            for x in [-2.0, -0.5, 0.3, 1.7] {
                let diff = (act_fn.df(x) - numeric_df(act_fn, x)).abs();
                assert!(diff < 1e-2, "{act_fn:?} at {x}: {diff}");
            }
        }
    }
}
