// src/filter.rs - adaptive low-pass (one-euro) filter for fingertip pixels
use std::f64::consts::PI;

use crate::config::FilterConfig;

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc)
fn smoothing_factor(te: f64, cutoff: f64) -> f64 {
    let r = 2.0 * PI * cutoff * te;
    r / (r + 1.0)
}

fn exponential_smoothing(alpha: f64, x: f64, x_prev: f64) -> f64 {
    alpha * x + (1.0 - alpha) * x_prev
}

#[derive(Debug, Clone, Copy)]
struct FilterState {
    x_prev: f64,
    dx_prev: f64,
    t_prev: f64,
}

/// One-euro filter over a single scalar.
///
/// Slow motion is smoothed with `min_cutoff`; the cutoff rises with the
/// filtered speed by `beta`, so fast motion lags less.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    state: Option<FilterState>,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            state: None,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(config.min_cutoff, config.beta, config.d_cutoff)
    }

    /// Filters `x` sampled at time `t` (seconds).
    ///
    /// The first sample seeds the state with zero derivative and is returned as is.
    /// A sample whose timestamp does not advance returns the previous output.
    pub fn filter(&mut self, x: f64, t: f64) -> f64 {
        let state = match &mut self.state {
            Some(state) => state,
            slot @ None => {
                *slot = Some(FilterState {
                    x_prev: x,
                    dx_prev: 0.0,
                    t_prev: t,
                });
                return x;
            }
        };

        let te = t - state.t_prev;
        if te <= 0.0 {
            return state.x_prev;
        }

        let a_d = smoothing_factor(te, self.d_cutoff);
        let dx = (x - state.x_prev) / te;
        let dx_hat = exponential_smoothing(a_d, dx, state.dx_prev);

        let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
        let a = smoothing_factor(te, cutoff);
        let x_hat = exponential_smoothing(a, x, state.x_prev);

        state.x_prev = x_hat;
        state.dx_prev = dx_hat;
        state.t_prev = t;
        x_hat
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Independent filters for the x and y pixel axes of one fingertip.
#[derive(Debug, Clone)]
pub struct PixelFilter {
    x: OneEuroFilter,
    y: OneEuroFilter,
}

impl PixelFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            x: OneEuroFilter::from_config(config),
            y: OneEuroFilter::from_config(config),
        }
    }

    pub fn filter(&mut self, pos: (f64, f64), t: f64) -> (f64, f64) {
        (self.x.filter(pos.0, t), self.y.filter(pos.1, t))
    }
}
