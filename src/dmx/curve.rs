// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Fade curve types. Each maps normalized elapsed time to normalized progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeCurve {
    #[default]
    Linear,
    Quadratic,
    Cubic,
    Sine,
    Exponential,
}

impl FadeCurve {
    /// Transforms the given progress (0.0-1.0) along this curve.
    pub fn apply(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => p,
            FadeCurve::Quadratic => p * p,
            FadeCurve::Cubic => p * p * p,
            FadeCurve::Sine => (1.0 - (p * PI).cos()) / 2.0,
            FadeCurve::Exponential => 2f64.powf(10.0 * (p - 1.0)),
        }
    }

    /// The channel value at the given progress between start and target.
    pub fn interpolate(&self, start: u8, target: u8, progress: f64) -> u8 {
        let start_f = f64::from(start);
        let value = start_f + (f64::from(target) - start_f) * self.apply(progress);
        let (low, high) = (start.min(target), start.max(target));
        value.round().clamp(f64::from(low), f64::from(high)) as u8
    }
}
