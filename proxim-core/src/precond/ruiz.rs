//! Ruiz equilibration of the stacked problem data.
//!
//! Each sweep measures the infinity norms of the rows and columns of the
//! stacked matrix [P A^T G^T; A; G] (with P contributing symmetrically) and
//! scales both sides by the inverse square root of the norm. The factors
//! accumulate across sweeps and are applied to the stored data in a single
//! pass, so re-applying an existing scaling to identical data reproduces the
//! stored values exactly.

use std::marker::PhantomData;

use super::Preconditioner;
use crate::data::DataStore;

const MIN_SCALE_NORM: f64 = 1e-12;

/// Diagonal Ruiz scaling for a data store `D`.
#[derive(Debug, Clone)]
pub struct RuizEquilibration<D> {
    /// Column (variable) scaling, length n.
    d: Vec<f64>,
    /// Equality row scaling, length p.
    e_eq: Vec<f64>,
    /// Inequality row scaling, length m.
    e_in: Vec<f64>,
    /// `d` gathered at the active lower-bound indices (head live).
    d_lb: Vec<f64>,
    /// `d` gathered at the active upper-bound indices (head live).
    d_ub: Vec<f64>,
    /// Scalar cost factor applied to P and c.
    cost: f64,

    // Sweep scratch.
    col_norm: Vec<f64>,
    row_eq_norm: Vec<f64>,
    row_in_norm: Vec<f64>,

    _marker: PhantomData<D>,
}

fn inv_sqrt_scale(norm: f64) -> f64 {
    if norm > MIN_SCALE_NORM {
        1.0 / norm.sqrt()
    } else {
        1.0
    }
}

impl<D: DataStore> RuizEquilibration<D> {
    fn run_sweeps(&mut self, data: &D, iters: usize) {
        self.d.fill(1.0);
        self.e_eq.fill(1.0);
        self.e_in.fill(1.0);
        self.cost = 1.0;

        for _ in 0..iters {
            self.col_norm.fill(0.0);
            self.row_eq_norm.fill(0.0);
            self.row_in_norm.fill(0.0);

            // Norms of the data with the accumulated scaling applied on the
            // fly; the stored data stays untouched until the final pass.
            {
                let d = &self.d;
                let e_eq = &self.e_eq;
                let e_in = &self.e_in;
                let col_norm = &mut self.col_norm;
                let row_eq_norm = &mut self.row_eq_norm;
                let row_in_norm = &mut self.row_in_norm;
                data.visit_p_utri(|i, j, v| {
                    let sv = (v * d[i] * d[j]).abs();
                    col_norm[j] = col_norm[j].max(sv);
                    if i != j {
                        col_norm[i] = col_norm[i].max(sv);
                    }
                });
                data.visit_a(|con, var, v| {
                    let sv = (v * e_eq[con] * d[var]).abs();
                    col_norm[var] = col_norm[var].max(sv);
                    row_eq_norm[con] = row_eq_norm[con].max(sv);
                });
                data.visit_g(|con, var, v| {
                    let sv = (v * e_in[con] * d[var]).abs();
                    col_norm[var] = col_norm[var].max(sv);
                    row_in_norm[con] = row_in_norm[con].max(sv);
                });
            }

            for j in 0..self.d.len() {
                self.d[j] *= inv_sqrt_scale(self.col_norm[j]);
            }
            for j in 0..self.e_eq.len() {
                self.e_eq[j] *= inv_sqrt_scale(self.row_eq_norm[j]);
            }
            for j in 0..self.e_in.len() {
                self.e_in[j] *= inv_sqrt_scale(self.row_in_norm[j]);
            }
        }
    }

    fn compute_cost_scale(&mut self, data: &D) {
        let mut cost_norm = 0.0_f64;
        for (j, &cj) in data.c().iter().enumerate() {
            cost_norm = cost_norm.max((cj * self.d[j]).abs());
        }
        let d = &self.d;
        data.visit_p_utri(|i, j, v| {
            cost_norm = cost_norm.max((v * d[i] * d[j]).abs());
        });
        self.cost = if cost_norm > MIN_SCALE_NORM {
            1.0 / cost_norm
        } else {
            1.0
        };
    }

    /// Gather `d` at the current bound indices.
    fn refresh_bound_scalings(&mut self, data: &D) {
        for (k, &idx) in data.x_lb_idx()[..data.n_lb()].iter().enumerate() {
            self.d_lb[k] = self.d[idx];
        }
        for (k, &idx) in data.x_ub_idx()[..data.n_ub()].iter().enumerate() {
            self.d_ub[k] = self.d[idx];
        }
    }

    /// Apply the accumulated scaling to the stored (unscaled) data.
    fn apply_scaling(&self, data: &mut D) {
        let cost = self.cost;
        {
            let d = &self.d;
            data.scale_p_utri(|i, j| cost * d[i] * d[j]);
        }
        {
            let d = &self.d;
            let e_eq = &self.e_eq;
            data.scale_a(|con, var| e_eq[con] * d[var]);
        }
        {
            let d = &self.d;
            let e_in = &self.e_in;
            data.scale_g(|con, var| e_in[con] * d[var]);
        }

        for (j, cj) in data.c_mut().iter_mut().enumerate() {
            *cj *= cost * self.d[j];
        }
        for (j, bj) in data.b_mut().iter_mut().enumerate() {
            *bj *= self.e_eq[j];
        }
        for (j, hj) in data.h_mut().iter_mut().enumerate() {
            *hj *= self.e_in[j];
        }

        let n_lb = data.n_lb();
        for (k, v) in data.x_lb_n_mut()[..n_lb].iter_mut().enumerate() {
            *v /= self.d_lb[k];
        }
        let n_ub = data.n_ub();
        for (k, v) in data.x_ub_mut()[..n_ub].iter_mut().enumerate() {
            *v /= self.d_ub[k];
        }
    }
}

fn inf_norm_weighted<W>(v: &[f64], weight: W) -> f64
where
    W: Fn(usize) -> f64,
{
    let mut norm = 0.0_f64;
    for (i, &vi) in v.iter().enumerate() {
        norm = norm.max((vi * weight(i)).abs());
    }
    norm
}

impl<D: DataStore> Preconditioner<D> for RuizEquilibration<D> {
    fn init(data: &D) -> Self {
        let (n, p, m) = (data.n(), data.p(), data.m());
        Self {
            d: vec![1.0; n],
            e_eq: vec![1.0; p],
            e_in: vec![1.0; m],
            d_lb: vec![1.0; n],
            d_ub: vec![1.0; n],
            cost: 1.0,
            col_norm: vec![0.0; n],
            row_eq_norm: vec![0.0; p],
            row_in_norm: vec![0.0; m],
            _marker: PhantomData,
        }
    }

    fn scale_data(&mut self, data: &mut D, reuse: bool, iters: usize, scale_cost: bool) {
        if !reuse {
            self.run_sweeps(data, iters);
            if scale_cost {
                self.compute_cost_scale(data);
            } else {
                self.cost = 1.0;
            }
        }
        self.refresh_bound_scalings(data);
        self.apply_scaling(data);
    }

    fn unscale_data(&self, data: &mut D) {
        let cost = self.cost;
        {
            let d = &self.d;
            data.scale_p_utri(|i, j| 1.0 / (cost * d[i] * d[j]));
        }
        {
            let d = &self.d;
            let e_eq = &self.e_eq;
            data.scale_a(|con, var| 1.0 / (e_eq[con] * d[var]));
        }
        {
            let d = &self.d;
            let e_in = &self.e_in;
            data.scale_g(|con, var| 1.0 / (e_in[con] * d[var]));
        }

        for (j, cj) in data.c_mut().iter_mut().enumerate() {
            *cj /= cost * self.d[j];
        }
        for (j, bj) in data.b_mut().iter_mut().enumerate() {
            *bj /= self.e_eq[j];
        }
        for (j, hj) in data.h_mut().iter_mut().enumerate() {
            *hj /= self.e_in[j];
        }

        let n_lb = data.n_lb();
        for (k, v) in data.x_lb_n_mut()[..n_lb].iter_mut().enumerate() {
            *v *= self.d_lb[k];
        }
        let n_ub = data.n_ub();
        for (k, v) in data.x_ub_mut()[..n_ub].iter_mut().enumerate() {
            *v *= self.d_ub[k];
        }
    }

    fn unscale_primal(&self, x: &mut [f64]) {
        for (i, xi) in x.iter_mut().enumerate() {
            *xi *= self.d[i];
        }
    }

    fn unscale_dual_eq(&self, y: &mut [f64]) {
        for (i, yi) in y.iter_mut().enumerate() {
            *yi *= self.e_eq[i] / self.cost;
        }
    }

    fn unscale_dual_ineq(&self, z: &mut [f64]) {
        for (i, zi) in z.iter_mut().enumerate() {
            *zi *= self.e_in[i] / self.cost;
        }
    }

    fn unscale_dual_lb(&self, z_lb: &mut [f64]) {
        for (k, v) in z_lb.iter_mut().enumerate() {
            *v /= self.cost * self.d_lb[k];
        }
    }

    fn unscale_dual_ub(&self, z_ub: &mut [f64]) {
        for (k, v) in z_ub.iter_mut().enumerate() {
            *v /= self.cost * self.d_ub[k];
        }
    }

    fn unscale_slack_ineq(&self, s: &mut [f64]) {
        for (i, si) in s.iter_mut().enumerate() {
            *si /= self.e_in[i];
        }
    }

    fn unscale_slack_lb(&self, s_lb: &mut [f64]) {
        for (k, v) in s_lb.iter_mut().enumerate() {
            *v *= self.d_lb[k];
        }
    }

    fn unscale_slack_ub(&self, s_ub: &mut [f64]) {
        for (k, v) in s_ub.iter_mut().enumerate() {
            *v *= self.d_ub[k];
        }
    }

    fn unscale_cost(&self, v: f64) -> f64 {
        v / self.cost
    }

    fn norm_primal(&self, x: &[f64]) -> f64 {
        inf_norm_weighted(x, |i| self.d[i])
    }

    fn norm_dual_eq(&self, y: &[f64]) -> f64 {
        inf_norm_weighted(y, |i| self.e_eq[i] / self.cost)
    }

    fn norm_dual_ineq(&self, z: &[f64]) -> f64 {
        inf_norm_weighted(z, |i| self.e_in[i] / self.cost)
    }

    fn norm_dual_lb(&self, z_lb: &[f64]) -> f64 {
        inf_norm_weighted(z_lb, |k| 1.0 / (self.cost * self.d_lb[k]))
    }

    fn norm_dual_ub(&self, z_ub: &[f64]) -> f64 {
        inf_norm_weighted(z_ub, |k| 1.0 / (self.cost * self.d_ub[k]))
    }

    fn norm_primal_res_eq(&self, r: &[f64]) -> f64 {
        inf_norm_weighted(r, |i| 1.0 / self.e_eq[i])
    }

    fn norm_primal_res_ineq(&self, r: &[f64]) -> f64 {
        inf_norm_weighted(r, |i| 1.0 / self.e_in[i])
    }

    fn norm_primal_res_lb(&self, r: &[f64]) -> f64 {
        inf_norm_weighted(r, |k| self.d_lb[k])
    }

    fn norm_primal_res_ub(&self, r: &[f64]) -> f64 {
        inf_norm_weighted(r, |k| self.d_ub[k])
    }

    fn norm_dual_res(&self, r: &[f64]) -> f64 {
        inf_norm_weighted(r, |i| 1.0 / (self.cost * self.d[i]))
    }
}
