//! Solver driver: setup, update, and the proximal outer loop with a
//! Mehrotra-style predictor-corrector inner step.

use std::time::Instant;

use nalgebra::DMatrix;

use super::workspace::Workspace;
use crate::data::{DataStore, DenseData, SparseData};
use crate::kkt::{DataChanges, DenseKkt, KktOperator, Scalings, SparseKkt};
use crate::linalg::sparse::SparseCsc;
use crate::precond::{Preconditioner, RuizEquilibration};
use crate::problem::{ProblemError, Settings, SolverResult, Status};

/// Generic proximal interior-point solver.
///
/// The data store, preconditioner and KKT operator are chosen at
/// instantiation; see [`DenseSolver`] and [`SparseSolver`].
pub struct Solver<D, P, K> {
    settings: Settings,
    data: D,
    precond: P,
    kkt: K,
    result: SolverResult,
    ws: Workspace,
    /// The KKT operator still carries the scalings staged at init.
    kkt_fresh: bool,
    primal_rel_inf: f64,
    dual_rel_inf: f64,
}

/// Dense-backend solver.
pub type DenseSolver = Solver<DenseData, RuizEquilibration<DenseData>, DenseKkt>;

/// Sparse-backend solver.
pub type SparseSolver = Solver<SparseData, RuizEquilibration<SparseData>, SparseKkt>;

#[inline]
fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(ai, bi)| ai * bi).sum()
}

/// Shrink `alpha` so that `v + alpha * dv` stays non-negative.
#[inline]
fn boundary_step(v: &[f64], dv: &[f64], alpha: &mut f64) {
    for (vi, dvi) in v.iter().zip(dv) {
        if *dvi < 0.0 {
            *alpha = alpha.min(-vi / dvi);
        }
    }
}

impl<D, P, K> Solver<D, P, K>
where
    D: DataStore,
    P: Preconditioner<D>,
    K: KktOperator<D>,
{
    /// Build a solver around a populated data store.
    fn setup_from_data(mut data: D, settings: Settings) -> Self {
        let timer = settings.compute_timings.then(Instant::now);
        let (n, p, m) = (data.n(), data.p(), data.m());

        let mut result = SolverResult {
            x: vec![0.0; n],
            y: vec![0.0; p],
            z: vec![0.0; m],
            z_lb: vec![0.0; n],
            z_ub: vec![0.0; n],
            s: vec![0.0; m],
            s_lb: vec![0.0; n],
            s_ub: vec![0.0; n],
            zeta: vec![0.0; n],
            lambda: vec![0.0; p],
            nu: vec![0.0; m],
            nu_lb: vec![0.0; n],
            nu_ub: vec![0.0; n],
            ..Default::default()
        };
        result.info.rho = settings.rho_init;
        result.info.delta = settings.delta_init;

        let mut precond = P::init(&data);
        precond.scale_data(
            &mut data,
            false,
            settings.preconditioner_iter,
            settings.preconditioner_scale_cost,
        );
        let kkt = K::init(&data, result.info.rho, result.info.delta);

        let ws = Workspace::new(n, p, m);
        let mut solver = Self {
            settings,
            data,
            precond,
            kkt,
            result,
            ws,
            kkt_fresh: true,
            primal_rel_inf: 0.0,
            dual_rel_inf: 0.0,
        };
        if let Some(t) = timer {
            let dt = t.elapsed().as_secs_f64();
            solver.result.info.setup_time = dt;
            solver.result.info.run_time += dt;
        }
        solver
    }

    /// Mutable access to the settings block.
    pub fn settings(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// The latest result.
    pub fn result(&self) -> &SolverResult {
        &self.result
    }

    /// Run the solver on the stored problem.
    pub fn solve(&mut self) -> Status {
        let timer = self.settings.compute_timings.then(Instant::now);

        if self.settings.verbose {
            println!("----------------------------------------------------------");
            println!("                       proxim                             ");
            println!("----------------------------------------------------------");
            println!("variables n = {}", self.data.n());
            println!("equality constraints p = {}", self.data.p());
            println!("inequality constraints m = {}", self.data.m());
            println!("variable lower bounds n_lb = {}", self.data.n_lb());
            println!("variable upper bounds n_ub = {}", self.data.n_ub());
            println!();
            println!(
                "iter  prim_cost      dual_cost      prim_inf     dual_inf     \
                 rho        delta      mu         prim_step  dual_step"
            );
        }

        let status = self.solve_impl();

        self.unscale_results();
        self.restore_box_dual();

        if let Some(t) = timer {
            let dt = t.elapsed().as_secs_f64();
            self.result.info.solve_time = dt;
            self.result.info.run_time += dt;
        }

        if self.settings.verbose {
            println!();
            println!("status:               {}", status);
            println!("number of iterations: {}", self.result.info.iter);
            if self.settings.compute_timings {
                println!("total run time:       {:.3e}s", self.result.info.run_time);
                println!("  setup time:         {:.3e}s", self.result.info.setup_time);
                println!("  update time:        {:.3e}s", self.result.info.update_time);
                println!("  solve time:         {:.3e}s", self.result.info.solve_time);
            }
        }

        status
    }

    fn solve_impl(&mut self) -> Status {
        if !self.settings.verify_settings() {
            self.result.info.status = Status::InvalidSettings;
            return Status::InvalidSettings;
        }

        let n_lb = self.data.n_lb();
        let n_ub = self.data.n_ub();
        let m = self.data.m();
        // Total complementarity dimension across the three slack pieces.
        let n_comp = m + n_lb + n_ub;

        self.result.info.status = Status::Unsolved;
        self.result.info.iter = 0;
        self.result.info.reg_limit = self.settings.reg_lower_limit;
        self.result.info.factor_retires = 0;
        self.result.info.no_primal_update = 0;
        self.result.info.no_dual_update = 0;
        self.result.info.mu = 0.0;
        self.result.info.primal_step = 0.0;
        self.result.info.dual_step = 0.0;

        if !self.kkt_fresh {
            // No scaling state carried over: restart from unit slacks.
            self.result.info.rho = self.settings.rho_init;
            self.result.info.delta = self.settings.delta_init;

            self.result.s.fill(1.0);
            self.result.s_lb[..n_lb].fill(1.0);
            self.result.s_ub[..n_ub].fill(1.0);
            self.result.z.fill(1.0);
            self.result.z_lb[..n_lb].fill(1.0);
            self.result.z_ub[..n_ub].fill(1.0);
            self.kkt.update_scalings(
                &self.data,
                self.result.info.rho,
                self.result.info.delta,
                Scalings {
                    s: &self.result.s,
                    s_lb: &self.result.s_lb[..n_lb],
                    s_ub: &self.result.s_ub[..n_ub],
                    z: &self.result.z,
                    z_lb: &self.result.z_lb[..n_lb],
                    z_ub: &self.result.z_ub[..n_ub],
                },
            );
        }

        while !self.kkt.factorize(&self.data) {
            if self.result.info.factor_retires < self.settings.max_factor_retires {
                self.result.info.delta *= 100.0;
                self.result.info.rho *= 100.0;
                self.result.info.factor_retires += 1;
                self.result.info.reg_limit =
                    (10.0 * self.result.info.reg_limit).min(self.settings.feas_tol_abs);
            } else {
                self.result.info.status = Status::Numerics;
                return Status::Numerics;
            }
        }
        self.result.info.factor_retires = 0;

        // Initial Newton solve from the problem vectors.
        for (ri, &ci) in self.ws.rx.iter_mut().zip(self.data.c()) {
            *ri = -ci;
        }
        self.ws.rs.fill(0.0);
        self.ws.rs_lb.fill(0.0);
        self.ws.rs_ub.fill(0.0);
        self.kkt.solve(
            &self.data,
            &self.ws.rx,
            self.data.b(),
            self.data.h(),
            &self.data.x_lb_n()[..n_lb],
            &self.data.x_ub()[..n_ub],
            &self.ws.rs,
            &self.ws.rs_lb[..n_lb],
            &self.ws.rs_ub[..n_ub],
            &mut self.result.x,
            &mut self.result.y,
            &mut self.result.z,
            &mut self.result.z_lb[..n_lb],
            &mut self.result.z_ub[..n_ub],
            &mut self.result.s,
            &mut self.result.s_lb[..n_lb],
            &mut self.result.s_ub[..n_ub],
        );

        if n_comp > 0 {
            let mut s_norm = inf_norm(&self.result.s);
            s_norm = s_norm.max(inf_norm(&self.result.s_lb[..n_lb]));
            s_norm = s_norm.max(inf_norm(&self.result.s_ub[..n_ub]));
            if s_norm <= 1e-4 {
                // 0.1 is arbitrary
                self.result.s.fill(0.1);
                self.result.s_lb[..n_lb].fill(0.1);
                self.result.s_ub[..n_ub].fill(0.1);
                self.result.z.fill(0.1);
                self.result.z_lb[..n_lb].fill(0.1);
                self.result.z_ub[..n_ub].fill(0.1);
            }

            let min_coeff = |v: &[f64]| v.iter().fold(f64::INFINITY, |a, &x| a.min(x));
            let mut delta_s = 0.0_f64;
            let mut delta_z = 0.0_f64;
            if m > 0 {
                delta_s = delta_s.max(-1.5 * min_coeff(&self.result.s));
                delta_z = delta_z.max(-1.5 * min_coeff(&self.result.z));
            }
            if n_lb > 0 {
                delta_s = delta_s.max(-1.5 * min_coeff(&self.result.s_lb[..n_lb]));
                delta_z = delta_z.max(-1.5 * min_coeff(&self.result.z_lb[..n_lb]));
            }
            if n_ub > 0 {
                delta_s = delta_s.max(-1.5 * min_coeff(&self.result.s_ub[..n_ub]));
                delta_z = delta_z.max(-1.5 * min_coeff(&self.result.z_ub[..n_ub]));
            }

            let mut tmp_prod = 0.0;
            let mut sum_s = 0.0;
            let mut sum_z = 0.0;
            {
                let mut accumulate = |s: &[f64], z: &[f64]| {
                    for (si, zi) in s.iter().zip(z) {
                        tmp_prod += (si + delta_s) * (zi + delta_z);
                        sum_s += si;
                        sum_z += zi;
                    }
                };
                accumulate(&self.result.s, &self.result.z);
                accumulate(&self.result.s_lb[..n_lb], &self.result.z_lb[..n_lb]);
                accumulate(&self.result.s_ub[..n_ub], &self.result.z_ub[..n_ub]);
            }
            let nn = n_comp as f64;
            let delta_s_bar = delta_s + 0.5 * tmp_prod / (sum_z + nn * delta_z);
            let delta_z_bar = delta_z + 0.5 * tmp_prod / (sum_s + nn * delta_s);

            for si in self.result.s.iter_mut() {
                *si += delta_s_bar;
            }
            for si in self.result.s_lb[..n_lb].iter_mut() {
                *si += delta_s_bar;
            }
            for si in self.result.s_ub[..n_ub].iter_mut() {
                *si += delta_s_bar;
            }
            for zi in self.result.z.iter_mut() {
                *zi += delta_z_bar;
            }
            for zi in self.result.z_lb[..n_lb].iter_mut() {
                *zi += delta_z_bar;
            }
            for zi in self.result.z_ub[..n_ub].iter_mut() {
                *zi += delta_z_bar;
            }

            self.result.info.mu = (dot(&self.result.s, &self.result.z)
                + dot(&self.result.s_lb[..n_lb], &self.result.z_lb[..n_lb])
                + dot(&self.result.s_ub[..n_ub], &self.result.z_ub[..n_ub]))
                / nn;
        }

        self.result.zeta.copy_from_slice(&self.result.x);
        self.result.lambda.copy_from_slice(&self.result.y);
        self.result.nu.copy_from_slice(&self.result.z);
        self.result.nu_lb[..n_lb].copy_from_slice(&self.result.z_lb[..n_lb]);
        self.result.nu_ub[..n_ub].copy_from_slice(&self.result.z_ub[..n_ub]);

        while self.result.info.iter < self.settings.max_iter {
            if self.result.info.iter == 0 {
                self.update_nr_residuals();
            }

            let mut primal_inf = self.precond.norm_primal_res_eq(&self.ws.ry_nr);
            primal_inf = primal_inf.max(self.precond.norm_primal_res_ineq(&self.ws.rz_nr));
            primal_inf =
                primal_inf.max(self.precond.norm_primal_res_lb(&self.ws.rz_lb_nr[..n_lb]));
            primal_inf =
                primal_inf.max(self.precond.norm_primal_res_ub(&self.ws.rz_ub_nr[..n_ub]));
            let dual_inf = self.precond.norm_dual_res(&self.ws.rx_nr);
            self.result.info.primal_inf = primal_inf;
            self.result.info.dual_inf = dual_inf;

            if self.settings.verbose {
                self.print_progress();
            }

            if primal_inf < self.settings.feas_tol_abs + self.settings.feas_tol_rel * self.primal_rel_inf
                && dual_inf < self.settings.feas_tol_abs + self.settings.feas_tol_rel * self.dual_rel_inf
                && self.result.info.mu < self.settings.dual_tol
            {
                self.result.info.status = Status::Solved;
                return Status::Solved;
            }

            let rho = self.result.info.rho;
            let delta = self.result.info.delta;

            for i in 0..self.ws.rx.len() {
                self.ws.rx[i] = self.ws.rx_nr[i] - rho * (self.result.x[i] - self.result.zeta[i]);
            }
            for j in 0..self.ws.ry.len() {
                self.ws.ry[j] =
                    self.ws.ry_nr[j] - delta * (self.result.lambda[j] - self.result.y[j]);
            }
            for k in 0..self.ws.rz.len() {
                self.ws.rz[k] = self.ws.rz_nr[k] - delta * (self.result.nu[k] - self.result.z[k]);
            }
            for i in 0..n_lb {
                self.ws.rz_lb[i] = self.ws.rz_lb_nr[i]
                    - delta * (self.result.nu_lb[i] - self.result.z_lb[i]);
            }
            for i in 0..n_ub {
                self.ws.rz_ub[i] = self.ws.rz_ub_nr[i]
                    - delta * (self.result.nu_ub[i] - self.result.z_ub[i]);
            }

            // Infeasibility tests on the proximal gaps (directions double as
            // scratch here; they are rewritten by the next KKT solve).
            for j in 0..self.ws.dy.len() {
                self.ws.dy[j] = self.result.lambda[j] - self.result.y[j];
            }
            let mut dual_prox_inf = self.precond.norm_dual_eq(&self.ws.dy);
            for k in 0..self.ws.dz.len() {
                self.ws.dz[k] = self.result.nu[k] - self.result.z[k];
            }
            dual_prox_inf = dual_prox_inf.max(self.precond.norm_dual_ineq(&self.ws.dz));
            for i in 0..n_lb {
                self.ws.dz_lb[i] = self.result.nu_lb[i] - self.result.z_lb[i];
            }
            dual_prox_inf =
                dual_prox_inf.max(self.precond.norm_dual_lb(&self.ws.dz_lb[..n_lb]));
            for i in 0..n_ub {
                self.ws.dz_ub[i] = self.result.nu_ub[i] - self.result.z_ub[i];
            }
            dual_prox_inf =
                dual_prox_inf.max(self.precond.norm_dual_ub(&self.ws.dz_ub[..n_ub]));

            let mut dual_res_inf = self.precond.norm_primal_res_eq(&self.ws.ry);
            dual_res_inf = dual_res_inf.max(self.precond.norm_primal_res_ineq(&self.ws.rz));
            dual_res_inf =
                dual_res_inf.max(self.precond.norm_primal_res_lb(&self.ws.rz_lb[..n_lb]));
            dual_res_inf =
                dual_res_inf.max(self.precond.norm_primal_res_ub(&self.ws.rz_ub[..n_ub]));

            if self.result.info.no_dual_update > 5
                && dual_prox_inf > 1e10
                && dual_res_inf < self.settings.feas_tol_abs
            {
                self.result.info.status = Status::PrimalInfeasible;
                return Status::PrimalInfeasible;
            }

            for i in 0..self.ws.dx.len() {
                self.ws.dx[i] = self.result.x[i] - self.result.zeta[i];
            }
            if self.result.info.no_primal_update > 5
                && self.precond.norm_primal(&self.ws.dx) > 1e10
                && self.precond.norm_dual_res(&self.ws.rx) < self.settings.feas_tol_abs
            {
                self.result.info.status = Status::DualInfeasible;
                return Status::DualInfeasible;
            }

            self.result.info.iter += 1;

            // Stagnating at the regularization floor can hide a better
            // optimum; give the floor one chance to drop further.
            if (self.result.info.no_primal_update > 5
                && self.result.info.rho == self.result.info.reg_limit
                && self.result.info.reg_limit != 1e-13)
                || (self.result.info.no_dual_update > 5
                    && self.result.info.delta == self.result.info.reg_limit
                    && self.result.info.reg_limit != 1e-13)
            {
                self.result.info.reg_limit = 1e-13;
                self.result.info.no_primal_update = 0;
                self.result.info.no_dual_update = 0;
            }

            self.kkt.update_scalings(
                &self.data,
                self.result.info.rho,
                self.result.info.delta,
                Scalings {
                    s: &self.result.s,
                    s_lb: &self.result.s_lb[..n_lb],
                    s_ub: &self.result.s_ub[..n_ub],
                    z: &self.result.z,
                    z_lb: &self.result.z_lb[..n_lb],
                    z_ub: &self.result.z_ub[..n_ub],
                },
            );
            self.kkt_fresh = false;
            if !self.kkt.factorize(&self.data) {
                if self.result.info.factor_retires < self.settings.max_factor_retires {
                    self.result.info.delta *= 100.0;
                    self.result.info.rho *= 100.0;
                    self.result.info.iter -= 1;
                    self.result.info.factor_retires += 1;
                    self.result.info.reg_limit =
                        (10.0 * self.result.info.reg_limit).min(self.settings.feas_tol_abs);
                    continue;
                } else {
                    self.result.info.status = Status::Numerics;
                    return Status::Numerics;
                }
            }
            self.result.info.factor_retires = 0;

            if n_comp > 0 {
                // ------------------ predictor step ------------------
                for k in 0..m {
                    self.ws.rs[k] = -self.result.s[k] * self.result.z[k];
                }
                for i in 0..n_lb {
                    self.ws.rs_lb[i] = -self.result.s_lb[i] * self.result.z_lb[i];
                }
                for i in 0..n_ub {
                    self.ws.rs_ub[i] = -self.result.s_ub[i] * self.result.z_ub[i];
                }

                self.kkt.solve(
                    &self.data,
                    &self.ws.rx,
                    &self.ws.ry,
                    &self.ws.rz,
                    &self.ws.rz_lb[..n_lb],
                    &self.ws.rz_ub[..n_ub],
                    &self.ws.rs,
                    &self.ws.rs_lb[..n_lb],
                    &self.ws.rs_ub[..n_ub],
                    &mut self.ws.dx,
                    &mut self.ws.dy,
                    &mut self.ws.dz,
                    &mut self.ws.dz_lb[..n_lb],
                    &mut self.ws.dz_ub[..n_ub],
                    &mut self.ws.ds,
                    &mut self.ws.ds_lb[..n_lb],
                    &mut self.ws.ds_ub[..n_ub],
                );

                // Largest steps keeping the slacks and duals non-negative.
                let mut alpha_s = 1.0_f64;
                let mut alpha_z = 1.0_f64;
                boundary_step(&self.result.s, &self.ws.ds, &mut alpha_s);
                boundary_step(&self.result.z, &self.ws.dz, &mut alpha_z);
                boundary_step(&self.result.s_lb[..n_lb], &self.ws.ds_lb[..n_lb], &mut alpha_s);
                boundary_step(&self.result.z_lb[..n_lb], &self.ws.dz_lb[..n_lb], &mut alpha_z);
                boundary_step(&self.result.s_ub[..n_ub], &self.ws.ds_ub[..n_ub], &mut alpha_s);
                boundary_step(&self.result.z_ub[..n_ub], &self.ws.dz_ub[..n_ub], &mut alpha_z);
                // avoid getting too close to the boundary
                alpha_s *= self.settings.tau;
                alpha_z *= self.settings.tau;

                let mut sigma_num = 0.0;
                for k in 0..m {
                    sigma_num += (self.result.s[k] + alpha_s * self.ws.ds[k])
                        * (self.result.z[k] + alpha_z * self.ws.dz[k]);
                }
                for i in 0..n_lb {
                    sigma_num += (self.result.s_lb[i] + alpha_s * self.ws.ds_lb[i])
                        * (self.result.z_lb[i] + alpha_z * self.ws.dz_lb[i]);
                }
                for i in 0..n_ub {
                    sigma_num += (self.result.s_ub[i] + alpha_s * self.ws.ds_ub[i])
                        * (self.result.z_ub[i] + alpha_z * self.ws.dz_ub[i]);
                }
                let sigma_lin = sigma_num / (self.result.info.mu * n_comp as f64);
                let sigma = sigma_lin * sigma_lin * sigma_lin;
                self.result.info.sigma = sigma;

                // ------------------ corrector step ------------------
                let sigma_mu = sigma * self.result.info.mu;
                for k in 0..m {
                    self.ws.rs[k] += -self.ws.ds[k] * self.ws.dz[k] + sigma_mu;
                }
                for i in 0..n_lb {
                    self.ws.rs_lb[i] += -self.ws.ds_lb[i] * self.ws.dz_lb[i] + sigma_mu;
                }
                for i in 0..n_ub {
                    self.ws.rs_ub[i] += -self.ws.ds_ub[i] * self.ws.dz_ub[i] + sigma_mu;
                }

                self.kkt.solve(
                    &self.data,
                    &self.ws.rx,
                    &self.ws.ry,
                    &self.ws.rz,
                    &self.ws.rz_lb[..n_lb],
                    &self.ws.rz_ub[..n_ub],
                    &self.ws.rs,
                    &self.ws.rs_lb[..n_lb],
                    &self.ws.rs_ub[..n_ub],
                    &mut self.ws.dx,
                    &mut self.ws.dy,
                    &mut self.ws.dz,
                    &mut self.ws.dz_lb[..n_lb],
                    &mut self.ws.dz_ub[..n_ub],
                    &mut self.ws.ds,
                    &mut self.ws.ds_lb[..n_lb],
                    &mut self.ws.ds_ub[..n_ub],
                );

                let mut alpha_s = 1.0_f64;
                let mut alpha_z = 1.0_f64;
                boundary_step(&self.result.s, &self.ws.ds, &mut alpha_s);
                boundary_step(&self.result.z, &self.ws.dz, &mut alpha_z);
                boundary_step(&self.result.s_lb[..n_lb], &self.ws.ds_lb[..n_lb], &mut alpha_s);
                boundary_step(&self.result.z_lb[..n_lb], &self.ws.dz_lb[..n_lb], &mut alpha_z);
                boundary_step(&self.result.s_ub[..n_ub], &self.ws.ds_ub[..n_ub], &mut alpha_s);
                boundary_step(&self.result.z_ub[..n_ub], &self.ws.dz_ub[..n_ub], &mut alpha_z);
                self.result.info.primal_step = alpha_s * self.settings.tau;
                self.result.info.dual_step = alpha_z * self.settings.tau;

                // ------------------ update ------------------
                let primal_step = self.result.info.primal_step;
                let dual_step = self.result.info.dual_step;
                for (xi, dxi) in self.result.x.iter_mut().zip(&self.ws.dx) {
                    *xi += primal_step * dxi;
                }
                for (yi, dyi) in self.result.y.iter_mut().zip(&self.ws.dy) {
                    *yi += dual_step * dyi;
                }
                for (zi, dzi) in self.result.z.iter_mut().zip(&self.ws.dz) {
                    *zi += dual_step * dzi;
                }
                for (zi, dzi) in self.result.z_lb[..n_lb].iter_mut().zip(&self.ws.dz_lb[..n_lb]) {
                    *zi += dual_step * dzi;
                }
                for (zi, dzi) in self.result.z_ub[..n_ub].iter_mut().zip(&self.ws.dz_ub[..n_ub]) {
                    *zi += dual_step * dzi;
                }
                for (si, dsi) in self.result.s.iter_mut().zip(&self.ws.ds) {
                    *si += primal_step * dsi;
                }
                for (si, dsi) in self.result.s_lb[..n_lb].iter_mut().zip(&self.ws.ds_lb[..n_lb]) {
                    *si += primal_step * dsi;
                }
                for (si, dsi) in self.result.s_ub[..n_ub].iter_mut().zip(&self.ws.ds_ub[..n_ub]) {
                    *si += primal_step * dsi;
                }

                let mu_prev = self.result.info.mu;
                self.result.info.mu = (dot(&self.result.s, &self.result.z)
                    + dot(&self.result.s_lb[..n_lb], &self.result.z_lb[..n_lb])
                    + dot(&self.result.s_ub[..n_ub], &self.result.z_ub[..n_ub]))
                    / n_comp as f64;
                let mu_rate = (mu_prev - self.result.info.mu).abs() / mu_prev;

                // ------------------ proximal / regularization update ------------------
                self.update_nr_residuals();

                if self.precond.norm_dual_res(&self.ws.rx_nr) < 0.95 * self.result.info.dual_inf
                {
                    self.result.zeta.copy_from_slice(&self.result.x);
                    self.result.info.rho = self
                        .result
                        .info
                        .reg_limit
                        .max((1.0 - mu_rate) * self.result.info.rho);
                } else {
                    self.result.info.no_primal_update += 1;
                    self.result.info.rho = self
                        .result
                        .info
                        .reg_limit
                        .max((1.0 - 0.666 * mu_rate) * self.result.info.rho);
                }

                let mut primal_nr_inf = self.precond.norm_primal_res_eq(&self.ws.ry_nr);
                primal_nr_inf =
                    primal_nr_inf.max(self.precond.norm_primal_res_ineq(&self.ws.rz_nr));
                primal_nr_inf = primal_nr_inf
                    .max(self.precond.norm_primal_res_lb(&self.ws.rz_lb_nr[..n_lb]));
                primal_nr_inf = primal_nr_inf
                    .max(self.precond.norm_primal_res_ub(&self.ws.rz_ub_nr[..n_ub]));
                if primal_nr_inf < 0.95 * self.result.info.primal_inf {
                    self.result.lambda.copy_from_slice(&self.result.y);
                    self.result.nu.copy_from_slice(&self.result.z);
                    self.result.nu_lb[..n_lb].copy_from_slice(&self.result.z_lb[..n_lb]);
                    self.result.nu_ub[..n_ub].copy_from_slice(&self.result.z_ub[..n_ub]);
                    self.result.info.delta = self
                        .result
                        .info
                        .reg_limit
                        .max((1.0 - mu_rate) * self.result.info.delta);
                } else {
                    self.result.info.no_dual_update += 1;
                    self.result.info.delta = self
                        .result
                        .info
                        .reg_limit
                        .max((1.0 - 0.666 * mu_rate) * self.result.info.delta);
                }
            } else {
                // No complementarity pieces: a single Newton solve with full
                // steps.
                self.kkt.solve(
                    &self.data,
                    &self.ws.rx,
                    &self.ws.ry,
                    &self.ws.rz,
                    &self.ws.rz_lb[..n_lb],
                    &self.ws.rz_ub[..n_ub],
                    &self.ws.rs,
                    &self.ws.rs_lb[..n_lb],
                    &self.ws.rs_ub[..n_ub],
                    &mut self.ws.dx,
                    &mut self.ws.dy,
                    &mut self.ws.dz,
                    &mut self.ws.dz_lb[..n_lb],
                    &mut self.ws.dz_ub[..n_ub],
                    &mut self.ws.ds,
                    &mut self.ws.ds_lb[..n_lb],
                    &mut self.ws.ds_ub[..n_ub],
                );

                self.result.info.primal_step = 1.0;
                self.result.info.dual_step = 1.0;
                for (xi, dxi) in self.result.x.iter_mut().zip(&self.ws.dx) {
                    *xi += dxi;
                }
                for (yi, dyi) in self.result.y.iter_mut().zip(&self.ws.dy) {
                    *yi += dyi;
                }

                // ------------------ proximal / regularization update ------------------
                self.update_nr_residuals();

                if self.precond.norm_dual_res(&self.ws.rx_nr) < 0.95 * self.result.info.dual_inf
                {
                    self.result.zeta.copy_from_slice(&self.result.x);
                    self.result.info.rho =
                        self.result.info.reg_limit.max(0.1 * self.result.info.rho);
                } else {
                    self.result.info.no_primal_update += 1;
                    self.result.info.rho =
                        self.result.info.reg_limit.max(0.5 * self.result.info.rho);
                }

                if self.precond.norm_primal_res_eq(&self.ws.ry_nr)
                    < 0.95 * self.result.info.primal_inf
                {
                    self.result.lambda.copy_from_slice(&self.result.y);
                    self.result.info.delta =
                        self.result.info.reg_limit.max(0.1 * self.result.info.delta);
                } else {
                    self.result.info.no_dual_update += 1;
                    self.result.info.delta =
                        self.result.info.reg_limit.max(0.5 * self.result.info.delta);
                }
            }
        }

        self.result.info.status = Status::MaxIterReached;
        Status::MaxIterReached
    }

    /// Recompute the non-regularized residuals and the relative-infeasibility
    /// reference norms. `dx` is used as a scratch vector.
    fn update_nr_residuals(&mut self) {
        let n_lb = self.data.n_lb();
        let n_ub = self.data.n_ub();

        // rx_nr = -P x - c - A^T y - G^T z + E_lb^T z_lb - E_ub^T z_ub
        self.data.mul_p_sym(&self.result.x, &mut self.ws.rx_nr);
        for v in self.ws.rx_nr.iter_mut() {
            *v = -*v;
        }
        let mut dual_rel_inf = self.precond.norm_dual_res(&self.ws.rx_nr);
        for (v, &ci) in self.ws.rx_nr.iter_mut().zip(self.data.c()) {
            *v -= ci;
        }
        self.data.mul_at(&self.result.y, &mut self.ws.dx);
        dual_rel_inf = dual_rel_inf.max(self.precond.norm_dual_res(&self.ws.dx));
        for (v, &ti) in self.ws.rx_nr.iter_mut().zip(&self.ws.dx) {
            *v -= ti;
        }
        self.data.mul_gt(&self.result.z, &mut self.ws.dx);
        dual_rel_inf = dual_rel_inf.max(self.precond.norm_dual_res(&self.ws.dx));
        for (v, &ti) in self.ws.rx_nr.iter_mut().zip(&self.ws.dx) {
            *v -= ti;
        }
        self.ws.dx.fill(0.0);
        for (i, &idx) in self.data.x_lb_idx()[..n_lb].iter().enumerate() {
            self.ws.dx[idx] = -self.result.z_lb[i];
        }
        dual_rel_inf = dual_rel_inf.max(self.precond.norm_dual_res(&self.ws.dx));
        for (v, &ti) in self.ws.rx_nr.iter_mut().zip(&self.ws.dx) {
            *v -= ti;
        }
        self.ws.dx.fill(0.0);
        for (i, &idx) in self.data.x_ub_idx()[..n_ub].iter().enumerate() {
            self.ws.dx[idx] = self.result.z_ub[i];
        }
        dual_rel_inf = dual_rel_inf.max(self.precond.norm_dual_res(&self.ws.dx));
        for (v, &ti) in self.ws.rx_nr.iter_mut().zip(&self.ws.dx) {
            *v -= ti;
        }
        self.dual_rel_inf = dual_rel_inf;

        // ry_nr = b - A x
        self.data.mul_a(&self.result.x, &mut self.ws.ry_nr);
        for v in self.ws.ry_nr.iter_mut() {
            *v = -*v;
        }
        let mut primal_rel_inf = self.precond.norm_primal_res_eq(&self.ws.ry_nr);
        for (v, &bi) in self.ws.ry_nr.iter_mut().zip(self.data.b()) {
            *v += bi;
        }
        primal_rel_inf = primal_rel_inf.max(self.precond.norm_primal_res_eq(self.data.b()));

        // rz_nr = h - G x - s
        self.data.mul_g(&self.result.x, &mut self.ws.rz_nr);
        for v in self.ws.rz_nr.iter_mut() {
            *v = -*v;
        }
        primal_rel_inf = primal_rel_inf.max(self.precond.norm_primal_res_ineq(&self.ws.rz_nr));
        for (k, v) in self.ws.rz_nr.iter_mut().enumerate() {
            *v += self.data.h()[k] - self.result.s[k];
        }
        primal_rel_inf = primal_rel_inf.max(self.precond.norm_primal_res_ineq(self.data.h()));

        // rz_lb_nr[i] = x[idx] + x_lb_n[i] - s_lb[i]
        for (i, &idx) in self.data.x_lb_idx()[..n_lb].iter().enumerate() {
            self.ws.rz_lb_nr[i] =
                self.result.x[idx] + self.data.x_lb_n()[i] - self.result.s_lb[i];
        }
        primal_rel_inf =
            primal_rel_inf.max(self.precond.norm_primal_res_lb(&self.ws.rz_lb_nr[..n_lb]));
        primal_rel_inf =
            primal_rel_inf.max(self.precond.norm_primal_res_lb(&self.data.x_lb_n()[..n_lb]));

        // rz_ub_nr[i] = -x[idx] + x_ub[i] - s_ub[i]
        for (i, &idx) in self.data.x_ub_idx()[..n_ub].iter().enumerate() {
            self.ws.rz_ub_nr[i] =
                -self.result.x[idx] + self.data.x_ub()[i] - self.result.s_ub[i];
        }
        primal_rel_inf =
            primal_rel_inf.max(self.precond.norm_primal_res_ub(&self.ws.rz_ub_nr[..n_ub]));
        primal_rel_inf =
            primal_rel_inf.max(self.precond.norm_primal_res_ub(&self.data.x_ub()[..n_ub]));
        self.primal_rel_inf = primal_rel_inf;
    }

    /// One row of the verbose table; `dx` doubles as scratch for P x.
    fn print_progress(&mut self) {
        let n_lb = self.data.n_lb();
        let n_ub = self.data.n_ub();

        self.data.mul_p_sym(&self.result.x, &mut self.ws.dx);
        let xpx_half = 0.5 * dot(&self.result.x, &self.ws.dx);

        let primal_cost = xpx_half + dot(self.data.c(), &self.result.x);
        let mut dual_cost = -xpx_half
            - dot(self.data.b(), &self.result.y)
            - dot(self.data.h(), &self.result.z);
        dual_cost -= dot(&self.data.x_lb_n()[..n_lb], &self.result.z_lb[..n_lb]);
        dual_cost -= dot(&self.data.x_ub()[..n_ub], &self.result.z_ub[..n_ub]);

        println!(
            "{:>4}  {:>+.5e}  {:>+.5e}  {:.5e}  {:.5e}  {:.3e}  {:.3e}  {:.3e}  {:.3e}  {:.3e}",
            self.result.info.iter,
            self.precond.unscale_cost(primal_cost),
            self.precond.unscale_cost(dual_cost),
            self.result.info.primal_inf,
            self.result.info.dual_inf,
            self.result.info.rho,
            self.result.info.delta,
            self.result.info.mu,
            self.result.info.primal_step,
            self.result.info.dual_step,
        );
    }

    /// Map every returned vector back to user space.
    fn unscale_results(&mut self) {
        let n_lb = self.data.n_lb();
        let n_ub = self.data.n_ub();

        self.precond.unscale_primal(&mut self.result.x);
        self.precond.unscale_dual_eq(&mut self.result.y);
        self.precond.unscale_dual_ineq(&mut self.result.z);
        self.precond.unscale_dual_lb(&mut self.result.z_lb[..n_lb]);
        self.precond.unscale_dual_ub(&mut self.result.z_ub[..n_ub]);
        self.precond.unscale_slack_ineq(&mut self.result.s);
        self.precond.unscale_slack_lb(&mut self.result.s_lb[..n_lb]);
        self.precond.unscale_slack_ub(&mut self.result.s_ub[..n_ub]);
        self.precond.unscale_primal(&mut self.result.zeta);
        self.precond.unscale_dual_eq(&mut self.result.lambda);
        self.precond.unscale_dual_ineq(&mut self.result.nu);
        self.precond.unscale_dual_lb(&mut self.result.nu_lb[..n_lb]);
        self.precond.unscale_dual_ub(&mut self.result.nu_ub[..n_ub]);
    }

    /// Expand the compressed bound vectors back to dense variable order.
    ///
    /// Inactive positions get zero duals and infinite slacks; the reverse
    /// swap keeps active entries at their variable indices.
    fn restore_box_dual(&mut self) {
        let n_lb = self.data.n_lb();
        let n_ub = self.data.n_ub();

        self.result.z_lb[n_lb..].fill(0.0);
        self.result.z_ub[n_ub..].fill(0.0);
        self.result.s_lb[n_lb..].fill(f64::INFINITY);
        self.result.s_ub[n_ub..].fill(f64::INFINITY);
        self.result.nu_lb[n_lb..].fill(0.0);
        self.result.nu_ub[n_ub..].fill(0.0);

        for i in (0..n_lb).rev() {
            let idx = self.data.x_lb_idx()[i];
            self.result.z_lb.swap(i, idx);
            self.result.s_lb.swap(i, idx);
            self.result.nu_lb.swap(i, idx);
        }
        for i in (0..n_ub).rev() {
            let idx = self.data.x_ub_idx()[i];
            self.result.z_ub.swap(i, idx);
            self.result.s_ub.swap(i, idx);
            self.result.nu_ub.swap(i, idx);
        }
    }
}

impl DenseSolver {
    /// Set up a dense solver.
    ///
    /// `P` must be square positive semidefinite (only its upper triangle is
    /// read); bounds use the `INF` sentinel for inactive entries.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        p: &DMatrix<f64>,
        c: &[f64],
        a: &DMatrix<f64>,
        b: &[f64],
        g: &DMatrix<f64>,
        h: &[f64],
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
        settings: Settings,
    ) -> Result<Self, ProblemError> {
        let data = DenseData::new(p, c, a, b, g, h, x_lb, x_ub)?;
        Ok(Self::setup_from_data(data, settings))
    }

    /// Overwrite parts of the problem in place.
    ///
    /// Omitted components keep their current values; supplied bounds rebuild
    /// the compressed bound lists. On error the solver state is unspecified
    /// and the problem must be set up again.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        p: Option<&DMatrix<f64>>,
        c: Option<&[f64]>,
        a: Option<&DMatrix<f64>>,
        b: Option<&[f64]>,
        g: Option<&DMatrix<f64>>,
        h: Option<&[f64]>,
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
        reuse_preconditioner: bool,
    ) -> Result<(), ProblemError> {
        let timer = self.settings.compute_timings.then(Instant::now);

        self.precond.unscale_data(&mut self.data);

        let mut changes = DataChanges::default();
        if let Some(p_mat) = p {
            self.data.set_p(p_mat)?;
            changes.p = true;
        }
        if let Some(a_mat) = a {
            self.data.set_a(a_mat)?;
            changes.a = true;
        }
        if let Some(g_mat) = g {
            self.data.set_g(g_mat)?;
            changes.g = true;
        }
        copy_vec(&mut self.data.c, c, "c")?;
        copy_vec(&mut self.data.b, b, "b")?;
        copy_vec(&mut self.data.h, h, "h")?;
        if let Some(lb) = x_lb {
            check_bound_len(lb, self.data.n, "x_lb")?;
            self.data.rebuild_lower_bounds(Some(lb));
        }
        if let Some(ub) = x_ub {
            check_bound_len(ub, self.data.n, "x_ub")?;
            self.data.rebuild_upper_bounds(Some(ub));
        }

        self.precond.scale_data(
            &mut self.data,
            reuse_preconditioner,
            self.settings.preconditioner_iter,
            self.settings.preconditioner_scale_cost,
        );
        self.kkt.update_data(&self.data, changes);

        if let Some(t) = timer {
            let dt = t.elapsed().as_secs_f64();
            self.result.info.update_time = dt;
            self.result.info.run_time += dt;
        }
        Ok(())
    }
}

impl SparseSolver {
    /// Set up a sparse solver. All matrices must be in CSC storage.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        p: &SparseCsc,
        c: &[f64],
        a: &SparseCsc,
        b: &[f64],
        g: &SparseCsc,
        h: &[f64],
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
        settings: Settings,
    ) -> Result<Self, ProblemError> {
        let data = SparseData::new(p, c, a, b, g, h, x_lb, x_ub)?;
        Ok(Self::setup_from_data(data, settings))
    }

    /// Overwrite parts of the problem in place.
    ///
    /// Sparse matrices must keep the exact nonzero pattern of the stored
    /// data. On error the solver state is unspecified and the problem must be
    /// set up again.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        p: Option<&SparseCsc>,
        c: Option<&[f64]>,
        a: Option<&SparseCsc>,
        b: Option<&[f64]>,
        g: Option<&SparseCsc>,
        h: Option<&[f64]>,
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
        reuse_preconditioner: bool,
    ) -> Result<(), ProblemError> {
        let timer = self.settings.compute_timings.then(Instant::now);

        self.precond.unscale_data(&mut self.data);

        let mut changes = DataChanges::default();
        if let Some(p_mat) = p {
            self.data.set_p(p_mat)?;
            changes.p = true;
        }
        if let Some(a_mat) = a {
            self.data.set_a(a_mat)?;
            changes.a = true;
        }
        if let Some(g_mat) = g {
            self.data.set_g(g_mat)?;
            changes.g = true;
        }
        copy_vec(&mut self.data.c, c, "c")?;
        copy_vec(&mut self.data.b, b, "b")?;
        copy_vec(&mut self.data.h, h, "h")?;
        if let Some(lb) = x_lb {
            check_bound_len(lb, self.data.n, "x_lb")?;
            self.data.rebuild_lower_bounds(Some(lb));
        }
        if let Some(ub) = x_ub {
            check_bound_len(ub, self.data.n, "x_ub")?;
            self.data.rebuild_upper_bounds(Some(ub));
        }

        self.precond.scale_data(
            &mut self.data,
            reuse_preconditioner,
            self.settings.preconditioner_iter,
            self.settings.preconditioner_scale_cost,
        );
        self.kkt.update_data(&self.data, changes);

        if let Some(t) = timer {
            let dt = t.elapsed().as_secs_f64();
            self.result.info.update_time = dt;
            self.result.info.run_time += dt;
        }
        Ok(())
    }
}

fn copy_vec(dst: &mut [f64], src: Option<&[f64]>, what: &'static str) -> Result<(), ProblemError> {
    if let Some(src) = src {
        if src.len() != dst.len() {
            return Err(ProblemError::Dimension {
                what,
                expected: dst.len().to_string(),
                actual: src.len().to_string(),
            });
        }
        dst.copy_from_slice(src);
    }
    Ok(())
}

fn check_bound_len(v: &[f64], n: usize, what: &'static str) -> Result<(), ProblemError> {
    if v.len() != n {
        return Err(ProblemError::Dimension {
            what,
            expected: n.to_string(),
            actual: v.len().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    /// KKT wrapper that fails scripted factorization calls and records the
    /// staged penalties, for exercising the retry path.
    struct FlakyKkt {
        inner: DenseKkt,
        calls: usize,
        fail_calls: Vec<usize>,
        rhos_staged: Vec<f64>,
    }

    impl KktOperator<DenseData> for FlakyKkt {
        fn init(data: &DenseData, rho: f64, delta: f64) -> Self {
            Self {
                inner: DenseKkt::init(data, rho, delta),
                calls: 0,
                fail_calls: Vec::new(),
                rhos_staged: vec![rho],
            }
        }

        fn update_scalings(
            &mut self,
            data: &DenseData,
            rho: f64,
            delta: f64,
            scalings: Scalings<'_>,
        ) {
            self.rhos_staged.push(rho);
            self.inner.update_scalings(data, rho, delta, scalings);
        }

        fn update_data(&mut self, data: &DenseData, changes: DataChanges) {
            self.inner.update_data(data, changes);
        }

        fn factorize(&mut self, data: &DenseData) -> bool {
            self.calls += 1;
            if self.fail_calls.contains(&self.calls) {
                return false;
            }
            self.inner.factorize(data)
        }

        #[allow(clippy::too_many_arguments)]
        fn solve(
            &mut self,
            data: &DenseData,
            rx: &[f64],
            ry: &[f64],
            rz: &[f64],
            rz_lb: &[f64],
            rz_ub: &[f64],
            rs: &[f64],
            rs_lb: &[f64],
            rs_ub: &[f64],
            dx: &mut [f64],
            dy: &mut [f64],
            dz: &mut [f64],
            dz_lb: &mut [f64],
            dz_ub: &mut [f64],
            ds: &mut [f64],
            ds_lb: &mut [f64],
            ds_ub: &mut [f64],
        ) {
            self.inner.solve(
                data, rx, ry, rz, rz_lb, rz_ub, rs, rs_lb, rs_ub, dx, dy, dz, dz_lb, dz_ub,
                ds, ds_lb, ds_ub,
            );
        }
    }

    type FlakySolver = Solver<DenseData, RuizEquilibration<DenseData>, FlakyKkt>;

    fn unconstrained_data() -> DenseData {
        let p = dmatrix![1.0, 0.0; 0.0, 1.0];
        let a = DMatrix::zeros(0, 2);
        let g = DMatrix::zeros(0, 2);
        DenseData::new(&p, &[-1.0, -2.0], &a, &[], &g, &[], None, None).unwrap()
    }

    #[test]
    fn test_factor_retry_inflates_penalties() {
        let data = unconstrained_data();
        let mut solver = FlakySolver::setup_from_data(data, Settings::default());
        // Call 1 is the initial factorization; fail the two following
        // main-loop factorizations.
        solver.kkt.fail_calls = vec![2, 3];

        let status = solver.solve();
        assert_eq!(status, Status::Solved);
        assert_eq!(solver.result().info.factor_retires, 0);

        // The penalties staged after each failed factorization grow 100x.
        let rho_init = Settings::default().rho_init;
        let rhos = &solver.kkt.rhos_staged;
        // rhos[1] is the first main-loop staging, rhos[2] after one retry,
        // rhos[3] after the second.
        assert!((rhos[1] - rho_init).abs() < 1e-18);
        assert!((rhos[2] / rhos[1] - 100.0).abs() < 1e-9);
        assert!((rhos[3] / rhos[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_factor_retry_exhaustion_is_numerics() {
        let data = unconstrained_data();
        let mut settings = Settings::default();
        settings.max_factor_retires = 3;
        let mut solver = FlakySolver::setup_from_data(data, settings);
        solver.kkt.fail_calls = (1..100).collect();

        let status = solver.solve();
        assert_eq!(status, Status::Numerics);
        assert_eq!(solver.result().info.status, Status::Numerics);
        assert_eq!(solver.result().info.factor_retires, 3);
    }

    #[test]
    fn test_retry_raises_reg_limit() {
        let data = unconstrained_data();
        let mut solver = FlakySolver::setup_from_data(data, Settings::default());
        solver.kkt.fail_calls = vec![2];

        let status = solver.solve();
        assert_eq!(status, Status::Solved);
        // One retry: the floor moves from reg_lower_limit to 10x, capped by
        // feas_tol_abs.
        let s = Settings::default();
        let expected = (10.0 * s.reg_lower_limit).min(s.feas_tol_abs);
        assert!((solver.result().info.reg_limit - expected).abs() < 1e-18);
    }
}
