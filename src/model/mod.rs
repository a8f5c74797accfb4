//! Deterministic slot-level reference backend.
//!
//! Implements the [`HeContext`](crate::HeContext) and
//! [`HeCtxt`](crate::HeCtxt) contracts directly over slot vectors: slots
//! hold `F_{p^d}` elements, ciphertexts carry two slot-vector parts plus
//! an analytic noise estimate, and every prime-set quantity is a
//! synthetic log size from [`ModelParams`]. Automorphisms are exact
//! permutations (plus Frobenius content maps), so the executors can be
//! validated end-to-end without a real ring backend.
//!
//! A non-native dimension of order `D` is modeled by embedding its
//! coordinate in the combined cycle `u = block_idx * D + coordinate` and
//! rotating `u` cyclically: rotations that stay inside a block land
//! correctly, rotations that wrap spill into the neighboring block, which
//! is exactly the structure that makes the mask/duplicate reconstruction
//! `rot^i = d_i * auto^i + (1 - d_i) * auto^{i-D}` hold.

use serde::{Deserialize, Serialize};

use crate::{
    ciphertext::KsStrategy,
    context::{HeContext, FROBENIUS_DIM},
};

pub mod gf;
mod ctxt;

pub use ctxt::ModelCtxt;
pub use gf::{Fq, SlotField};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDim {
    pub order: usize,
    pub native: bool,
}

/// Parameter set for the model backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelParams {
    /// Plaintext prime.
    pub p: u64,
    /// Monic irreducible of degree `d` defining the slot extension.
    pub slot_modulus: Vec<u64>,
    /// Hypercube generators, most significant first.
    pub dims: Vec<ModelDim>,
    /// Gaussian noise parameter of fresh encryptions.
    pub stdev: f64,
    /// Log of the product of each digit group's primes.
    pub digit_logs: Vec<f64>,
    /// Log of the product of the special primes.
    pub special_primes_log: f64,
    /// Log of the product of a ciphertext's prime set.
    pub ctxt_primes_log: f64,
    /// Hamming weight of the secret key.
    pub sk_weight: f64,
    /// Plaintext space of the key-switching matrices.
    pub ks_ptxt_space: f64,
    /// Noise variance of a fresh encryption.
    pub fresh_noise: f64,
    /// Declared key-switching strategy per generator.
    pub strategies: Vec<KsStrategy>,
    pub frobenius_strategy: KsStrategy,
    /// When set, only the single-step and `-D` correction matrices exist,
    /// as for a minimal-footprint public key.
    pub restricted_keys: bool,
}

/// Automorphism-group element: a rotation amount along one axis, already
/// reduced modulo the axis' cycle length.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ModelElt {
    dim: i32,
    amt: i64,
}

pub struct ModelContext {
    params: ModelParams,
    field: SlotField,
    n_slots: usize,
    /// Index stride of each generator (last generator varies fastest).
    strides: Vec<usize>,
}

impl ModelContext {
    pub fn new(params: ModelParams) -> Self {
        let field = SlotField::new(params.p, params.slot_modulus.clone());
        assert!(!params.dims.is_empty());
        assert_eq!(params.strategies.len(), params.dims.len());

        let n_slots: usize = params.dims.iter().map(|d| d.order).product();
        let mut strides = vec![1; params.dims.len()];
        for t in (0..params.dims.len() - 1).rev() {
            strides[t] = strides[t + 1] * params.dims[t + 1].order;
        }

        ModelContext { params, field, n_slots, strides }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn field(&self) -> &SlotField {
        &self.field
    }

    /// Inverse of `break_index_by_dim`.
    pub fn compose_index(&self, block: usize, inner: usize, dim: usize) -> usize {
        let mut rest = block;
        let mut slot = inner * self.strides[dim];
        for t in (0..self.params.dims.len()).rev() {
            if t == dim {
                continue;
            }
            let coord = rest % self.params.dims[t].order;
            rest /= self.params.dims[t].order;
            slot += coord * self.strides[t];
        }
        slot
    }

    /// Source slot feeding `target` under the raw automorphism by `amt`
    /// along `dim`.
    fn auto_source(&self, dim: usize, amt: i64, target: usize) -> usize {
        let order = self.params.dims[dim].order;
        if self.params.dims[dim].native {
            let c = self.coordinate(dim, target);
            let c_src = (c as i64 - amt).rem_euclid(order as i64) as usize;
            target - c * self.strides[dim] + c_src * self.strides[dim]
        } else {
            let (block, c) = self.break_index_by_dim(target, dim);
            let u = block * order + c;
            let u_src = (u as i64 - amt).rem_euclid(self.n_slots as i64) as usize;
            self.compose_index(u_src / order, u_src % order, dim)
        }
    }

    /// Apply the automorphism `elt` to a slot vector, in place. Rotation
    /// axes permute slots; the Frobenius axis powers slot contents.
    pub fn apply_auto(&self, v: &mut Vec<Fq>, elt: &ModelElt) {
        if elt.amt == 0 {
            return;
        }
        if elt.dim == FROBENIUS_DIM as i32 {
            for x in v.iter_mut() {
                *x = self.field.frobenius(x, elt.amt as usize);
            }
            return;
        }
        let dim = elt.dim as usize;
        let out: Vec<Fq> = (0..self.n_slots)
            .map(|t| v[self.auto_source(dim, elt.amt, t)].clone())
            .collect();
        *v = out;
    }

    /// Noise scale factor of one multiplication by an encoded constant.
    pub(crate) fn const_mul_noise(&self) -> f64 {
        self.phi_m() as f64 * self.params.ks_ptxt_space * self.params.ks_ptxt_space / 4.0
    }

    pub(crate) fn strategy_for(&self, dim: isize) -> KsStrategy {
        if dim == FROBENIUS_DIM {
            self.params.frobenius_strategy
        } else if dim as usize == self.params.dims.len() {
            KsStrategy::Unknown
        } else {
            self.params.strategies[dim as usize]
        }
    }

    pub(crate) fn matrix_exists(&self, k: &ModelElt) -> bool {
        if k.amt == 0 || !self.params.restricted_keys {
            return true;
        }
        if *k == self.gen_to_pow(FROBENIUS_DIM, 1) {
            return true;
        }
        (0..self.params.dims.len()).any(|dim| {
            let order = self.params.dims[dim].order as isize;
            *k == self.gen_to_pow(dim as isize, 1) || *k == self.gen_to_pow(dim as isize, -order)
        })
    }
}

impl HeContext for ModelContext {
    type Elt = ModelElt;
    type Scalar = Fq;
    type Base = u64;
    type Poly = Vec<Fq>;
    type Eval = Vec<Fq>;

    fn phi_m(&self) -> usize {
        self.n_slots * self.field.degree()
    }

    fn num_slots(&self) -> usize {
        self.n_slots
    }

    fn slot_degree(&self) -> usize {
        self.field.degree()
    }

    fn num_gens(&self) -> usize {
        self.params.dims.len()
    }

    fn order_of(&self, dim: usize) -> usize {
        self.params.dims[dim].order
    }

    fn is_native(&self, dim: usize) -> bool {
        self.params.dims[dim].native
    }

    fn gen_to_pow(&self, dim: isize, pow: isize) -> ModelElt {
        if dim == FROBENIUS_DIM {
            let d = self.field.degree() as i64;
            return ModelElt { dim: dim as i32, amt: (pow as i64).rem_euclid(d) };
        }
        let dim_u = dim as usize;
        assert!(dim_u <= self.params.dims.len(), "dimension {dim} out of range");
        if dim_u == self.params.dims.len() {
            // dummy dimension of order 1
            return ModelElt { dim: dim as i32, amt: 0 };
        }
        let cycle = if self.params.dims[dim_u].native {
            self.params.dims[dim_u].order as i64
        } else {
            self.n_slots as i64
        };
        ModelElt { dim: dim as i32, amt: (pow as i64).rem_euclid(cycle) }
    }

    fn elt_is_one(&self, k: &ModelElt) -> bool {
        k.amt == 0
    }

    fn coordinate(&self, dim: usize, slot: usize) -> usize {
        slot / self.strides[dim] % self.params.dims[dim].order
    }

    fn break_index_by_dim(&self, slot: usize, dim: usize) -> (usize, usize) {
        let inner = self.coordinate(dim, slot);
        let mut block = 0;
        for t in 0..self.params.dims.len() {
            if t == dim {
                continue;
            }
            block = block * self.params.dims[t].order + self.coordinate(t, slot);
        }
        (block, inner)
    }

    fn stdev(&self) -> f64 {
        self.params.stdev
    }

    fn num_digits(&self) -> usize {
        self.params.digit_logs.len()
    }

    fn digit_log(&self, i: usize) -> f64 {
        self.params.digit_logs[i]
    }

    fn special_primes_log(&self) -> f64 {
        self.params.special_primes_log
    }

    fn scalar_zero(&self) -> Fq {
        self.field.zero()
    }

    fn scalar_is_zero(&self, s: &Fq) -> bool {
        self.field.is_zero(s)
    }

    fn encode(&self, slots: &[Fq]) -> Vec<Fq> {
        assert_eq!(slots.len(), self.n_slots);
        // normalize so that equality of encodings is slot-wise equality
        slots.iter().map(|s| self.field.add(s, &self.field.zero())).collect()
    }

    fn poly_is_zero(&self, poly: &Vec<Fq>) -> bool {
        poly.iter().all(|s| self.field.is_zero(s))
    }

    fn mask(&self, dim: usize, i: usize) -> Vec<Fq> {
        (0..self.n_slots)
            .map(|s| {
                if self.coordinate(dim, s) >= i {
                    self.field.one()
                } else {
                    self.field.zero()
                }
            })
            .collect()
    }

    fn mul_poly(&self, a: &Vec<Fq>, b: &Vec<Fq>) -> Vec<Fq> {
        a.iter().zip(b).map(|(x, y)| self.field.mul(x, y)).collect()
    }

    fn sub_poly(&self, a: &Vec<Fq>, b: &Vec<Fq>) -> Vec<Fq> {
        a.iter().zip(b).map(|(x, y)| self.field.sub(x, y)).collect()
    }

    fn poly_automorph(&self, poly: &Vec<Fq>, dim: isize, amt: isize) -> Vec<Fq> {
        let mut out = poly.clone();
        self.apply_auto(&mut out, &self.gen_to_pow(dim, amt));
        out
    }

    fn evaluate(&self, poly: &Vec<Fq>) -> Vec<Fq> {
        poly.clone()
    }

    fn lin_poly_coeffs(&self, entry: &[u64]) -> Vec<Fq> {
        self.field.lin_poly_coeffs(entry)
    }
}

#[cfg(test)]
pub(crate) mod test_params {
    use std::sync::Arc;

    use super::*;

    /// F_25 slots, synthetic two-digit prime layout, full key material.
    pub(crate) fn params(dims: Vec<ModelDim>) -> ModelParams {
        let strategies = vec![KsStrategy::Full; dims.len()];
        ModelParams {
            p: 5,
            slot_modulus: vec![3, 0, 1], // X^2 - 2
            dims,
            stdev: 3.2,
            digit_logs: vec![30.0, 30.0],
            special_primes_log: 35.0,
            ctxt_primes_log: 55.0,
            sk_weight: 64.0,
            ks_ptxt_space: 5.0,
            fresh_noise: 100.0,
            strategies,
            frobenius_strategy: KsStrategy::Full,
            restricted_keys: false,
        }
    }

    pub(crate) fn small_context() -> Arc<ModelContext> {
        Arc::new(ModelContext::new(params(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ])))
    }

    pub(crate) fn encrypt_counting(ctx: &Arc<ModelContext>) -> ModelCtxt {
        let field = ctx.field();
        let slots: Vec<Fq> = (0..ctx.num_slots())
            .map(|j| field.from_base(j as u64 + 1))
            .collect();
        ModelCtxt::encrypt(ctx, &slots)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use itertools::izip;

    use super::test_params::{encrypt_counting, params, small_context};
    use super::*;

    fn bad_dim_context() -> Arc<ModelContext> {
        Arc::new(ModelContext::new(params(vec![
            ModelDim { order: 6, native: false },
            ModelDim { order: 2, native: true },
        ])))
    }

    #[test]
    fn break_and_compose_are_inverses() {
        let ctx = bad_dim_context();
        for dim in 0..ctx.num_gens() {
            for slot in 0..ctx.num_slots() {
                let (block, inner) = ctx.break_index_by_dim(slot, dim);
                assert_eq!(ctx.compose_index(block, inner, dim), slot);
                assert_eq!(inner, ctx.coordinate(dim, slot));
            }
        }
    }

    #[test]
    fn automorphisms_compose() {
        let ctx = bad_dim_context();
        let ctxt = encrypt_counting(&ctx);
        let v = ctxt.decrypt();

        for dim in 0..ctx.num_gens() as isize {
            for (a, b) in [(1isize, 2isize), (3, 4), (2, -5)] {
                let mut once = v.clone();
                ctx.apply_auto(&mut once, &ctx.gen_to_pow(dim, a + b));

                let mut twice = v.clone();
                ctx.apply_auto(&mut twice, &ctx.gen_to_pow(dim, a));
                ctx.apply_auto(&mut twice, &ctx.gen_to_pow(dim, b));

                assert_eq!(once, twice, "dim={dim} a={a} b={b}");
            }
        }
    }

    #[test]
    fn bad_dimension_mask_identity() {
        // rot^i(v) == mask_i * auto^i(v) + (1 - mask_i) * auto^{i-D}(v)
        let ctx = bad_dim_context();
        let field = ctx.field();
        let dim = 0usize;
        let d_size = ctx.order_of(dim);
        let v: Vec<Fq> = (0..ctx.num_slots())
            .map(|j| field.from_base(j as u64 + 1))
            .collect();

        for i in 0..d_size {
            // true rotation: shift the coordinate within each block
            let want: Vec<Fq> = (0..ctx.num_slots())
                .map(|s| {
                    let (block, c) = ctx.break_index_by_dim(s, dim);
                    let c_src = (c + d_size - i) % d_size;
                    v[ctx.compose_index(block, c_src, dim)].clone()
                })
                .collect();

            let mut hi = v.clone();
            ctx.apply_auto(&mut hi, &ctx.gen_to_pow(dim as isize, i as isize));
            let mut lo = v.clone();
            ctx.apply_auto(&mut lo, &ctx.gen_to_pow(dim as isize, i as isize - d_size as isize));

            let mask = ctx.mask(dim, i);
            let got: Vec<Fq> = izip!(hi.iter(), lo.iter(), mask.iter())
                .map(|(h, l, m)| {
                    let keep = field.mul(h, m);
                    let dup = field.mul(l, &field.sub(&field.one(), m));
                    field.add(&keep, &dup)
                })
                .collect();

            assert_eq!(got, want, "i={i}");
        }
    }

    #[test]
    fn frobenius_axis_powers_contents() {
        let ctx = small_context();
        let field = ctx.field();
        let mut v: Vec<Fq> = (0..ctx.num_slots()).map(|_| vec![2, 3]).collect();
        ctx.apply_auto(&mut v, &ctx.gen_to_pow(FROBENIUS_DIM, 1));
        for s in &v {
            assert!(field.eq(s, &field.frobenius(&vec![2, 3], 1)));
        }
    }
}
