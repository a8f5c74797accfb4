use std::sync::Arc;

use itertools::izip;

use crate::{
    ciphertext::{compute_ks_noise, HeCtxt, KsStrategy},
    context::HeContext,
};

use super::{Fq, ModelContext, ModelElt};

/// Model ciphertext: two slot-vector parts with `Dec = p0 + p1`, plus an
/// analytic noise estimate. `p0` stands in for the constant part and `p1`
/// for the part under the secret key; digit decomposition genuinely
/// splits `p1` so that the hoisting machinery is exercised end to end.
#[derive(Clone)]
pub struct ModelCtxt {
    ctx: Arc<ModelContext>,
    p0: Vec<Fq>,
    p1: Vec<Fq>,
    noise: f64,
}

impl ModelCtxt {
    /// Deterministic encryption: `p1` is a fixed slot-dependent pattern
    /// and `p0` absorbs the message.
    pub fn encrypt(ctx: &Arc<ModelContext>, slots: &[Fq]) -> Self {
        let field = ctx.field();
        assert_eq!(slots.len(), ctx.num_slots());
        let p1: Vec<Fq> = (0..ctx.num_slots())
            .map(|j| field.from_base(2 * j as u64 + 1))
            .collect();
        let p0: Vec<Fq> = izip!(slots.iter(), p1.iter())
            .map(|(m, r)| field.sub(m, r))
            .collect();
        ModelCtxt {
            ctx: ctx.clone(),
            p0,
            p1,
            noise: ctx.params().fresh_noise,
        }
    }

    pub fn decrypt(&self) -> Vec<Fq> {
        let field = self.ctx.field();
        izip!(self.p0.iter(), self.p1.iter())
            .map(|(a, b)| field.add(a, b))
            .collect()
    }
}

impl HeCtxt for ModelCtxt {
    type Ctx = ModelContext;
    type Part = Vec<Fq>;
    type KsMatrix = ModelElt;

    fn context(&self) -> &ModelContext {
        &self.ctx
    }

    fn zero_like(&self) -> Self {
        let zero = vec![self.ctx.field().zero(); self.ctx.num_slots()];
        ModelCtxt {
            ctx: self.ctx.clone(),
            p0: zero.clone(),
            p1: zero,
            noise: 0.0,
        }
    }

    fn add_in_place(&mut self, other: &Self) {
        let field = self.ctx.field();
        for (a, b) in self.p0.iter_mut().zip(other.p0.iter()) {
            *a = field.add(a, b);
        }
        for (a, b) in self.p1.iter_mut().zip(other.p1.iter()) {
            *a = field.add(a, b);
        }
        self.noise += other.noise;
    }

    fn clean_up(&mut self) {
        // model ciphertexts are always in the canonical two-part form
        // with the special primes absent
    }

    fn smart_automorph(&mut self, k: ModelElt) {
        if self.ctx.elt_is_one(&k) {
            return;
        }
        assert!(
            self.have_ks_matrix(&k),
            "missing key-switching matrix for {k:?}"
        );
        // evaluate the exact expression of the hoisted path (preset
        // estimate scaled down by the special primes) so that hoisted
        // and direct rotations agree bit for bit
        let (_, added) = compute_ks_noise(&*self);
        let ctx = self.ctx.clone();
        ctx.apply_auto(&mut self.p0, &k);
        ctx.apply_auto(&mut self.p1, &k);
        let log_special = ctx.special_primes_log();
        self.noise = (added + self.noise * (2.0 * log_special).exp())
            * (-2.0 * log_special).exp();
    }

    fn mul_by_poly(&mut self, poly: &Vec<Fq>) {
        let field = self.ctx.field();
        for (a, c) in self.p0.iter_mut().zip(poly.iter()) {
            *a = field.mul(a, c);
        }
        for (a, c) in self.p1.iter_mut().zip(poly.iter()) {
            *a = field.mul(a, c);
        }
        self.noise *= self.ctx.const_mul_noise();
    }

    fn mul_by_eval(&mut self, c: &Vec<Fq>) {
        self.mul_by_poly(c);
    }

    fn noise_var(&self) -> f64 {
        self.noise
    }

    fn set_noise_var(&mut self, v: f64) {
        self.noise = v;
    }

    fn is_canonical(&self) -> bool {
        true
    }

    fn primes_disjoint_from_special(&self) -> bool {
        true
    }

    fn prime_set_log(&self) -> f64 {
        self.ctx.params().ctxt_primes_log
    }

    fn const_part(&self) -> Vec<Fq> {
        self.p0.clone()
    }

    fn break_into_digits(&self, n_digits: usize) -> Vec<Vec<Fq>> {
        assert!(n_digits >= 1);
        let field = self.ctx.field();
        // split p1 into n equal digits so each one is rotated separately
        let share = field.from_base(inv_mod(n_digits as u64, field.p()));
        let digit: Vec<Fq> = self.p1.iter().map(|s| field.mul(s, &share)).collect();
        vec![digit; n_digits]
    }

    fn automorph_part(&self, part: &mut Vec<Fq>, k: ModelElt) {
        self.ctx.apply_auto(part, &k);
    }

    fn install_const_part(&mut self, part: Vec<Fq>) {
        let field = self.ctx.field();
        for (a, b) in self.p0.iter_mut().zip(part.iter()) {
            *a = field.add(a, b);
        }
    }

    fn key_switch_digits(&mut self, _w: &ModelElt, digits: &[Vec<Fq>]) {
        let field = self.ctx.field();
        for digit in digits {
            for (a, b) in self.p1.iter_mut().zip(digit.iter()) {
                *a = field.add(a, b);
            }
        }
        // the preset estimate carries exp(2*specials); switching drops the
        // special primes again
        self.noise *= (-2.0 * self.ctx.special_primes_log()).exp();
    }

    fn ks_strategy(&self, dim: isize) -> KsStrategy {
        self.ctx.strategy_for(dim)
    }

    fn have_ks_matrix(&self, k: &ModelElt) -> bool {
        self.ctx.matrix_exists(k)
    }

    fn ks_matrix(&self, k: &ModelElt) -> ModelElt {
        assert!(self.ctx.matrix_exists(k));
        *k
    }

    fn sk_weight(&self) -> f64 {
        self.ctx.params().sk_weight
    }

    fn ks_ptxt_space(&self) -> f64 {
        self.ctx.params().ks_ptxt_space
    }
}

/// `a^{-1} mod p` for prime `p`.
fn inv_mod(a: u64, p: u64) -> u64 {
    let mut result = 1u64;
    let mut base = a % p;
    let mut e = p - 2;
    while e > 0 {
        if e & 1 == 1 {
            result = result * base % p;
        }
        base = base * base % p;
        e >>= 1;
    }
    result
}
