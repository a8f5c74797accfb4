use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::context::HeContext;

/// Key-switching strategy declared by the public key for a dimension.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum KsStrategy {
    /// No declared key material layout; rotations go through
    /// `smart_automorph` with no shared precomputation.
    Unknown,
    /// One key-switching matrix per group element; a single digit
    /// decomposition serves every rotation.
    Full,
    /// Matrices for baby steps and giant steps only; rotations decompose
    /// as `i = j + g*k` over a two-level hoist.
    Bsgs,
}

/// Ciphertext contract, including the public-key queries reachable from a
/// ciphertext. Mutating operations work in place; `Clone` is the
/// counterpart of copy construction.
pub trait HeCtxt: Clone + Send + Sync {
    type Ctx: HeContext;
    /// One ciphertext part in double-CRT form (a polynomial plus its
    /// secret-key handle), as produced by digit decomposition.
    type Part: Clone + Send + Sync;
    /// Handle to a key-switching matrix `W(1, k)`.
    type KsMatrix;

    fn context(&self) -> &Self::Ctx;

    /// Fresh zero ciphertext with this one's key/prime metadata.
    fn zero_like(&self) -> Self;
    fn add_in_place(&mut self, other: &Self);
    /// Reduce to the canonical two-part representation and drop special
    /// primes.
    fn clean_up(&mut self);
    /// Apply the automorphism `k`, key-switching back to the base key.
    /// The identity element is a no-op.
    fn smart_automorph(&mut self, k: <Self::Ctx as HeContext>::Elt);
    fn mul_by_poly(&mut self, poly: &<Self::Ctx as HeContext>::Poly);
    fn mul_by_eval(&mut self, c: &<Self::Ctx as HeContext>::Eval);
    fn noise_var(&self) -> f64;
    fn set_noise_var(&mut self, v: f64);

    /// True when the ciphertext has exactly two parts: a constant part
    /// and one under the base secret key.
    fn is_canonical(&self) -> bool;
    /// True when the ciphertext's prime set is disjoint from the special
    /// primes; digit decomposition requires it.
    fn primes_disjoint_from_special(&self) -> bool;
    /// Natural log of the product of the ciphertext's prime set.
    fn prime_set_log(&self) -> f64;
    /// Copy of the constant part.
    fn const_part(&self) -> Self::Part;
    /// Decompose the secret-key part into `n_digits` digits, scaled up by
    /// the special primes.
    fn break_into_digits(&self, n_digits: usize) -> Vec<Self::Part>;
    /// Apply the automorphism `k` to a single part.
    fn automorph_part(&self, part: &mut Self::Part, k: <Self::Ctx as HeContext>::Elt);
    /// Scale a constant part up by the special primes and add it in,
    /// extending this ciphertext's prime set to match.
    fn install_const_part(&mut self, part: Self::Part);
    /// Key-switch pre-decomposed digits through `w` and fold the result
    /// into this ciphertext, dropping the special primes again.
    fn key_switch_digits(&mut self, w: &Self::KsMatrix, digits: &[Self::Part]);

    fn ks_strategy(&self, dim: isize) -> KsStrategy;
    fn have_ks_matrix(&self, k: &<Self::Ctx as HeContext>::Elt) -> bool;
    fn ks_matrix(&self, k: &<Self::Ctx as HeContext>::Elt) -> Self::KsMatrix;
    /// Hamming weight of the base secret key.
    fn sk_weight(&self) -> f64;
    /// Plaintext space of the key-switching matrices.
    fn ks_ptxt_space(&self) -> f64;
}

/// Number of key-switching digits needed for this ciphertext and the
/// estimated noise added by switching it.
///
/// Added noise for digit `i` of magnitude `|Di|` is
/// `phi(m) * pSpace^2 * |Di|^2 * sigma^2 / 4`; digits are consumed until
/// they cover the ciphertext's prime set, the last one only partially.
/// A sanity check asserts that the added noise, divided by the product of
/// the special primes, stays below the modulus-switching floor
/// `keyWeight * phi(m) * pSpace^2 / 12`.
pub(crate) fn compute_ks_noise<C: HeCtxt>(ctxt: &C) -> (usize, f64) {
    let ctx = ctxt.context();
    let p_space = ctxt.ks_ptxt_space();
    let phi_m = ctx.phi_m().to_f64().unwrap();

    let mut n_digits = 0;
    let mut added_noise = 0.0f64;
    let mut size_left = ctxt.prime_set_log();
    for i in 0..ctx.num_digits() {
        if size_left <= 0.0 {
            break;
        }
        n_digits += 1;

        // need only part of the last digit
        let digit_size = ctx.digit_log(i).min(size_left);

        added_noise +=
            phi_m * p_space * p_space * (2.0 * digit_size).exp() * ctx.stdev() * ctx.stdev() / 4.0;

        size_left -= digit_size;
    }

    let key_weight = ctxt.sk_weight();
    let log_mod_switch_noise =
        key_weight.ln() + 2.0 * p_space.ln() + phi_m.ln() - 12.0f64.ln();
    let log_key_switch_noise = added_noise.ln() - 2.0 * ctx.special_primes_log();
    assert!(
        log_key_switch_noise < log_mod_switch_noise,
        "key-switching noise {log_key_switch_noise} above modulus-switching floor {log_mod_switch_noise}"
    );

    (n_digits, added_noise)
}
