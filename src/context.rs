use std::fmt::Debug;

/// Dimension tag for the Frobenius (slot-wise) automorphism axis. Rotation
/// dimensions are `0..num_gens()`; `num_gens()` itself is a legal dummy
/// dimension of order 1.
pub const FROBENIUS_DIM: isize = -1;

/// Read-only contract of the surrounding HE library: cyclotomic/hypercube
/// structure, plaintext encoding, and the parameters feeding the
/// key-switching noise formula.
///
/// One instance is shared by all ciphertexts of a session; executors only
/// ever take `&self`, so implementations need no interior mutability.
pub trait HeContext: Sync {
    /// Element of the automorphism group (`Z_m^*` in the cyclotomic
    /// case). Produced by [`Self::gen_to_pow`], consumed opaquely by
    /// ciphertext rotation and key-switch matrix lookup.
    type Elt: Copy + PartialEq + Debug + Send + Sync;
    /// One plaintext slot value (an element of the degree-`d` slot
    /// extension ring).
    type Scalar: Clone + Send + Sync;
    /// Base-ring scalar; block-matrix entries are `d x d` matrices of
    /// these acting on a slot viewed as a base-ring vector.
    type Base: Clone + Send + Sync;
    /// Plaintext constant in coefficient form: small, slow to multiply.
    type Poly: Clone + Send + Sync;
    /// Plaintext constant in evaluation (CRT) form: large, fast to
    /// multiply.
    type Eval: Clone + Send + Sync;

    // Hypercube structure.

    fn phi_m(&self) -> usize;
    fn num_slots(&self) -> usize;
    /// Order of `p` in `Z_m^*`, i.e. the slot extension degree `d`.
    fn slot_degree(&self) -> usize;
    fn num_gens(&self) -> usize;
    fn order_of(&self, dim: usize) -> usize;
    fn is_native(&self, dim: usize) -> bool;
    /// The automorphism-group element performing rotation by `pow` along
    /// `dim`, with `dim == FROBENIUS_DIM` selecting the Frobenius axis
    /// (`p^pow`) and `dim == num_gens()` the dummy dimension (always the
    /// identity).
    fn gen_to_pow(&self, dim: isize, pow: isize) -> Self::Elt;
    fn elt_is_one(&self, k: &Self::Elt) -> bool;
    /// Coordinate of `slot` along `dim`.
    fn coordinate(&self, dim: usize, slot: usize) -> usize;
    /// Split `slot` into `(block_idx, inner_idx)` where `inner_idx` is
    /// the coordinate along `dim` and `block_idx` enumerates the
    /// remaining coordinates.
    fn break_index_by_dim(&self, slot: usize, dim: usize) -> (usize, usize);

    // Key-switching noise parameters.

    fn stdev(&self) -> f64;
    /// Number of digit groups in the context's digit decomposition.
    fn num_digits(&self) -> usize;
    /// Natural log of the product of digit group `i`'s primes.
    fn digit_log(&self, i: usize) -> f64;
    /// Natural log of the product of the special primes.
    fn special_primes_log(&self) -> f64;

    // Plaintext encoding.

    fn scalar_zero(&self) -> Self::Scalar;
    fn scalar_is_zero(&self, s: &Self::Scalar) -> bool;
    /// Pack one value per slot into a plaintext polynomial.
    fn encode(&self, slots: &[Self::Scalar]) -> Self::Poly;
    fn poly_is_zero(&self, poly: &Self::Poly) -> bool;
    /// The mask `d_i` for `dim`: 1 in slots whose coordinate along `dim`
    /// is `>= i`, 0 elsewhere. Multiplying a diagonal constant by it
    /// zeroes the first `i` slots along the dimension.
    fn mask(&self, dim: usize, i: usize) -> Self::Poly;
    /// Slot-wise product mod `Phi_m(X)`.
    fn mul_poly(&self, a: &Self::Poly, b: &Self::Poly) -> Self::Poly;
    fn sub_poly(&self, a: &Self::Poly, b: &Self::Poly) -> Self::Poly;
    /// Apply the plaintext automorphism `g_dim^amt` to a constant. The
    /// action must agree with the ciphertext-side automorphism of the
    /// same group element, so that a pre-rotated constant multiplied
    /// into a rotated ciphertext commutes the way the BSGS identity
    /// requires.
    fn poly_automorph(&self, poly: &Self::Poly, dim: isize, amt: isize) -> Self::Poly;
    /// Convert a coefficient-form constant to evaluation form.
    fn evaluate(&self, poly: &Self::Poly) -> Self::Eval;
    /// Linearized-polynomial coefficients of a `d x d` base-ring matrix
    /// `entry` (row-major): the unique `lambda_0..lambda_{d-1}` with
    /// `entry(x) = sum_j lambda_j * x^{p^j}` for all slot values `x`.
    fn lin_poly_coeffs(&self, entry: &[Self::Base]) -> Vec<Self::Scalar>;
}

/// Size of `dim`, treating `num_gens()` as a dummy dimension of order 1
/// and `FROBENIUS_DIM` as the Frobenius axis of order `slot_degree()`.
pub(crate) fn dim_sz<A: HeContext>(ctx: &A, dim: isize) -> usize {
    if dim == FROBENIUS_DIM {
        ctx.slot_degree()
    } else if dim as usize == ctx.num_gens() {
        1
    } else {
        ctx.order_of(dim as usize)
    }
}

pub(crate) fn dim_native<A: HeContext>(ctx: &A, dim: isize) -> bool {
    if dim == FROBENIUS_DIM || dim as usize == ctx.num_gens() {
        true
    } else {
        ctx.is_native(dim as usize)
    }
}

/// `a mod n` with a non-negative result.
pub(crate) fn mc_mod(a: isize, n: usize) -> usize {
    a.rem_euclid(n as isize) as usize
}
