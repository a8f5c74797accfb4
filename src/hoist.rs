use rayon::prelude::*;
use tracing::debug;

use crate::{
    ciphertext::{compute_ks_noise, HeCtxt, KsStrategy},
    context::{dim_sz, HeContext},
};

/// Dimension-size threshold above which key generation (and matmul, by
/// default) switch from one-matrix-per-rotation to BSGS key material.
pub const KEYSWITCH_THRESH: usize = 50;

/// Giant-step size for a dimension of order `d`: the least `g` with
/// `g * g >= d`.
pub fn ks_giant_step_size(d: usize) -> usize {
    let mut g = (d as f64).sqrt().floor() as usize;
    while g * g < d {
        g += 1;
    }
    while g > 1 && (g - 1) * (g - 1) >= d {
        g -= 1;
    }
    g
}

/// Key-switch digit precomputation shared by every rotation of one
/// ciphertext ("basic hoisting").
///
/// Construction cleans the ciphertext, checks the two-part canonical form
/// and the special-prime disjointness, computes the switching noise once,
/// and pre-decomposes the secret-key part into digits scaled by the
/// special primes. Each `automorph` afterwards pays only the cheap
/// per-rotation work: permute the stored digits and key-switch them.
pub struct BasicAutomorphPrecon<C: HeCtxt> {
    ctxt: C,
    noise: f64,
    poly_digits: Vec<C::Part>,
}

impl<C: HeCtxt> BasicAutomorphPrecon<C> {
    pub fn new(ctxt: &C) -> Self {
        let mut ctxt = ctxt.clone();
        ctxt.clean_up();

        // clean_up must leave the canonical two-part form
        assert!(ctxt.is_canonical());
        assert!(ctxt.primes_disjoint_from_special());

        let (n_digits, mut noise) = compute_ks_noise(&ctxt);
        noise += ctxt.noise_var() * (2.0 * ctxt.context().special_primes_log()).exp();

        let poly_digits = ctxt.break_into_digits(n_digits);
        debug!(n_digits, noise, "hoisted digit decomposition ready");

        BasicAutomorphPrecon { ctxt, noise, poly_digits }
    }

    /// The stored ciphertext rotated by the group element `k`.
    pub fn automorph(&self, k: <C::Ctx as HeContext>::Elt) -> C {
        if self.ctxt.context().elt_is_one(&k) {
            return self.ctxt.clone();
        }

        assert!(
            self.ctxt.have_ks_matrix(&k),
            "missing key-switching matrix for requested automorphism"
        );
        let w = self.ctxt.ks_matrix(&k);

        let mut result = self.ctxt.zero_like();
        result.set_noise_var(self.noise);

        let mut tmp_part = self.ctxt.const_part();
        self.ctxt.automorph_part(&mut tmp_part, k);
        result.install_const_part(tmp_part);

        // rotate the digits before key-switching them
        let mut digits = self.poly_digits.clone();
        for d in digits.iter_mut() {
            self.ctxt.automorph_part(d, k);
        }
        result.key_switch_digits(&w, &digits);

        result
    }
}

/// Strategy-parametric producer of the `i`-th rotation of a ciphertext
/// along one dimension. The three shapes carry different precomputed
/// data; which one is built follows the public key's declared
/// key-switching strategy for the dimension.
pub enum AutomorphPrecon<C: HeCtxt> {
    /// No precomputation: clone and rotate each time.
    Unknown { ctxt: C, dim: isize },
    /// One digit decomposition serves every rotation.
    Full { precon: BasicAutomorphPrecon<C>, dim: isize },
    /// Two-level hoist: one decomposition per giant-step interval.
    Bsgs {
        dim: isize,
        d_size: usize,
        g: usize,
        precons: Vec<BasicAutomorphPrecon<C>>,
    },
}

impl<C: HeCtxt> AutomorphPrecon<C> {
    /// `dim` may be `FROBENIUS_DIM` or the dummy dimension `num_gens()`.
    pub fn build(ctxt: &C, dim: isize) -> Self {
        let ctx = ctxt.context();
        assert!(
            dim >= -1 && dim <= ctx.num_gens() as isize,
            "dimension {dim} out of range"
        );

        match ctxt.ks_strategy(dim) {
            KsStrategy::Bsgs => {
                let d_size = dim_sz(ctx, dim);
                let g = ks_giant_step_size(d_size);
                let nintervals = d_size.div_ceil(g);
                debug!(dim, d_size, g, nintervals, "building BSGS preconditioner");

                let precon0 = BasicAutomorphPrecon::new(ctxt);
                let precons = (0..nintervals)
                    .into_par_iter()
                    .map(|k| {
                        let p = precon0.automorph(ctx.gen_to_pow(dim, (g * k) as isize));
                        BasicAutomorphPrecon::new(&p)
                    })
                    .collect();

                AutomorphPrecon::Bsgs { dim, d_size, g, precons }
            }
            KsStrategy::Full => AutomorphPrecon::Full {
                precon: BasicAutomorphPrecon::new(ctxt),
                dim,
            },
            KsStrategy::Unknown => {
                let mut ctxt = ctxt.clone();
                ctxt.clean_up();
                AutomorphPrecon::Unknown { ctxt, dim }
            }
        }
    }

    /// The input rotated by `i` along the dimension.
    pub fn automorph(&self, i: usize) -> C {
        match self {
            AutomorphPrecon::Unknown { ctxt, dim } => {
                let mut result = ctxt.clone();
                // guard against i == 0, as dim may be num_gens()
                if i != 0 {
                    result.smart_automorph(ctxt.context().gen_to_pow(*dim, i as isize));
                }
                result
            }
            AutomorphPrecon::Full { precon, dim } => {
                precon.automorph(precon.ctxt.context().gen_to_pow(*dim, i as isize))
            }
            AutomorphPrecon::Bsgs { dim, d_size, g, precons } => {
                assert!(i < *d_size);
                // i == j + g*k
                let j = i % g;
                let k = i / g;
                precons[k].automorph(precons[k].ctxt.context().gen_to_pow(*dim, j as isize))
            }
        }
    }
}

/// Baby-step rotations `v[j] = rot^j(ctxt)` for `j in [0, n)`, produced in
/// parallel. With a declared key-switching strategy the digits are
/// hoisted once; otherwise each step pays a full `smart_automorph`. The
/// `clean` flag reduces each output's representation afterwards.
pub fn gen_baby_steps<C: HeCtxt>(n: usize, ctxt: &C, dim: isize, clean: bool) -> Vec<C> {
    assert!(n > 0);

    if n == 1 {
        let mut c = ctxt.clone();
        if clean {
            c.clean_up();
        }
        return vec![c];
    }

    let ctx = ctxt.context();
    if ctxt.ks_strategy(dim) != KsStrategy::Unknown {
        let precon = BasicAutomorphPrecon::new(ctxt);
        (0..n)
            .into_par_iter()
            .map(|j| {
                let mut v = precon.automorph(ctx.gen_to_pow(dim, j as isize));
                if clean {
                    v.clean_up();
                }
                v
            })
            .collect()
    } else {
        let mut ctxt0 = ctxt.clone();
        ctxt0.clean_up();
        (0..n)
            .into_par_iter()
            .map(|j| {
                let mut v = ctxt0.clone();
                if j != 0 {
                    v.smart_automorph(ctx.gen_to_pow(dim, j as isize));
                }
                if clean {
                    v.clean_up();
                }
                v
            })
            .collect()
    }
}
