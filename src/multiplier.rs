use std::sync::Arc;

use rayon::prelude::*;

use crate::{ciphertext::HeCtxt, context::HeContext};

/// A plaintext constant held for homomorphic multiplication, in one of
/// two states. `Poly` is the compact encode-time form; `upgrade` moves it
/// to `Eval` (CRT) form for fast repeated multiplication. The transition
/// is one-way.
pub enum ConstMultiplier<A: HeContext> {
    Poly(A::Poly),
    Eval(A::Eval),
}

impl<A: HeContext> ConstMultiplier<A> {
    /// Multiply `ctxt` in place by the held constant.
    pub fn mul<C: HeCtxt<Ctx = A>>(&self, ctxt: &mut C) {
        match self {
            ConstMultiplier::Poly(p) => ctxt.mul_by_poly(p),
            ConstMultiplier::Eval(e) => ctxt.mul_by_eval(e),
        }
    }

    /// Replacement in evaluated form, or `None` if already evaluated.
    pub fn upgrade(&self, ctx: &A) -> Option<Self> {
        match self {
            ConstMultiplier::Poly(p) => Some(ConstMultiplier::Eval(ctx.evaluate(p))),
            ConstMultiplier::Eval(_) => None,
        }
    }
}

/// Build a multiplier from an encoded diagonal, or `None` when the
/// polynomial is zero so that the executor skips the multiplication
/// entirely.
pub(crate) fn build_const_multiplier<A: HeContext>(
    ctx: &A,
    poly: A::Poly,
) -> Option<Arc<ConstMultiplier<A>>> {
    if ctx.poly_is_zero(&poly) {
        None
    } else {
        Some(Arc::new(ConstMultiplier::Poly(poly)))
    }
}

/// Same, additionally applying the plaintext automorphism `g_dim^amt`.
/// The stored constant then multiplies correctly into a ciphertext whose
/// rotation by `-amt` is still pending (the BSGS outer-rotation
/// compensation).
pub(crate) fn build_const_multiplier_rot<A: HeContext>(
    ctx: &A,
    poly: A::Poly,
    dim: isize,
    amt: isize,
) -> Option<Arc<ConstMultiplier<A>>> {
    if ctx.poly_is_zero(&poly) {
        None
    } else {
        Some(Arc::new(ConstMultiplier::Poly(
            ctx.poly_automorph(&poly, dim, amt),
        )))
    }
}

/// `x += a*b`; skipped entirely when `a` is the null (zero) multiplier.
pub(crate) fn mul_add<A: HeContext, C: HeCtxt<Ctx = A>>(
    x: &mut C,
    a: &Option<Arc<ConstMultiplier<A>>>,
    b: &C,
) {
    if let Some(a) = a {
        let mut tmp = b.clone();
        a.mul(&mut tmp);
        x.add_in_place(&tmp);
    }
}

/// `x += a*b`, consuming `b` to avoid the copy.
pub(crate) fn dest_mul_add<A: HeContext, C: HeCtxt<Ctx = A>>(
    x: &mut C,
    a: &Option<Arc<ConstMultiplier<A>>>,
    mut b: C,
) {
    if let Some(a) = a {
        a.mul(&mut b);
        x.add_in_place(&b);
    }
}

/// Diagonal cache: one multiplier per diagonal index, `None` marking an
/// all-zero diagonal. Slots are `Arc`-shared so that `upgrade` can swap
/// individual entries while handles from earlier reads stay valid.
#[derive(Clone)]
pub struct ConstMultiplierCache<A: HeContext> {
    pub multiplier: Vec<Option<Arc<ConstMultiplier<A>>>>,
}

impl<A: HeContext> Default for ConstMultiplierCache<A> {
    fn default() -> Self {
        ConstMultiplierCache { multiplier: Vec::new() }
    }
}

impl<A: HeContext> ConstMultiplierCache<A> {
    /// Migrate every constant to evaluated form, in parallel over cache
    /// slots. Idempotent. Must not run concurrently with `mul` (enforced
    /// by `&mut self`).
    pub fn upgrade(&mut self, ctx: &A) {
        self.multiplier.par_iter_mut().for_each(|slot| {
            if let Some(m) = slot {
                if let Some(new) = m.upgrade(ctx) {
                    *slot = Some(Arc::new(new));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::model::test_params::small_context;

    use super::*;

    #[test]
    fn zero_polynomial_builds_null_multiplier() {
        let ctx = small_context();
        let zero = ctx.encode(&vec![ctx.scalar_zero(); ctx.num_slots()]);
        assert!(build_const_multiplier(&*ctx, zero).is_none());

        let mut slots = vec![ctx.scalar_zero(); ctx.num_slots()];
        slots[3] = vec![1];
        let poly = ctx.encode(&slots);
        assert!(build_const_multiplier(&*ctx, poly).is_some());
    }

    #[test]
    fn upgrade_is_idempotent() {
        let ctx = small_context();
        let mut slots = vec![ctx.scalar_zero(); ctx.num_slots()];
        slots[0] = vec![2];
        let poly = ctx.encode(&slots);

        let mut cache = ConstMultiplierCache {
            multiplier: vec![build_const_multiplier(&*ctx, poly), None],
        };
        cache.upgrade(&*ctx);
        assert!(matches!(
            cache.multiplier[0].as_deref(),
            Some(ConstMultiplier::Eval(_))
        ));
        assert!(cache.multiplier[1].is_none());

        // second upgrade finds nothing to do
        let before = Arc::as_ptr(cache.multiplier[0].as_ref().unwrap());
        cache.upgrade(&*ctx);
        assert_eq!(before, Arc::as_ptr(cache.multiplier[0].as_ref().unwrap()));
    }
}
