use rayon::prelude::*;
use tracing::debug;

use crate::{
    ciphertext::HeCtxt,
    context::{dim_native, dim_sz, HeContext},
    diagonal::scalar_diagonals,
    hoist::{gen_baby_steps, ks_giant_step_size, AutomorphPrecon, KEYSWITCH_THRESH},
    multiplier::{dest_mul_add, mul_add, ConstMultiplierCache},
    partition::PartitionInfo,
};

/// Dimension-size threshold above which `MatMul1DExec` uses the BSGS
/// multiplication strategy by default. Should not exceed
/// [`KEYSWITCH_THRESH`] for performance; lower it to force BSGS, raise it
/// to never use BSGS.
pub const BSGS_MUL_THRESH: usize = KEYSWITCH_THRESH;

/// Descriptor of a scalar one-dimensional linear transform.
pub trait MatMul1D<A: HeContext> {
    /// The hypercube dimension the transform acts on; `num_gens()`
    /// denotes the dummy dimension of order 1.
    fn dim(&self) -> usize;
    /// True when each block of slots along the dimension carries its own
    /// transform.
    fn multiple_transforms(&self) -> bool {
        false
    }
    /// Entry `(i, j)` of the transform for `block` (ignored for shared
    /// transforms), or `None` when zero.
    fn entry(&self, i: usize, j: usize, block: usize) -> Option<A::Scalar>;
}

/// Planner + executor for scalar 1D transforms.
///
/// Construction extracts all diagonals into constant caches; `mul` then
/// evaluates `sum_i c_i rot^i(v)` under one of three regimes: BSGS
/// (`g > 0`), a hoisted single loop, or a strictly sequential walk that
/// assumes only single-step key material (`minimal`).
pub struct MatMul1DExec<A: HeContext> {
    dim: isize,
    d_size: usize,
    native: bool,
    minimal: bool,
    g: usize,
    pub cache: ConstMultiplierCache<A>,
    pub cache1: ConstMultiplierCache<A>,
}

impl<A: HeContext> MatMul1DExec<A> {
    pub fn new<M: MatMul1D<A> + ?Sized>(ctx: &A, mat: &M, minimal: bool) -> Self {
        Self::with_bsgs_threshold(ctx, mat, minimal, BSGS_MUL_THRESH)
    }

    /// As `new`, with an explicit BSGS activation threshold.
    pub fn with_bsgs_threshold<M: MatMul1D<A> + ?Sized>(
        ctx: &A,
        mat: &M,
        minimal: bool,
        bsgs_thresh: usize,
    ) -> Self {
        let dim = mat.dim();
        assert!(dim <= ctx.num_gens(), "dimension {dim} out of range");
        let dim = dim as isize;
        let d_size = dim_sz(ctx, dim);
        let native = dim_native(ctx, dim);

        let g = if d_size <= bsgs_thresh || minimal {
            0
        } else {
            ks_giant_step_size(d_size)
        };
        debug!(dim, d_size, native, minimal, g, "planning scalar matmul");

        let (cache, cache1) = scalar_diagonals(ctx, mat, g);
        MatMul1DExec { dim, d_size, native, minimal, g, cache, cache1 }
    }

    pub fn dim(&self) -> isize {
        self.dim
    }

    pub fn dim_size(&self) -> usize {
        self.d_size
    }

    pub fn giant_step(&self) -> usize {
        self.g
    }

    /// Migrate all cached constants to evaluation form (parallel). Must
    /// not overlap a concurrent `mul`.
    pub fn upgrade(&mut self, ctx: &A) {
        self.cache.upgrade(ctx);
        self.cache1.upgrade(ctx);
    }

    /// Homomorphically multiply `ctxt` by the planned transform, in
    /// place.
    pub fn mul<C: HeCtxt<Ctx = A>>(&self, ctxt: &mut C) {
        debug!(dim = self.dim, d_size = self.d_size, g = self.g, "scalar matmul");
        ctxt.clean_up();
        *ctxt = if self.g != 0 {
            self.mul_bsgs(&*ctxt)
        } else if !self.minimal {
            self.mul_hoisted(&*ctxt)
        } else {
            self.mul_minimal(&*ctxt)
        };
    }

    /// Baby-step/giant-step: generate `g` hoisted baby rotations, then
    /// partition the giant steps across workers. Worker `k` accumulates
    /// `sum_j cache[j + g*k] * baby[j]`, rotates the inner sum by `g*k`,
    /// and adds it to its partition accumulator; partitions are reduced
    /// in index order.
    fn mul_bsgs<C: HeCtxt<Ctx = A>>(&self, ctxt: &C) -> C {
        let ctx = ctxt.context();
        let (d_size, g, dim) = (self.d_size, self.g, self.dim);
        let nintervals = d_size.div_ceil(g);

        let baby_steps = gen_baby_steps(g, ctxt, dim, true);

        let pinfo = PartitionInfo::new(nintervals);
        let cnt = pinfo.num_intervals();

        let mut acc: Vec<C> = (0..cnt).map(|_| ctxt.zero_like()).collect();

        if self.native {
            acc.par_iter_mut().enumerate().for_each(|(index, acc)| {
                let (first, last) = pinfo.interval(index);
                for k in first..last {
                    let mut acc_inner = ctxt.zero_like();
                    for j in 0..g {
                        let i = j + g * k;
                        if i >= d_size {
                            break;
                        }
                        mul_add(&mut acc_inner, &self.cache.multiplier[i], &baby_steps[j]);
                    }
                    if k > 0 {
                        acc_inner.smart_automorph(ctx.gen_to_pow(dim, (g * k) as isize));
                    }
                    acc.add_in_place(&acc_inner);
                }
            });

            reduce_in_order(acc)
        } else {
            let mut acc1: Vec<C> = (0..cnt).map(|_| ctxt.zero_like()).collect();

            acc.par_iter_mut()
                .zip(acc1.par_iter_mut())
                .enumerate()
                .for_each(|(index, (acc, acc1))| {
                    let (first, last) = pinfo.interval(index);
                    for k in first..last {
                        let mut acc_inner = ctxt.zero_like();
                        let mut acc_inner1 = ctxt.zero_like();
                        for j in 0..g {
                            let i = j + g * k;
                            if i >= d_size {
                                break;
                            }
                            mul_add(&mut acc_inner, &self.cache.multiplier[i], &baby_steps[j]);
                            mul_add(&mut acc_inner1, &self.cache1.multiplier[i], &baby_steps[j]);
                        }
                        if k > 0 {
                            let rot = ctx.gen_to_pow(dim, (g * k) as isize);
                            acc_inner.smart_automorph(rot);
                            acc_inner1.smart_automorph(rot);
                        }
                        acc.add_in_place(&acc_inner);
                        acc1.add_in_place(&acc_inner1);
                    }
                });

            let mut total = reduce_in_order(acc);
            let mut total1 = reduce_in_order(acc1);
            total1.smart_automorph(ctx.gen_to_pow(dim, -(d_size as isize)));
            total.add_in_place(&total1);
            total
        }
    }

    /// Single loop over all rotations, hoisted through the dimension's
    /// declared preconditioner strategy, partitioned across workers.
    fn mul_hoisted<C: HeCtxt<Ctx = A>>(&self, ctxt: &C) -> C {
        let ctx = ctxt.context();
        let (d_size, dim) = (self.d_size, self.dim);

        let precon = AutomorphPrecon::build(ctxt, dim);
        let pinfo = PartitionInfo::new(d_size);
        let cnt = pinfo.num_intervals();

        let mut acc: Vec<C> = (0..cnt).map(|_| ctxt.zero_like()).collect();

        if self.native {
            acc.par_iter_mut().enumerate().for_each(|(index, acc)| {
                let (first, last) = pinfo.interval(index);
                for i in first..last {
                    if self.cache.multiplier[i].is_some() {
                        let tmp = precon.automorph(i);
                        dest_mul_add(acc, &self.cache.multiplier[i], tmp);
                    }
                }
            });

            reduce_in_order(acc)
        } else {
            let mut acc1: Vec<C> = (0..cnt).map(|_| ctxt.zero_like()).collect();

            acc.par_iter_mut()
                .zip(acc1.par_iter_mut())
                .enumerate()
                .for_each(|(index, (acc, acc1))| {
                    let (first, last) = pinfo.interval(index);
                    for i in first..last {
                        if self.cache.multiplier[i].is_some()
                            || self.cache1.multiplier[i].is_some()
                        {
                            let tmp = precon.automorph(i);
                            mul_add(acc, &self.cache.multiplier[i], &tmp);
                            dest_mul_add(acc1, &self.cache1.multiplier[i], tmp);
                        }
                    }
                });

            let mut total = reduce_in_order(acc);
            let mut total1 = reduce_in_order(acc1);
            total1.smart_automorph(ctx.gen_to_pow(dim, -(d_size as isize)));
            total.add_in_place(&total1);
            total
        }
    }

    /// Strictly sequential walk using only the single-step key-switching
    /// matrix: one running ciphertext rotated by the generator at each
    /// step.
    fn mul_minimal<C: HeCtxt<Ctx = A>>(&self, ctxt: &C) -> C {
        let ctx = ctxt.context();
        let (d_size, dim) = (self.d_size, self.dim);

        let mut acc = ctxt.zero_like();
        let mut acc1 = ctxt.zero_like();
        let mut sh_ctxt = ctxt.clone();

        for i in 0..d_size {
            if i > 0 {
                sh_ctxt.smart_automorph(ctx.gen_to_pow(dim, 1));
            }
            mul_add(&mut acc, &self.cache.multiplier[i], &sh_ctxt);
            if !self.native {
                mul_add(&mut acc1, &self.cache1.multiplier[i], &sh_ctxt);
            }
        }

        if !self.native {
            acc1.smart_automorph(ctx.gen_to_pow(dim, -(d_size as isize)));
            acc.add_in_place(&acc1);
        }
        acc
    }
}

/// Fixed reduction order: `acc[0] += acc[i]` for ascending `i`, keeping
/// outputs bit-identical for a given worker count.
pub(crate) fn reduce_in_order<C: HeCtxt>(acc: Vec<C>) -> C {
    let mut it = acc.into_iter();
    let mut total = it.next().expect("at least one partition");
    for part in it {
        total.add_in_place(&part);
    }
    total
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::ciphertext::KsStrategy;
    use crate::model::test_params::params;
    use crate::model::{Fq, ModelContext, ModelCtxt, ModelDim};

    use super::*;

    /// Dense transform descriptor: per-block row-major `D x D` grids of
    /// optional slot scalars.
    struct DenseMat {
        dim: usize,
        d_size: usize,
        blocks: Vec<Vec<Option<Fq>>>,
        multi: bool,
    }

    impl MatMul1D<ModelContext> for DenseMat {
        fn dim(&self) -> usize {
            self.dim
        }

        fn multiple_transforms(&self) -> bool {
            self.multi
        }

        fn entry(&self, i: usize, j: usize, block: usize) -> Option<Fq> {
            let b = if self.multi { block } else { 0 };
            self.blocks[b][i * self.d_size + j].clone()
        }
    }

    fn ctx_of(dims: Vec<ModelDim>) -> Arc<ModelContext> {
        Arc::new(ModelContext::new(params(dims)))
    }

    fn counting_slots(ctx: &ModelContext) -> Vec<Fq> {
        (0..ctx.num_slots())
            .map(|j| ctx.field().from_base(j as u64 + 1))
            .collect()
    }

    fn random_mat(ctx: &ModelContext, dim: usize, multi: bool, seed: u64) -> DenseMat {
        let d_size = if dim == ctx.num_gens() { 1 } else { ctx.order_of(dim) };
        let n_blocks = if multi { ctx.num_slots() / d_size } else { 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let blocks = (0..n_blocks)
            .map(|_| {
                (0..d_size * d_size)
                    .map(|_| {
                        if rng.gen_bool(0.25) {
                            None
                        } else {
                            Some(vec![rng.gen_range(0..5), rng.gen_range(0..5)])
                        }
                    })
                    .collect()
            })
            .collect();
        DenseMat { dim, d_size, blocks, multi }
    }

    /// Direct plaintext evaluation: `out[col] = sum_row M[row, col] * v[row]`
    /// within each block along the dimension.
    fn reference_apply<M: MatMul1D<ModelContext>>(
        ctx: &ModelContext,
        mat: &M,
        v: &[Fq],
    ) -> Vec<Fq> {
        let field = ctx.field();
        let dim = mat.dim();
        let d_size = if dim == ctx.num_gens() { 1 } else { ctx.order_of(dim) };

        (0..ctx.num_slots())
            .map(|s| {
                let (block, c) = if d_size == 1 {
                    (s, 0)
                } else {
                    ctx.break_index_by_dim(s, dim)
                };
                let mut out = field.zero();
                for c_src in 0..d_size {
                    let src = if d_size == 1 {
                        s
                    } else {
                        ctx.compose_index(block, c_src, dim)
                    };
                    if let Some(e) = mat.entry(c_src, c, block) {
                        out = field.add(&out, &field.mul(&e, &v[src]));
                    }
                }
                out
            })
            .collect()
    }

    fn run(exec: &MatMul1DExec<ModelContext>, ctx: &Arc<ModelContext>, v: &[Fq]) -> ModelCtxt {
        let mut ctxt = ModelCtxt::encrypt(ctx, v);
        exec.mul(&mut ctxt);
        ctxt
    }

    fn shift_mat(ctx: &ModelContext, dim: usize, amount: usize) -> DenseMat {
        let d_size = ctx.order_of(dim);
        let one = ctx.field().one();
        let mut blocks = vec![vec![None; d_size * d_size]];
        for col in 0..d_size {
            let row = (col + d_size - amount) % d_size;
            blocks[0][row * d_size + col] = Some(one.clone());
        }
        DenseMat { dim, d_size, blocks, multi: false }
    }

    #[test]
    fn s1_identity_transform() {
        let ctx = ctx_of(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ]);
        let v = counting_slots(&ctx);
        let exec = MatMul1DExec::new(&*ctx, &shift_mat(&ctx, 0, 0), false);
        assert_eq!(run(&exec, &ctx, &v).decrypt(), v);
    }

    #[test]
    fn s2_cyclic_shift_by_one() {
        let ctx = ctx_of(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ]);
        let v = counting_slots(&ctx);
        let mat = shift_mat(&ctx, 0, 1);
        let exec = MatMul1DExec::new(&*ctx, &mat, false);
        let got = run(&exec, &ctx, &v).decrypt();
        assert_eq!(got, reference_apply(&ctx, &mat, &v));

        // spot-check one slot: coordinate 0 receives coordinate D-1
        let s = ctx.compose_index(0, 0, 0);
        let src = ctx.compose_index(0, 3, 0);
        assert_eq!(got[s], v[src]);
    }

    #[test]
    fn s3_bsgs_row_stochastic() {
        let ctx = ctx_of(vec![
            ModelDim { order: 8, native: true },
            ModelDim { order: 2, native: true },
        ]);
        let field = ctx.field();
        let v = counting_slots(&ctx);

        let d_size = 8;
        let all_ones = DenseMat {
            dim: 0,
            d_size,
            blocks: vec![vec![Some(field.one()); d_size * d_size]],
            multi: false,
        };
        let exec = MatMul1DExec::with_bsgs_threshold(&*ctx, &all_ones, false, 4);
        assert_eq!(exec.giant_step(), 3);

        let got = run(&exec, &ctx, &v).decrypt();
        // every slot becomes the sum of its block along the dimension
        for s in 0..ctx.num_slots() {
            let (block, _) = ctx.break_index_by_dim(s, 0);
            let mut want = field.zero();
            for c in 0..d_size {
                want = field.add(&want, &v[ctx.compose_index(block, c, 0)]);
            }
            assert_eq!(got[s], want, "slot {s}");
        }
    }

    #[test]
    fn s4_bad_dimension_shift_by_two() {
        let ctx = ctx_of(vec![
            ModelDim { order: 6, native: false },
            ModelDim { order: 2, native: true },
        ]);
        let v = counting_slots(&ctx);
        let mat = shift_mat(&ctx, 0, 2);
        let exec = MatMul1DExec::new(&*ctx, &mat, false);
        let got = run(&exec, &ctx, &v).decrypt();
        assert_eq!(got, reference_apply(&ctx, &mat, &v));
    }

    #[test]
    fn s5_minimal_matches_default_path() {
        let mut p = params(vec![
            ModelDim { order: 3, native: true },
            ModelDim { order: 4, native: true },
        ]);
        p.restricted_keys = true;
        p.strategies = vec![KsStrategy::Unknown; 2];
        let restricted = Arc::new(ModelContext::new(p));

        let full = ctx_of(vec![
            ModelDim { order: 3, native: true },
            ModelDim { order: 4, native: true },
        ]);

        let v = counting_slots(&full);
        let mat = random_mat(&full, 0, false, 42);

        let minimal = MatMul1DExec::new(&*restricted, &mat, true);
        let default = MatMul1DExec::new(&*full, &mat, false);

        assert_eq!(
            run(&minimal, &restricted, &v).decrypt(),
            run(&default, &full, &v).decrypt()
        );
    }

    #[test]
    fn strategy_invariance_across_paths() {
        for native in [true, false] {
            let dims = vec![
                ModelDim { order: 4, native },
                ModelDim { order: 3, native: true },
            ];
            for ks in [KsStrategy::Unknown, KsStrategy::Full, KsStrategy::Bsgs] {
                let mut p = params(dims.clone());
                p.strategies[0] = ks;
                let ctx = Arc::new(ModelContext::new(p));
                let v = counting_slots(&ctx);
                let mat = random_mat(&ctx, 0, false, 7);

                let bsgs = MatMul1DExec::with_bsgs_threshold(&*ctx, &mat, false, 1);
                assert!(bsgs.giant_step() > 0);
                let hoisted = MatMul1DExec::new(&*ctx, &mat, false);
                let minimal = MatMul1DExec::new(&*ctx, &mat, true);

                let want = reference_apply(&ctx, &mat, &v);
                for (name, exec) in
                    [("bsgs", &bsgs), ("hoisted", &hoisted), ("minimal", &minimal)]
                {
                    assert_eq!(
                        run(exec, &ctx, &v).decrypt(),
                        want,
                        "path {name}, native={native}, ks={ks:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn random_bad_dimension_matrices_match_reference() {
        let ctx = ctx_of(vec![
            ModelDim { order: 6, native: false },
            ModelDim { order: 2, native: true },
        ]);
        let v = counting_slots(&ctx);
        for seed in 0..5 {
            let mat = random_mat(&ctx, 0, false, seed);
            let exec = MatMul1DExec::with_bsgs_threshold(&*ctx, &mat, false, 2);
            assert_eq!(
                run(&exec, &ctx, &v).decrypt(),
                reference_apply(&ctx, &mat, &v),
                "seed {seed}"
            );
        }
    }

    #[test]
    fn multiple_transforms_use_per_block_matrices() {
        let ctx = ctx_of(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ]);
        let v = counting_slots(&ctx);
        let mat = random_mat(&ctx, 0, true, 99);
        let exec = MatMul1DExec::new(&*ctx, &mat, false);
        assert_eq!(run(&exec, &ctx, &v).decrypt(), reference_apply(&ctx, &mat, &v));
    }

    #[test]
    fn dummy_dimension_scales_every_slot() {
        let ctx = ctx_of(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ]);
        let field = ctx.field();
        let v = counting_slots(&ctx);

        let c = field.from_base(3);
        let mat = DenseMat {
            dim: ctx.num_gens(),
            d_size: 1,
            blocks: vec![vec![Some(c.clone())]],
            multi: false,
        };
        let exec = MatMul1DExec::new(&*ctx, &mat, false);
        let got = run(&exec, &ctx, &v).decrypt();
        for (slot, x) in got.iter().zip(v.iter()) {
            assert!(field.eq(slot, &field.mul(&c, x)));
        }
    }

    #[test]
    fn zero_diagonals_leave_null_cache_slots() {
        let ctx = ctx_of(vec![
            ModelDim { order: 4, native: true },
            ModelDim { order: 3, native: true },
        ]);
        let mat = shift_mat(&ctx, 0, 1); // only diagonal 1 is populated
        let exec = MatMul1DExec::new(&*ctx, &mat, false);

        for i in 0..4 {
            assert_eq!(exec.cache.multiplier[i].is_some(), i == 1, "diagonal {i}");
        }

        // an all-zero transform multiplies nothing at all
        let zero = DenseMat { dim: 0, d_size: 4, blocks: vec![vec![None; 16]], multi: false };
        let exec = MatMul1DExec::new(&*ctx, &zero, false);
        assert!(exec.cache.multiplier.iter().all(Option::is_none));
        let out = run(&exec, &ctx, &counting_slots(&ctx));
        assert!(out.decrypt().iter().all(|s| ctx.field().is_zero(s)));
    }

    #[test]
    fn upgrade_preserves_output_bits() {
        for native in [true, false] {
            let ctx = ctx_of(vec![
                ModelDim { order: 6, native },
                ModelDim { order: 2, native: true },
            ]);
            let v = counting_slots(&ctx);
            let mat = random_mat(&ctx, 0, false, 5);
            let mut exec = MatMul1DExec::with_bsgs_threshold(&*ctx, &mat, false, 2);

            let before = run(&exec, &ctx, &v);
            exec.upgrade(&*ctx);
            let after = run(&exec, &ctx, &v);

            assert_eq!(before.decrypt(), after.decrypt(), "native={native}");
            assert_eq!(before.noise_var(), after.noise_var(), "native={native}");
        }
    }

    #[test]
    fn noise_stays_under_documented_bound() {
        let ctx = ctx_of(vec![
            ModelDim { order: 8, native: true },
            ModelDim { order: 2, native: true },
        ]);
        let v = counting_slots(&ctx);
        let mat = random_mat(&ctx, 0, false, 3);
        let exec = MatMul1DExec::with_bsgs_threshold(&*ctx, &mat, false, 4);

        let fresh = ModelCtxt::encrypt(&ctx, &v);
        let (_, ks) = crate::ciphertext::compute_ks_noise(&fresh);
        let hoist_add = ks * (-2.0 * ctx.special_primes_log()).exp();

        let out = run(&exec, &ctx, &v);

        // every baby step is bounded by n0 + a; each giant step adds at
        // most g constant products of one baby step plus one rotation
        let (d_size, g) = (8.0f64, exec.giant_step() as f64);
        let n0 = fresh.noise_var();
        let per_baby = n0 + hoist_add;
        let bound = (d_size / g).ceil() * (g * ctx.const_mul_noise() * per_baby + hoist_add);
        assert!(out.noise_var().is_finite());
        assert!(
            out.noise_var() <= bound,
            "noise {} above bound {bound}",
            out.noise_var()
        );
    }
}
