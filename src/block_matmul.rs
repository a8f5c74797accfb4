use rayon::prelude::*;
use tracing::debug;

use crate::{
    ciphertext::HeCtxt,
    context::{dim_native, dim_sz, HeContext, FROBENIUS_DIM},
    diagonal::block_diagonals,
    hoist::AutomorphPrecon,
    matmul::reduce_in_order,
    multiplier::{mul_add, ConstMultiplierCache},
    partition::PartitionInfo,
};

/// Bound on in-flight hoisted rotations during the buffered parallel
/// phase of a block multiply.
pub const PAR_BUF_MAX: usize = 50;

/// Descriptor of a block one-dimensional linear transform: each matrix
/// entry is a `d x d` base-ring matrix acting on a slot viewed as a
/// base-ring vector.
pub trait BlockMatMul1D<A: HeContext> {
    /// The hypercube dimension the transform acts on; `num_gens()`
    /// denotes the dummy dimension of order 1 (row/column indices are
    /// then forced to zero).
    fn dim(&self) -> usize;
    fn multiple_transforms(&self) -> bool {
        false
    }
    /// Entry `(i, j)` for `block`, row-major `d x d` over the base ring,
    /// or `None` when zero.
    fn entry(&self, i: usize, j: usize, block: usize) -> Option<Vec<A::Base>>;
}

/// Planner + executor for block 1D transforms over the two-axis product
/// rotation x Frobenius.
///
/// The transform is `T(v) = sum_{i,t} lambda_{it} * sigma^t(rot^i(v))`;
/// construction picks which axis to hoist:
///
/// ```text
/// sum lambda * sigma^t(rho^i v) = sum_t sigma^t[ sigma^{-t}(lambda) rho^i(v) ]   (+1)
///                               = sum_i rho^i[ rho^{-i}(lambda) sigma^t(v) ]     (-1)
/// ```
///
/// `+1` (chosen when `D >= d`) hoists the rotations and applies Frobenius
/// powers at the end; `-1` (when `D < d`) hoists the Frobenius powers and
/// rotates at the end; `0` (minimal) walks both axes sequentially with
/// single-step rotations only.
pub struct BlockMatMul1DExec<A: HeContext> {
    dim: isize,
    d_size: usize,
    ext_degree: usize,
    native: bool,
    strategy: i8,
    pub cache: ConstMultiplierCache<A>,
    pub cache1: ConstMultiplierCache<A>,
}

impl<A: HeContext> BlockMatMul1DExec<A> {
    pub fn new<M: BlockMatMul1D<A> + ?Sized>(ctx: &A, mat: &M, minimal: bool) -> Self {
        let dim = mat.dim();
        assert!(dim <= ctx.num_gens(), "dimension {dim} out of range");
        let dim = dim as isize;
        let d_size = dim_sz(ctx, dim);
        let ext_degree = ctx.slot_degree();
        let native = dim_native(ctx, dim);

        let strategy = if minimal {
            0
        } else if d_size >= ext_degree {
            1
        } else {
            -1
        };
        debug!(dim, d_size, ext_degree, native, strategy, "planning block matmul");

        let (cache, cache1) = block_diagonals(ctx, mat, strategy);
        BlockMatMul1DExec { dim, d_size, ext_degree, native, strategy, cache, cache1 }
    }

    pub fn dim(&self) -> isize {
        self.dim
    }

    pub fn strategy(&self) -> i8 {
        self.strategy
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
        debug!(dim = self.dim, strategy = self.strategy, "block matmul");
        ctxt.clean_up();
        *ctxt = match self.strategy {
            0 => self.mul_minimal(&*ctxt),
            1 | -1 => self.mul_factored(&*ctxt),
            s => panic!("unknown block-matrix strategy {s}"),
        };
    }

    /// Factored path: hoist the inner axis, accumulate one partial per
    /// outer index in a buffered two-layer parallel loop, then rotate
    /// each partial by the outer generator and reduce.
    fn mul_factored<C: HeCtxt<Ctx = A>>(&self, ctxt: &C) -> C {
        let ctx = ctxt.context();

        // (d0, dim0): inner, hoisted axis; (d1, dim1): outer axis
        let (d0, dim0, d1, dim1) = if self.strategy == 1 {
            (self.d_size, self.dim, self.ext_degree, FROBENIUS_DIM)
        } else {
            (self.ext_degree, FROBENIUS_DIM, self.d_size, self.dim)
        };

        let precon = AutomorphPrecon::build(ctxt, dim0);

        let mut acc: Vec<C> = (0..d1).map(|_| ctxt.zero_like()).collect();
        let mut acc1: Vec<C> = if self.native {
            Vec::new()
        } else {
            (0..d1).map(|_| ctxt.zero_like()).collect()
        };

        // buffered parallel hoist: bound memory to one chunk of rotated
        // ciphertexts while exposing both loop layers to the pool
        let buf_sz = if rayon::current_num_threads() > 1 {
            d0.min(PAR_BUF_MAX)
        } else {
            1
        };

        let mut first = 0;
        while first < d0 {
            let last = (first + buf_sz).min(d0);
            let par_buf: Vec<C> = (first..last)
                .into_par_iter()
                .map(|i| {
                    let mut tmp = precon.automorph(i);
                    tmp.clean_up();
                    tmp
                })
                .collect();

            if self.native {
                acc.par_iter_mut().enumerate().for_each(|(b, acc_b)| {
                    for i in first..last {
                        mul_add(acc_b, &self.cache.multiplier[i * d1 + b], &par_buf[i - first]);
                    }
                });
            } else {
                acc.par_iter_mut()
                    .zip(acc1.par_iter_mut())
                    .enumerate()
                    .for_each(|(b, (acc_b, acc1_b))| {
                        for i in first..last {
                            let buf = &par_buf[i - first];
                            mul_add(acc_b, &self.cache.multiplier[i * d1 + b], buf);
                            mul_add(acc1_b, &self.cache1.multiplier[i * d1 + b], buf);
                        }
                    });
            }
            first = last;
        }

        let mut total = rotate_and_reduce(ctx, acc, dim1);
        if !self.native {
            let mut total1 = rotate_and_reduce(ctx, acc1, dim1);
            total1.smart_automorph(ctx.gen_to_pow(self.dim, -(self.d_size as isize)));
            total.add_in_place(&total1);
        }
        total
    }

    /// Minimal path: two nested sequential loops, rotating one running
    /// ciphertext along the dimension and a nested one along the
    /// Frobenius axis, using only single-step key material.
    fn mul_minimal<C: HeCtxt<Ctx = A>>(&self, ctxt: &C) -> C {
        let ctx = ctxt.context();
        let (d_size, ext, dim) = (self.d_size, self.ext_degree, self.dim);

        let mut acc = ctxt.zero_like();
        let mut acc1 = ctxt.zero_like();
        let mut sh_ctxt = ctxt.clone();

        for i in 0..d_size {
            if i > 0 {
                sh_ctxt.smart_automorph(ctx.gen_to_pow(dim, 1));
            }
            let mut sh_ctxt1 = sh_ctxt.clone();
            for t in 0..ext {
                if t > 0 {
                    sh_ctxt1.smart_automorph(ctx.gen_to_pow(FROBENIUS_DIM, 1));
                }
                mul_add(&mut acc, &self.cache.multiplier[i * ext + t], &sh_ctxt1);
                if !self.native {
                    mul_add(&mut acc1, &self.cache1.multiplier[i * ext + t], &sh_ctxt1);
                }
            }
        }

        if !self.native {
            acc1.smart_automorph(ctx.gen_to_pow(dim, -(d_size as isize)));
            acc.add_in_place(&acc1);
        }
        acc
    }
}

/// Rotate `acc[b]` by the outer generator to power `b` and sum, with the
/// rotations partitioned across workers and partials reduced in index
/// order.
fn rotate_and_reduce<A: HeContext, C: HeCtxt<Ctx = A>>(
    ctx: &A,
    mut acc: Vec<C>,
    dim1: isize,
) -> C {
    let pinfo = PartitionInfo::new(acc.len());
    let cnt = pinfo.num_intervals();

    let mut slices: Vec<&mut [C]> = Vec::with_capacity(cnt);
    let mut rest: &mut [C] = &mut acc;
    for index in 0..cnt {
        let (first, last) = pinfo.interval(index);
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(last - first);
        slices.push(head);
        rest = tail;
    }

    let partials: Vec<C> = slices
        .into_par_iter()
        .enumerate()
        .map(|(index, slice)| {
            let (first, _) = pinfo.interval(index);
            let mut sum: Option<C> = None;
            for (off, acc_b) in slice.iter_mut().enumerate() {
                let b = first + off;
                if b > 0 {
                    acc_b.smart_automorph(ctx.gen_to_pow(dim1, b as isize));
                }
                match sum.as_mut() {
                    None => sum = Some(acc_b.clone()),
                    Some(s) => s.add_in_place(acc_b),
                }
            }
            sum.expect("non-empty interval")
        })
        .collect();

    reduce_in_order(partials)
}
