//! Halevi-Shoup diagonal extraction.
//!
//! The `i`-th diagonal of a transform along a dimension of order `D`
//! collects the matrix entries `(j - i mod D, j)` for `j in [0, D)`. Each
//! non-zero diagonal becomes one packed plaintext constant (scalar case)
//! or `slot_degree` constants (block case), pre-rotated so that all
//! multiplications land on post-rotated ciphertexts. Non-native
//! dimensions split every constant into a masked pair feeding the main
//! and the duplicate accumulator.

use std::sync::Arc;

use crate::{
    block_matmul::BlockMatMul1D,
    context::{dim_native, dim_sz, mc_mod, HeContext, FROBENIUS_DIM},
    matmul::MatMul1D,
    multiplier::{build_const_multiplier, build_const_multiplier_rot, ConstMultiplier,
        ConstMultiplierCache},
};

type CacheSlot<A> = Option<Arc<ConstMultiplier<A>>>;

/// The `i`-th diagonal of a single shared transform, as one value per
/// coordinate of the dimension, or `None` when the whole diagonal is
/// zero.
fn diagonal_entries<A: HeContext, M: MatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    i: usize,
) -> Option<Vec<A::Scalar>> {
    let d_size = dim_sz(ctx, mat.dim() as isize);

    let mut tmp_diag = vec![ctx.scalar_zero(); d_size];
    let mut z_diag = true;
    for j in 0..d_size {
        // entry [j-i mod D, j]
        if let Some(entry) = mat.entry(mc_mod(j as isize - i as isize, d_size), j, 0) {
            if !ctx.scalar_is_zero(&entry) {
                tmp_diag[j] = entry;
                z_diag = false;
            }
        }
    }
    (!z_diag).then_some(tmp_diag)
}

/// Encode the `i`-th diagonal of a single shared transform, replicating
/// the dimension's coordinate across all slots.
fn process_diagonal_single<A: HeContext, M: MatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    i: usize,
) -> Option<A::Poly> {
    let dim = mat.dim();
    let d_size = dim_sz(ctx, dim as isize);
    let tmp_diag = diagonal_entries(ctx, mat, i)?;

    let diag: Vec<A::Scalar> = if d_size == 1 {
        // dimension of size one
        vec![tmp_diag[0].clone(); ctx.num_slots()]
    } else {
        (0..ctx.num_slots())
            .map(|j| tmp_diag[ctx.coordinate(dim, j)].clone())
            .collect()
    };
    Some(ctx.encode(&diag))
}

/// Encode the `i`-th diagonal when each block of slots carries its own
/// transform.
fn process_diagonal_multi<A: HeContext, M: MatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    i: usize,
) -> Option<A::Poly> {
    let dim = mat.dim();
    let d_size = dim_sz(ctx, dim as isize);

    let mut diag = vec![ctx.scalar_zero(); ctx.num_slots()];
    let mut z_diag = true;
    for j in 0..ctx.num_slots() {
        let (block_idx, inner_idx) = if d_size == 1 {
            (j, 0)
        } else {
            ctx.break_index_by_dim(j, dim)
        };
        // entry [inner-i mod D, inner] of block block_idx
        if let Some(entry) = mat.entry(
            mc_mod(inner_idx as isize - i as isize, d_size),
            inner_idx,
            block_idx,
        ) {
            if !ctx.scalar_is_zero(&entry) {
                diag[j] = entry;
                z_diag = false;
            }
        }
    }
    (!z_diag).then(|| ctx.encode(&diag))
}

fn process_diagonal<A: HeContext, M: MatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    i: usize,
) -> Option<A::Poly> {
    if mat.multiple_transforms() {
        process_diagonal_multi(ctx, mat, i)
    } else {
        process_diagonal_single(ctx, mat, i)
    }
}

/// Extract every diagonal of a scalar transform into the two caches.
/// With a giant step `g > 0`, the constant at `i = j + g*k` is
/// pre-rotated by `-g*k` (`cache`) and `D - g*k` (`cache1`) so the outer
/// giant-step rotation distributes over the inner sums; with `g = 0` the
/// amounts degenerate to `0` and `D`.
pub(crate) fn scalar_diagonals<A: HeContext, M: MatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    g: usize,
) -> (ConstMultiplierCache<A>, ConstMultiplierCache<A>) {
    let dim = mat.dim() as isize;
    let d_size = dim_sz(ctx, dim);
    let native = dim_native(ctx, dim);

    let mut cache: Vec<CacheSlot<A>> = vec![None; d_size];
    let mut cache1: Vec<CacheSlot<A>> = vec![None; if native { 0 } else { d_size }];

    for i in 0..d_size {
        // i == j + g*k
        let k = if g > 0 { i / g } else { 1 };

        let Some(poly) = process_diagonal(ctx, mat, i) else {
            continue;
        };

        if native {
            cache[i] = build_const_multiplier_rot(ctx, poly, dim, -((g * k) as isize));
        } else {
            let mask = ctx.mask(dim as usize, i);
            // poly1: first i slots zeroed; poly2: last D-i slots zeroed
            let poly1 = ctx.mul_poly(&poly, &mask);
            let poly2 = ctx.sub_poly(&poly, &poly1);
            cache[i] = build_const_multiplier_rot(ctx, poly1, dim, -((g * k) as isize));
            cache1[i] = build_const_multiplier_rot(ctx, poly2, dim, (d_size - g * k) as isize);
        }
    }

    (
        ConstMultiplierCache { multiplier: cache },
        ConstMultiplierCache { multiplier: cache1 },
    )
}

/// Extract every diagonal of a block transform.
///
/// Diagonal `i` yields `slot_degree` linearized-polynomial constants
/// `lambda_{i,t}`; their cache placement and pre-rotation depend on the
/// factorization:
///
/// - strategy `+1` (Frobenius outer), index `i*d + t`:
///   `sigma^{-t}(lambda * mask_i)` and `sigma^{-t}(rho^D(lambda * (1 - mask_i)))`
/// - strategy `-1` (rotation outer), index `t*D + i`:
///   `rho^{-i}(lambda * mask_i)` and `rho^{D-i}(lambda * (1 - mask_i))`
/// - strategy `0` (sequential), index `i*d + t`:
///   `lambda * mask_i` and `rho^D(lambda * (1 - mask_i))`
///
/// Native dimensions skip the mask split and `cache1` stays empty.
pub(crate) fn block_diagonals<A: HeContext, M: BlockMatMul1D<A> + ?Sized>(
    ctx: &A,
    mat: &M,
    strategy: i8,
) -> (ConstMultiplierCache<A>, ConstMultiplierCache<A>) {
    let dim = mat.dim() as isize;
    let d_size = dim_sz(ctx, dim);
    let ext = ctx.slot_degree();
    let native = dim_native(ctx, dim);
    let n = ctx.num_slots();

    let mut cache: Vec<CacheSlot<A>> = vec![None; d_size * ext];
    let mut cache1: Vec<CacheSlot<A>> = vec![None; if native { 0 } else { d_size * ext }];

    for i in 0..d_size {
        // per-slot linearized-polynomial coefficients of this diagonal
        let mut lambda: Vec<Vec<A::Scalar>> = vec![vec![ctx.scalar_zero(); n]; ext];
        let mut z_diag = true;

        if mat.multiple_transforms() {
            for j in 0..n {
                let (block_idx, inner_idx) = if d_size == 1 {
                    (j, 0)
                } else {
                    ctx.break_index_by_dim(j, dim as usize)
                };
                let Some(entry) = mat.entry(
                    mc_mod(inner_idx as isize - i as isize, d_size),
                    inner_idx,
                    block_idx,
                ) else {
                    continue;
                };
                let coeffs = ctx.lin_poly_coeffs(&entry);
                for (t, c) in coeffs.into_iter().enumerate() {
                    if !ctx.scalar_is_zero(&c) {
                        z_diag = false;
                    }
                    lambda[t][j] = c;
                }
            }
        } else {
            // one transform shared by all blocks: solve once per
            // coordinate, then replicate
            let mut per_coord: Vec<Option<Vec<A::Scalar>>> = vec![None; d_size];
            for c in 0..d_size {
                if let Some(entry) = mat.entry(mc_mod(c as isize - i as isize, d_size), c, 0) {
                    let coeffs = ctx.lin_poly_coeffs(&entry);
                    if coeffs.iter().any(|x| !ctx.scalar_is_zero(x)) {
                        z_diag = false;
                    }
                    per_coord[c] = Some(coeffs);
                }
            }
            for j in 0..n {
                let c = if d_size == 1 { 0 } else { ctx.coordinate(dim as usize, j) };
                if let Some(coeffs) = &per_coord[c] {
                    for t in 0..ext {
                        lambda[t][j] = coeffs[t].clone();
                    }
                }
            }
        }

        if z_diag {
            continue;
        }

        for (t, slots) in lambda.iter().enumerate() {
            let poly = ctx.encode(slots);
            let idx = match strategy {
                -1 => t * d_size + i,
                _ => i * ext + t,
            };

            if native {
                cache[idx] = match strategy {
                    1 => build_const_multiplier_rot(ctx, poly, FROBENIUS_DIM, -(t as isize)),
                    -1 => build_const_multiplier_rot(ctx, poly, dim, -(i as isize)),
                    0 => build_const_multiplier(ctx, poly),
                    s => panic!("unknown block-matrix strategy {s}"),
                };
            } else {
                let mask = ctx.mask(dim as usize, i);
                let poly1 = ctx.mul_poly(&poly, &mask);
                let poly2 = ctx.sub_poly(&poly, &poly1);
                match strategy {
                    1 => {
                        cache[idx] =
                            build_const_multiplier_rot(ctx, poly1, FROBENIUS_DIM, -(t as isize));
                        let dup = ctx.poly_automorph(&poly2, dim, d_size as isize);
                        cache1[idx] =
                            build_const_multiplier_rot(ctx, dup, FROBENIUS_DIM, -(t as isize));
                    }
                    -1 => {
                        cache[idx] = build_const_multiplier_rot(ctx, poly1, dim, -(i as isize));
                        cache1[idx] =
                            build_const_multiplier_rot(ctx, poly2, dim, (d_size - i) as isize);
                    }
                    0 => {
                        cache[idx] = build_const_multiplier(ctx, poly1);
                        cache1[idx] =
                            build_const_multiplier_rot(ctx, poly2, dim, d_size as isize);
                    }
                    s => panic!("unknown block-matrix strategy {s}"),
                }
            }
        }
    }

    (
        ConstMultiplierCache { multiplier: cache },
        ConstMultiplierCache { multiplier: cache1 },
    )
}
