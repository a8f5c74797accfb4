//! One-dimensional linear transforms over the plaintext slots of an HE
//! ciphertext, in two flavors: scalar ([`MatMul1DExec`]) and block
//! ([`BlockMatMul1DExec`], where each slot is a small vector acted on by
//! a base-ring matrix).
//!
//! Transforms are decomposed into Halevi-Shoup diagonals, each encoded as
//! a cached plaintext constant pre-rotated so that all constant
//! multiplications fuse onto post-rotated ciphertexts. Execution runs
//! under baby-step/giant-step decomposition with hoisted key-switch
//! digits, handles non-native dimensions through a masked duplicate
//! accumulator, and fans out over a rayon pool with a fixed reduction
//! order so outputs are bit-identical for a given worker count.
//!
//! The surrounding HE library is abstracted behind [`HeContext`] and
//! [`HeCtxt`]; the [`model`] module ships a deterministic slot-level
//! reference backend.

mod block_matmul;
mod ciphertext;
mod context;
mod diagonal;
mod hoist;
mod matmul;
pub mod model;
mod multiplier;
mod partition;

pub use block_matmul::{BlockMatMul1D, BlockMatMul1DExec, PAR_BUF_MAX};
pub use ciphertext::{HeCtxt, KsStrategy};
pub use context::{HeContext, FROBENIUS_DIM};
pub use hoist::{
    gen_baby_steps, ks_giant_step_size, AutomorphPrecon, BasicAutomorphPrecon, KEYSWITCH_THRESH,
};
pub use matmul::{MatMul1D, MatMul1DExec, BSGS_MUL_THRESH};
pub use multiplier::{ConstMultiplier, ConstMultiplierCache};
