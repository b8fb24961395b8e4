//! The 16 KiB block permutation.
//!
//! An SMD block stores the odd-position bytes of the ROM block in its first
//! half and the even-position bytes in its second half:
//!
//! ```text
//! in  [0x0000..0x2000) = rom[1], rom[3], rom[5], ...
//! in  [0x2000..0x4000) = rom[0], rom[2], rom[4], ...
//! ```
//!
//! [`deinterleave_block`] restores ROM order.  [`interleave_block`] is its
//! inverse and exists to build fixtures; it is not applied by the pipeline.

/// Size of one SMD payload block.
pub const BLOCK_SIZE: usize = 0x4000;
/// Size of each half of a block.
pub const HALF_BLOCK: usize = BLOCK_SIZE / 2;

pub type Block = [u8; BLOCK_SIZE];

/// De-interleave `input` into `out`.
///
/// For every `n` in `0..HALF_BLOCK`: `out[2n] = input[HALF_BLOCK + n]` and
/// `out[2n + 1] = input[n]`.
pub fn deinterleave_into(input: &Block, out: &mut Block) {
    let (lo, hi) = input.split_at(HALF_BLOCK);
    for ((pair, &even), &odd) in out.chunks_exact_mut(2).zip(hi).zip(lo) {
        pair[0] = even;
        pair[1] = odd;
    }
}

/// De-interleave one block, returning the linear block.
pub fn deinterleave_block(input: &Block) -> Box<Block> {
    let mut out = Box::new([0u8; BLOCK_SIZE]);
    deinterleave_into(input, &mut out);
    out
}

/// Inverse of [`deinterleave_into`].
pub fn interleave_into(input: &Block, out: &mut Block) {
    let (lo, hi) = out.split_at_mut(HALF_BLOCK);
    for ((pair, even), odd) in input.chunks_exact(2).zip(hi).zip(lo) {
        *even = pair[0];
        *odd  = pair[1];
    }
}

/// Inverse of [`deinterleave_block`].
pub fn interleave_block(input: &Block) -> Box<Block> {
    let mut out = Box::new([0u8; BLOCK_SIZE]);
    interleave_into(input, &mut out);
    out
}
