//! Aggregate lowering: legalizing heterogeneous byte layouts.
//!
//! Takes a sequence of proposed byte ranges -- `concrete` ranges that want
//! to keep an LLVM type and `opaque` ranges that only reserve bytes -- and
//! produces a legalized storage layout:
//!
//! 1. Peephole: if every range is opaque and one byte wide, the layout is
//!    a sequence of `i1` flags.
//! 2. First pass: two consecutive ranges that share a pointer-sized
//!    aligned chunk are both stretched into one opaque range covering the
//!    whole overlap.
//! 3. Second pass: concrete ranges are copied through; runs of opaque
//!    ranges are coalesced and decomposed into aligned power-of-two
//!    integer chunks.

use inkwell::context::Context;
use inkwell::types::BasicTypeEnum;

/// Pointer-sized chunk width, in bytes.
const CHUNK: u64 = 8;

/// One proposed byte range of a layout under construction.
#[derive(Debug, Clone, Copy)]
pub enum ProposedRange<'ctx> {
    /// Bytes `[begin, end)` that want to stay typed.
    Concrete { ty: BasicTypeEnum<'ctx>, begin: u64, end: u64 },
    /// Bytes `[begin, end)` with no inherent type.
    Opaque { begin: u64, end: u64 },
}

impl<'ctx> ProposedRange<'ctx> {
    pub fn begin(&self) -> u64 {
        match self {
            ProposedRange::Concrete { begin, .. } | ProposedRange::Opaque { begin, .. } => *begin,
        }
    }

    pub fn end(&self) -> u64 {
        match self {
            ProposedRange::Concrete { end, .. } | ProposedRange::Opaque { end, .. } => *end,
        }
    }

    pub fn width(&self) -> u64 {
        self.end() - self.begin()
    }
}

/// One legalized entry of the final layout.
#[derive(Debug, Clone, Copy)]
pub struct LoweredEntry<'ctx> {
    pub ty: BasicTypeEnum<'ctx>,
    pub begin: u64,
    pub end: u64,
}

/// Legalizes a proposed layout. Ranges must be sorted and disjoint.
pub fn lower_aggregate<'ctx>(
    context: &'ctx Context,
    ranges: &[ProposedRange<'ctx>],
) -> Vec<LoweredEntry<'ctx>> {
    if ranges.is_empty() {
        return Vec::new();
    }

    // Peephole: all-opaque single bytes are flag storage.
    let all_single_opaque = ranges
        .iter()
        .all(|r| matches!(r, ProposedRange::Opaque { .. }) && r.width() == 1);
    if all_single_opaque {
        return ranges
            .iter()
            .map(|r| LoweredEntry {
                ty: context.bool_type().into(),
                begin: r.begin(),
                end: r.end(),
            })
            .collect();
    }

    // First pass: stretch neighbors that share an aligned chunk.
    let mut stretched: Vec<ProposedRange<'ctx>> = Vec::with_capacity(ranges.len());
    for &range in ranges {
        let merge = match stretched.last() {
            Some(prev) if shares_chunk(prev, &range) => true,
            _ => false,
        };
        if merge {
            let prev = stretched.pop().unwrap();
            stretched.push(ProposedRange::Opaque { begin: prev.begin(), end: range.end() });
        } else {
            stretched.push(range);
        }
    }

    // Second pass: copy concrete ranges, coalesce and chunk opaque runs.
    let mut out = Vec::new();
    let mut opaque_run: Option<(u64, u64)> = None;
    for range in stretched {
        match range {
            ProposedRange::Concrete { ty, begin, end } => {
                if let Some((run_begin, run_end)) = opaque_run.take() {
                    decompose_opaque(context, run_begin, run_end, &mut out);
                }
                out.push(LoweredEntry { ty, begin, end });
            }
            ProposedRange::Opaque { begin, end } => {
                opaque_run = match opaque_run {
                    Some((run_begin, run_end)) if run_end == begin => Some((run_begin, end)),
                    Some((run_begin, run_end)) => {
                        decompose_opaque(context, run_begin, run_end, &mut out);
                        Some((begin, end))
                    }
                    None => Some((begin, end)),
                };
            }
        }
    }
    if let Some((run_begin, run_end)) = opaque_run {
        decompose_opaque(context, run_begin, run_end, &mut out);
    }
    out
}

/// Two consecutive ranges share a chunk when the last byte of the first
/// and the first byte of the second fall in the same pointer-sized aligned
/// window.
fn shares_chunk(a: &ProposedRange<'_>, b: &ProposedRange<'_>) -> bool {
    debug_assert!(a.end() <= b.begin(), "ranges must be sorted and disjoint");
    (a.end() - 1) / CHUNK == b.begin() / CHUNK
}

/// Splits `[begin, end)` into aligned power-of-two integer chunks.
fn decompose_opaque<'ctx>(
    context: &'ctx Context,
    begin: u64,
    end: u64,
    out: &mut Vec<LoweredEntry<'ctx>>,
) {
    let mut offset = begin;
    while offset < end {
        let remaining = end - offset;
        // Largest power-of-two size that keeps the chunk aligned to its
        // own width and fits what is left, capped at pointer size.
        let align_allowance = if offset == 0 { CHUNK } else { 1 << offset.trailing_zeros().min(3) };
        let mut size = CHUNK.min(align_allowance);
        while size > remaining {
            size /= 2;
        }
        let ty: BasicTypeEnum<'ctx> = match size {
            1 => context.i8_type().into(),
            2 => context.i16_type().into(),
            4 => context.i32_type().into(),
            _ => context.i64_type().into(),
        };
        out.push(LoweredEntry { ty, begin: offset, end: offset + size });
        offset += size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widths(entries: &[LoweredEntry<'_>]) -> Vec<u64> {
        entries.iter().map(|e| e.end - e.begin).collect()
    }

    #[test]
    fn all_single_byte_opaques_become_flags() {
        let context = Context::create();
        let ranges = [
            ProposedRange::Opaque { begin: 0, end: 1 },
            ProposedRange::Opaque { begin: 1, end: 2 },
            ProposedRange::Opaque { begin: 2, end: 3 },
        ];
        let entries = lower_aggregate(&context, &ranges);
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.ty.into_int_type().get_bit_width(), 1);
        }
    }

    #[test]
    fn concrete_ranges_keep_their_types() {
        let context = Context::create();
        let f64_ty: BasicTypeEnum = context.f64_type().into();
        let ranges = [
            ProposedRange::Concrete { ty: f64_ty, begin: 0, end: 8 },
            ProposedRange::Opaque { begin: 8, end: 12 },
        ];
        let entries = lower_aggregate(&context, &ranges);
        assert!(entries[0].ty.is_float_type());
        assert_eq!(widths(&entries).iter().sum::<u64>(), 12);
    }

    #[test]
    fn neighbors_in_one_chunk_are_stretched_opaque() {
        let context = Context::create();
        let i16_ty: BasicTypeEnum = context.i16_type().into();
        // Both ranges live in the first 8-byte chunk; they merge into one
        // opaque region and lose the concrete type.
        let ranges = [
            ProposedRange::Concrete { ty: i16_ty, begin: 0, end: 2 },
            ProposedRange::Opaque { begin: 2, end: 5 },
        ];
        let entries = lower_aggregate(&context, &ranges);
        assert!(entries.iter().all(|e| e.ty.is_int_type()));
        assert_eq!(widths(&entries).iter().sum::<u64>(), 5);
        // Decomposition is aligned: 4 + 1 from offset 0.
        assert_eq!(widths(&entries), vec![4, 1]);
    }

    #[test]
    fn chunk_boundary_keeps_ranges_apart() {
        let context = Context::create();
        let i32_ty: BasicTypeEnum = context.i32_type().into();
        let ranges = [
            ProposedRange::Concrete { ty: i32_ty, begin: 4, end: 8 },
            ProposedRange::Concrete { ty: i32_ty, begin: 8, end: 12 },
        ];
        let entries = lower_aggregate(&context, &ranges);
        // Different 8-byte chunks: both stay concrete.
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.ty.is_int_type()));
        assert_eq!(widths(&entries), vec![4, 4]);
    }

    #[test]
    fn width_is_preserved_across_lowering() {
        let context = Context::create();
        let cases: Vec<Vec<ProposedRange>> = vec![
            vec![ProposedRange::Opaque { begin: 0, end: 13 }],
            vec![
                ProposedRange::Opaque { begin: 0, end: 3 },
                ProposedRange::Opaque { begin: 3, end: 11 },
            ],
            vec![
                ProposedRange::Concrete { ty: context.i64_type().into(), begin: 0, end: 8 },
                ProposedRange::Opaque { begin: 8, end: 9 },
                ProposedRange::Opaque { begin: 9, end: 10 },
            ],
        ];
        for ranges in cases {
            let total: u64 = ranges.iter().map(|r| r.width()).sum();
            let entries = lower_aggregate(&context, &ranges);
            assert_eq!(widths(&entries).iter().sum::<u64>(), total);
        }
    }

    #[test]
    fn opaque_decomposition_is_aligned_power_of_two() {
        let context = Context::create();
        let ranges = [ProposedRange::Opaque { begin: 0, end: 13 }];
        let entries = lower_aggregate(&context, &ranges);
        assert_eq!(widths(&entries), vec![8, 4, 1]);
        for entry in &entries {
            let width = entry.end - entry.begin;
            assert!(width.is_power_of_two());
            assert_eq!(entry.begin % width, 0);
        }
    }
}
