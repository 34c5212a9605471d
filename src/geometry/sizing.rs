use crate::types::Size;

/// Pick the preview buffer size for a view of `target_width` x `target_height`.
///
/// Candidates must match `fixed_aspect` exactly and cover the target in both
/// dimensions; the smallest such candidate by area wins. When none qualifies
/// the first candidate in hardware order is returned, which may distort the
/// preview. `None` only for an empty candidate list.
pub fn choose_preview_size(
    candidates: &[Size],
    target_width: u32,
    target_height: u32,
    fixed_aspect: Size,
) -> Option<Size> {
    let best = candidates
        .iter()
        .filter(|c| c.same_aspect(&fixed_aspect))
        .filter(|c| c.width >= target_width && c.height >= target_height)
        .min_by_key(|c| c.area());

    match best {
        Some(size) => Some(*size),
        None => {
            let fallback = candidates.first().copied();
            if let Some(size) = fallback {
                log::warn!(
                    "No {}:{} output size covers {}x{}, falling back to {}",
                    fixed_aspect.width,
                    fixed_aspect.height,
                    target_width,
                    target_height,
                    size
                );
            }
            fallback
        }
    }
}
