//! # `PhcResNet` Utilities
use anyhow::bail;

/// Get the output resolution for a given input resolution.
///
/// Every branch of a block (3x3 conv with padding 1, 1x1 projection,
/// strided subsampling) keeps rows and columns ``0, stride, 2*stride, ..``.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in, width_in]``.
///
/// # Returns
///
/// ``[ceil(height_in / stride), ceil(width_in / stride)]``
#[inline(always)]
pub fn stride_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    input_resolution.map(|x| x.div_ceil(stride))
}

/// Check that `stride` is usable.
pub fn check_stride(stride: usize) -> anyhow::Result<()> {
    if stride == 0 {
        bail!("stride must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_output_resolution() {
        assert_eq!(stride_output_resolution([32, 32], 1), [32, 32]);
        assert_eq!(stride_output_resolution([32, 16], 2), [16, 8]);
        assert_eq!(stride_output_resolution([7, 5], 2), [4, 3]);
    }

    #[test]
    fn test_check_stride() {
        assert!(check_stride(1).is_ok());
        assert!(check_stride(0).is_err());
    }
}
