//! Shape checks for segmentation model outputs

use crate::error::{BgSwapError, Result};
use ndarray::Array4;

/// Checks a saliency tensor before it is turned into an alpha mask
pub struct TensorValidator;

impl TensorValidator {
    /// Require a `[1, 1, side, side]` saliency map
    ///
    /// # Errors
    /// - More than one image in the batch or more than one channel
    /// - Spatial size differs from the canvas the input was letterboxed into
    pub fn check_mask(tensor: &Array4<f32>, side: usize) -> Result<()> {
        let (batch, channels, height, width) = tensor.dim();
        if (batch, channels) != (1, 1) {
            return Err(BgSwapError::inference(format!(
                "saliency map must hold one single-channel image, got batch {batch} with {channels} channels"
            )));
        }
        if (height, width) != (side, side) {
            return Err(BgSwapError::inference(format!(
                "saliency map is {width}x{height} but the model canvas is {side}x{side}"
            )));
        }
        Ok(())
    }
}
