//! Entropy-based integer quantization.
//!
//! Calibrates a per-tensor affine `(scale, bias)` from a sample histogram by
//! searching the clip threshold that minimizes the KL divergence between the
//! original and the quantized bin distributions, then encodes floats into
//! 4/8/16-bit integer codes.

mod entropy;

pub use entropy::{
    EntropyInt16Quantizer, EntropyInt4Quantizer, EntropyInt8Quantizer, EntropyQuantizer,
    EntropyUInt16Quantizer, EntropyUInt4Quantizer, EntropyUInt8Quantizer,
};
