//! Entropy integer quantizer: histogram accumulation and KL-divergence
//! threshold search.
//!
//! The threshold search follows the 8-bit inference calibration scheme: for
//! each candidate clip threshold the symmetric clipped distribution `P` is
//! re-binned into the target range to form `Q`, `Q` is expanded back over
//! `P`'s support, both are smoothed, and the threshold with the smallest
//! `KL(P || Q)` wins.

/// Smooths a distribution so no bin is zero before the KL computation.
///
/// L1-normalizes first, then moves `epsilon` into each zero bin, paid for
/// proportionally by the non-zero bins.
pub(crate) fn make_smooth(dist: &mut [f32]) {
    let epsilon = f32::EPSILON;

    let norm: f32 = dist.iter().map(|v| v.abs()).sum();
    if norm > 0.0 {
        for v in dist.iter_mut() {
            *v /= norm;
        }
    }

    let zero_count = dist.iter().filter(|v| v.abs() < epsilon).count();
    let nonzero_count = dist.len() - zero_count;
    if nonzero_count == 0 || zero_count == 0 {
        return;
    }

    #[allow(clippy::cast_precision_loss)]
    let y = epsilon * zero_count as f32 / nonzero_count as f32;
    for v in dist.iter_mut() {
        if v.abs() < epsilon {
            *v += epsilon;
        } else {
            *v -= y;
        }
    }
}

/// `KL(p || q)`; any zero bin or shape mismatch yields `f64::MAX` so the
/// candidate loses the threshold search.
pub(crate) fn kl_divergence(p: &[f32], q: &[f32]) -> f64 {
    if p.len() != q.len() || p.is_empty() {
        return f64::MAX;
    }

    let mut v = 0.0f64;
    for i in 0..p.len() {
        if p[i] == 0.0 || q[i] == 0.0 {
            return f64::MAX;
        }
        v += f64::from(p[i]) * (f64::from(p[i]) / f64::from(q[i])).ln();
    }
    v
}

/// Expands the quantized distribution back over the original support in
/// `[-threshold, threshold)`, splitting each quantized bin's mass over the
/// non-zero positions it covers, with fractional edge bins counted
/// fractionally.
fn expand_candidate_distribution(
    distribution: &[u32],
    quantized: &[f32],
    threshold: usize,
) -> Vec<f32> {
    let mut expanded = vec![0.0f32; threshold * 2];
    #[allow(clippy::cast_precision_loss)]
    let merged_cnt = expanded.len() as f32 / quantized.len() as f32;
    let left_boundary = distribution.len() / 2 - threshold;

    for (i, &qval) in quantized.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let start = i as f32 * merged_cnt;
        let end = start + merged_cnt;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_ceil = start.ceil() as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let end_floor = end.floor() as usize;
        #[allow(clippy::cast_precision_loss)]
        let left_ratio = start_ceil as f32 - start;
        #[allow(clippy::cast_precision_loss)]
        let right_ratio = end - end_floor as f32;
        let mut nonzero_count = 0.0f32;

        if left_ratio > 0.0 && left_boundary + start_ceil > 0 {
            if distribution[left_boundary + start_ceil - 1] != 0 {
                nonzero_count += left_ratio;
            }
        }
        if right_ratio > 0.0 && left_boundary + end_floor < distribution.len() {
            if distribution[left_boundary + end_floor] != 0 {
                nonzero_count += right_ratio;
            }
        }
        for j in start_ceil..end_floor {
            if distribution[left_boundary + j] != 0 {
                nonzero_count += 1.0;
            }
        }
        if nonzero_count == 0.0 {
            continue;
        }

        let value = qval / nonzero_count;
        if left_ratio > 0.0 && start_ceil > 0 {
            expanded[start_ceil - 1] += value * left_ratio;
        }
        if right_ratio > 0.0 && end_floor < expanded.len() {
            expanded[end_floor] += value * right_ratio;
        }
        for j in start_ceil..end_floor {
            if distribution[left_boundary + j] != 0 {
                expanded[j] = value;
            }
        }
    }

    expanded
}

/// Searches `t in [target_bins / 2, hist.len() / 2]` for the clip threshold
/// with minimal KL divergence.
fn compute_threshold(hist: &[u32], target_bins: usize) -> usize {
    let zero_point_index = hist.len() / 2;
    let start_bin = target_bins / 2;
    let end_bin = hist.len() / 2;
    let mut negative_outliers = 0u64;
    let mut positive_outliers = 0u64;
    let mut min_divergence = f64::MAX;
    let mut target_threshold = end_bin;

    for threshold in start_bin..=end_bin {
        negative_outliers += u64::from(hist[zero_point_index - threshold]);
        positive_outliers += u64::from(hist[zero_point_index + threshold - 1]);
    }

    for threshold in start_bin..=end_bin {
        // Clip to [-threshold, threshold) and park the outlier mass on the
        // endpoints.
        let p_hist = &hist[zero_point_index - threshold..zero_point_index + threshold];
        #[allow(clippy::cast_precision_loss)]
        let mut p_distribution: Vec<f32> = p_hist.iter().map(|&v| v as f32).collect();

        negative_outliers -= u64::from(hist[zero_point_index - threshold]);
        positive_outliers -= u64::from(hist[zero_point_index + threshold - 1]);
        #[allow(clippy::cast_precision_loss)]
        {
            p_distribution[0] += negative_outliers as f32;
            let last = p_distribution.len() - 1;
            p_distribution[last] += positive_outliers as f32;
        }

        // Re-bin [-threshold, threshold) into target_bins by proportional
        // accumulation.
        let mut q_distribution = vec![0.0f32; target_bins];
        #[allow(clippy::cast_precision_loss)]
        let merged_cnt = (threshold * 2) as f32 / target_bins as f32;
        let left_boundary = zero_point_index - threshold;
        for (i, qbin) in q_distribution.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let start = i as f32 * merged_cnt;
            let end = start + merged_cnt;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let start_ceil = start.ceil() as usize;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let end_floor = end.floor() as usize;
            #[allow(clippy::cast_precision_loss)]
            if left_boundary + start_ceil > 0 {
                *qbin +=
                    (start_ceil as f32 - start) * hist[left_boundary + start_ceil - 1] as f32;
            }
            #[allow(clippy::cast_precision_loss)]
            if left_boundary + end_floor < hist.len() {
                *qbin += (end - end_floor as f32) * hist[left_boundary + end_floor] as f32;
            }
            #[allow(clippy::cast_precision_loss)]
            for j in start_ceil..end_floor {
                *qbin += hist[left_boundary + j] as f32;
            }
        }

        let mut q_expanded = expand_candidate_distribution(hist, &q_distribution, threshold);

        make_smooth(&mut p_distribution);
        make_smooth(&mut q_expanded);
        let divergence = kl_divergence(&p_distribution, &q_expanded);

        if divergence < min_divergence {
            min_divergence = divergence;
            target_threshold = threshold;
        }
    }

    target_threshold
}

/// Entropy integer quantizer parameterized by the code range.
///
/// The range bounds are inclusive; widths share this one state machine and
/// differ only in their `encode`/`decode` packing, provided by impl blocks
/// on the width aliases.
#[derive(Debug)]
pub struct EntropyQuantizer<const RANGE_MIN: i32, const RANGE_MAX: i32> {
    histogram_bins: usize,
    hist_interval: f32,
    max: f32,
    min: f32,
    bias: f32,
    scale: f32,
    scale_reciprocal: f32,
    left_boundary: f32,
    non_bias: bool,
    histogram: Vec<u32>,
}

impl<const RANGE_MIN: i32, const RANGE_MAX: i32> Default
    for EntropyQuantizer<RANGE_MIN, RANGE_MAX>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const RANGE_MIN: i32, const RANGE_MAX: i32> EntropyQuantizer<RANGE_MIN, RANGE_MAX> {
    const _RANGE_VALID: () = assert!(RANGE_MIN < RANGE_MAX, "invalid value range");

    /// Creates an untrained quantizer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            histogram_bins: 0,
            hist_interval: 1.0,
            max: f32::MIN_POSITIVE,
            min: f32::MAX,
            bias: 0.0,
            scale: 0.0,
            scale_reciprocal: 0.0,
            left_boundary: 0.0,
            non_bias: false,
            histogram: Vec::new(),
        }
    }

    /// Overrides the histogram bin count; ignored unless larger than the
    /// code range.
    pub fn set_histogram_bins(&mut self, bins: usize) {
        if bins > (RANGE_MAX - RANGE_MIN) as usize {
            self.histogram_bins = bins;
        }
    }

    /// Sets the scale directly (deserialized parameters).
    pub fn set_scale(&mut self, val: f32) {
        if val > 0.0 {
            self.scale = val;
            self.scale_reciprocal = 1.0 / val;
        }
    }

    /// Sets the bias directly.
    pub fn set_bias(&mut self, val: f32) {
        self.bias = val;
    }

    /// Sets the observed sample maximum; required before feeding.
    pub fn set_max(&mut self, val: f32) {
        self.max = val;
    }

    /// Sets the observed sample minimum; required before feeding.
    pub fn set_min(&mut self, val: f32) {
        self.min = val;
    }

    /// Selects symmetric (zero-bias) mode.
    pub fn set_non_bias(&mut self, val: bool) {
        self.non_bias = val;
    }

    /// Histogram bin count in effect.
    #[must_use]
    pub fn histogram_bins(&self) -> usize {
        self.histogram_bins
    }

    /// Trained scale.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Trained bias.
    #[must_use]
    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// Observed maximum.
    #[must_use]
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Observed minimum.
    #[must_use]
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Whether symmetric mode is selected.
    #[must_use]
    pub fn non_bias(&self) -> bool {
        self.non_bias
    }

    /// `1 / scale`, used on the decode path.
    #[must_use]
    pub fn scale_reciprocal(&self) -> f32 {
        self.scale_reciprocal
    }

    fn init_histogram(&mut self) {
        if self.histogram_bins == 0 {
            #[allow(clippy::cast_sign_loss)]
            let range = if self.non_bias {
                RANGE_MIN.unsigned_abs().max(RANGE_MAX.unsigned_abs()) as usize
            } else {
                (RANGE_MAX - RANGE_MIN) as usize
            };
            self.histogram_bins = 4096usize.max(range * 8);
        }
        // Histogram width rounds up to even so the zero point splits it.
        self.histogram = vec![0u32; (self.histogram_bins + 1) >> 1 << 1];
        #[allow(clippy::cast_precision_loss)]
        if self.non_bias {
            self.bias = 0.0;
            let val = self.max.abs().max(self.min.abs());
            self.left_boundary = -val;
            self.hist_interval = (val * 2.0) / self.histogram.len() as f32;
        } else {
            self.bias = -(self.min + (self.max - self.min) * 0.5);
            self.left_boundary = self.min;
            self.hist_interval = (self.max - self.min) / self.histogram.len() as f32;
        }
    }

    /// Accumulates `vec` into the histogram.
    ///
    /// Returns `false` when no sample range was configured
    /// (`max < min`).
    pub fn feed(&mut self, vec: &[f32]) -> bool {
        if self.max < self.min {
            return false;
        }
        if self.histogram.is_empty() {
            self.init_histogram();
        }
        for &v in vec {
            let mut index = 0isize;
            if self.hist_interval > 0.0 {
                #[allow(clippy::cast_possible_truncation)]
                {
                    index = ((v - self.left_boundary) / self.hist_interval) as isize;
                }
            }
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let index = index.clamp(0, self.histogram.len() as isize - 1) as usize;
            self.histogram[index] += 1;
        }
        true
    }

    /// Runs the threshold search and fixes `(scale, bias)`.
    ///
    /// Returns `false` when the histogram is empty.
    pub fn train(&mut self) -> bool {
        let sum: u64 = self.histogram.iter().map(|&v| u64::from(v)).sum();
        if sum == 0 {
            return false;
        }

        #[allow(clippy::cast_sign_loss)]
        let target_bins = ((RANGE_MAX - RANGE_MIN) as usize + 1) / 2 * 2;
        let threshold_bins = compute_threshold(&self.histogram, target_bins);
        #[allow(clippy::cast_precision_loss)]
        let threshold = (threshold_bins as f32 + 0.5) * self.hist_interval;
        #[allow(clippy::cast_precision_loss)]
        {
            self.scale = (target_bins / 2) as f32 / threshold;
        }
        #[allow(clippy::cast_precision_loss)]
        if !self.non_bias {
            self.bias += (RANGE_MAX + RANGE_MIN) as f32 * 0.5 / self.scale;
        }
        self.scale_reciprocal = 1.0 / self.scale;
        true
    }

    /// `clip((val + bias) * scale)` into the code range, unrounded.
    #[inline]
    #[must_use]
    pub fn quantize_value(&self, val: f32) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        ((val + self.bias) * self.scale).clamp(RANGE_MIN as f32, RANGE_MAX as f32)
    }
}

/// INT16 quantizer.
pub type EntropyInt16Quantizer = EntropyQuantizer<-32767, 32767>;
/// UINT16 quantizer.
pub type EntropyUInt16Quantizer = EntropyQuantizer<0, 65535>;
/// INT8 quantizer.
pub type EntropyInt8Quantizer = EntropyQuantizer<-127, 127>;
/// UINT8 quantizer.
pub type EntropyUInt8Quantizer = EntropyQuantizer<0, 255>;
/// INT4 quantizer (packed, two lanes per byte).
pub type EntropyInt4Quantizer = EntropyQuantizer<-8, 7>;
/// UINT4 quantizer (packed, two lanes per byte).
pub type EntropyUInt4Quantizer = EntropyQuantizer<0, 15>;

impl EntropyQuantizer<-32767, 32767> {
    /// Encodes floats into INT16 codes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, input: &[f32], out: &mut [i16]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = self.quantize_value(*v).round() as i16;
        }
    }

    /// Decodes INT16 codes into floats.
    pub fn decode(&self, input: &[i16], out: &mut [f32]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = f32::from(*v) * self.scale_reciprocal - self.bias;
        }
    }
}

impl EntropyQuantizer<0, 65535> {
    /// Encodes floats into UINT16 codes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode(&self, input: &[f32], out: &mut [u16]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = self.quantize_value(*v).round() as u16;
        }
    }

    /// Decodes UINT16 codes into floats.
    pub fn decode(&self, input: &[u16], out: &mut [f32]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = f32::from(*v) * self.scale_reciprocal - self.bias;
        }
    }
}

impl EntropyQuantizer<-127, 127> {
    /// Encodes floats into INT8 codes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, input: &[f32], out: &mut [i8]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = self.quantize_value(*v).round() as i8;
        }
    }

    /// Decodes INT8 codes into floats.
    pub fn decode(&self, input: &[i8], out: &mut [f32]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = f32::from(*v) * self.scale_reciprocal - self.bias;
        }
    }
}

impl EntropyQuantizer<0, 255> {
    /// Encodes floats into UINT8 codes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode(&self, input: &[f32], out: &mut [u8]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = self.quantize_value(*v).round() as u8;
        }
    }

    /// Decodes UINT8 codes into floats.
    pub fn decode(&self, input: &[u8], out: &mut [f32]) {
        for (v, o) in input.iter().zip(out.iter_mut()) {
            *o = f32::from(*v) * self.scale_reciprocal - self.bias;
        }
    }
}

impl EntropyQuantizer<-8, 7> {
    /// Encodes floats into packed INT4 codes, low lane first.
    ///
    /// The dimension must be even; `out` holds `input.len() / 2` bytes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode(&self, input: &[f32], out: &mut [u8]) {
        assert_eq!(input.len() % 2, 0, "dimension must be aligned with 2");
        for (pair, o) in input.chunks_exact(2).zip(out.iter_mut()) {
            let lo = self.quantize_value(pair[0]).round() as i32;
            let hi = self.quantize_value(pair[1]).round() as i32;
            *o = ((hi as u8) << 4) | (lo as u8 & 0xF);
        }
    }

    /// Decodes packed INT4 codes, sign-extending each lane.
    pub fn decode(&self, input: &[u8], out: &mut [f32]) {
        assert_eq!(out.len() % 2, 0, "dimension must be aligned with 2");
        for (i, &v) in input.iter().enumerate() {
            let lo = ((v << 4) as i8) >> 4;
            let hi = (v as i8) >> 4;
            out[2 * i] = f32::from(lo) * self.scale_reciprocal - self.bias;
            out[2 * i + 1] = f32::from(hi) * self.scale_reciprocal - self.bias;
        }
    }
}

impl EntropyQuantizer<0, 15> {
    /// Encodes floats into packed UINT4 codes, low lane first.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode(&self, input: &[f32], out: &mut [u8]) {
        assert_eq!(input.len() % 2, 0, "dimension must be aligned with 2");
        for (pair, o) in input.chunks_exact(2).zip(out.iter_mut()) {
            let lo = self.quantize_value(pair[0]).round() as i32;
            let hi = self.quantize_value(pair[1]).round() as i32;
            *o = ((hi as u8) << 4) | (lo as u8 & 0xF);
        }
    }

    /// Decodes packed UINT4 codes without sign extension.
    pub fn decode(&self, input: &[u8], out: &mut [f32]) {
        assert_eq!(out.len() % 2, 0, "dimension must be aligned with 2");
        for (i, &v) in input.iter().enumerate() {
            out[2 * i] = f32::from(v & 0xF) * self.scale_reciprocal - self.bias;
            out[2 * i + 1] = f32::from(v >> 4) * self.scale_reciprocal - self.bias;
        }
    }
}
