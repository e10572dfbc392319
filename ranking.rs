use crate::labels::LabelTable;
use crate::models::RecognitionResult;

const PROBABILITY_TOLERANCE: f32 = 1e-3;

/// Numerically stable softmax: shifts by the max before exponentiating.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut exps = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for v in values {
        let e = (v - max_val).exp();
        exps.push(e);
        sum += e;
    }
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; values.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

/// True when `scores` already look like a softmax output.
pub fn is_distribution(scores: &[f32]) -> bool {
    if scores.is_empty() {
        return false;
    }
    let mut sum = 0.0;
    for &s in scores {
        if !s.is_finite() || !(0.0..=1.0).contains(&s) {
            return false;
        }
        sum += s;
    }
    (sum - 1.0).abs() <= PROBABILITY_TOLERANCE
}

/// Indices of the `k` largest values; ties keep the lower index first.
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k.min(values.len()));
    order
}

/// Turns raw scores into the `k` most likely labels.
///
/// # Panics
///
/// Panics if `scores` is longer than `labels`; the loader refuses to build a
/// model whose output size differs from the label count.
pub fn rank(scores: &[f32], labels: &LabelTable, k: usize) -> Vec<RecognitionResult> {
    assert!(
        scores.len() <= labels.len(),
        "score vector ({}) longer than label table ({})",
        scores.len(),
        labels.len()
    );
    let probs = if is_distribution(scores) {
        scores.to_vec()
    } else {
        softmax(scores)
    };
    top_k_indices(&probs, k)
        .into_iter()
        .map(|idx| RecognitionResult {
            label: labels
                .get(idx)
                .map(str::to_string)
                .unwrap_or_else(|| unreachable!("index {idx} checked against label table")),
            confidence: probs[idx].clamp(0.0, 1.0),
        })
        .collect()
}
