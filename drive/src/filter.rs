use std::collections::VecDeque;

/// Number of samples held by the filter window.
pub const WINDOW_SIZE: usize = 31;

/// FIFO window of raw accelerometer samples used to remove sensor noise.
///
/// Both averages weight the samples by their distance from the middle of the
/// window, so the result describes the sample `WINDOW_SIZE / 2` positions
/// back rather than the newest one.
#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    window: VecDeque<[f32; 3]>,
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MovingAverageFilter {
    pub fn new() -> Self {
        MovingAverageFilter { window: VecDeque::with_capacity(WINDOW_SIZE + 1) }
    }

    /// Appends a sample, dropping the oldest one once the window is full.
    pub fn push(&mut self, sample: [f32; 3]) {
        self.window.push_back(sample);
        if self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == WINDOW_SIZE
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Exponentially weighted average of the window, or `None` until the
    /// window holds `WINDOW_SIZE` samples.
    ///
    /// The weight of the element at offset `j` from the center is
    /// `N / (1 + |j|)` in integer arithmetic.
    pub fn compute_ema(&self) -> Option<[f32; 3]> {
        let n = WINDOW_SIZE as i32;
        self.weighted_average(|j| if j < 0 { n / (1 - j) } else { n / (j + 1) })
    }

    /// Linearly weighted average of the window, or `None` until the window
    /// is full. Weights fall off by one per step away from the center.
    pub fn compute_wma(&self) -> Option<[f32; 3]> {
        let center = center_index();
        self.weighted_average(|j| if j < 0 { center + j } else { center - j })
    }

    fn weighted_average<F>(&self, weight: F) -> Option<[f32; 3]>
    where
        F: Fn(i32) -> i32,
    {
        if !self.is_full() {
            return None;
        }

        let n = WINDOW_SIZE as i32;
        let center = center_index();
        let mut result = [0.0f32; 3];

        for (axis, value) in result.iter_mut().enumerate() {
            let mut denominator = 0i32;
            let mut sum = 0.0f32;

            for j in -(n / 2)..center {
                let multiplier = weight(j);
                denominator += multiplier;
                sum += multiplier as f32 * self.window[(center + j - 1) as usize][axis];
            }

            *value = sum / denominator as f32;
        }

        Some(result)
    }
}

fn center_index() -> i32 {
    let n = WINDOW_SIZE as i32;
    (n / 2) + (n % 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn filled_with(sample: [f32; 3]) -> MovingAverageFilter {
        let mut filter = MovingAverageFilter::new();
        for _ in 0..WINDOW_SIZE {
            filter.push(sample);
        }
        filter
    }

    #[test]
    fn test_not_enough_data() {
        let mut filter = MovingAverageFilter::new();
        for _ in 0..WINDOW_SIZE - 1 {
            filter.push([1.0, 2.0, 3.0]);
            assert!(filter.compute_ema().is_none());
            assert!(filter.compute_wma().is_none());
        }
        filter.push([1.0, 2.0, 3.0]);
        assert!(filter.compute_ema().is_some());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut filter = MovingAverageFilter::new();
        for i in 0..100 {
            filter.push([i as f32, 0.0, 0.0]);
        }
        assert_eq!(filter.len(), WINDOW_SIZE);
        assert!(filter.is_full());
        filter.clear();
        assert!(filter.is_empty());
    }

    #[test]
    fn test_constant_input_is_preserved() {
        let filter = filled_with([0.3, -1.2, 9.81]);

        let ema = filter.compute_ema().unwrap();
        assert_relative_eq!(ema[0], 0.3, epsilon = 1e-5);
        assert_relative_eq!(ema[1], -1.2, epsilon = 1e-5);
        assert_relative_eq!(ema[2], 9.81, epsilon = 1e-5);

        let wma = filter.compute_wma().unwrap();
        assert_relative_eq!(wma[2], 9.81, epsilon = 1e-5);
    }

    #[test]
    fn test_ema_weights_center_sample() {
        // A single spike in the middle of the window contributes 31 / sum(weights).
        let mut filter = MovingAverageFilter::new();
        for i in 0..WINDOW_SIZE {
            let x = if i == 15 { 1.0 } else { 0.0 };
            filter.push([x, 0.0, 0.0]);
        }

        let n = WINDOW_SIZE as i32;
        let denominator: i32 = (-15..16).map(|j: i32| if j < 0 { n / (1 - j) } else { n / (j + 1) }).sum();
        let ema = filter.compute_ema().unwrap();
        assert_relative_eq!(ema[0], 31.0 / denominator as f32, epsilon = 1e-6);
        assert_eq!(ema[1], 0.0);
    }

    #[test]
    fn test_ema_deterministic() {
        let mut filter = MovingAverageFilter::new();
        for i in 0..WINDOW_SIZE {
            let v = (i as f32 * 0.37).sin();
            filter.push([v, v * 2.0, 9.81 + v]);
        }
        assert_eq!(filter.compute_ema(), filter.compute_ema());
    }
}
