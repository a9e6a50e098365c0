use num_complex::Complex32;

pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    pub fn mean(samples: &[Complex32]) -> Complex32 {
        if samples.is_empty() {
            return Complex32::new(0.0, 0.0);
        }
        samples.iter().sum::<Complex32>() / samples.len() as f32
    }

    /// Average of `|s|²`.
    pub fn mean_energy(samples: &[Complex32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
    }
}
