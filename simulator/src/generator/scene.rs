use crate::workflow::config::{EchoConfig, ScenarioConfig, SourceConfig};
use anyhow::Context;
use ofdmradar::array::steering_vector;
use ofdmradar::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f32::consts::PI;

/// Seeded synthetic environment for both processing chains.
pub struct Scene {
    scenario: ScenarioConfig,
    rng: StdRng,
    receiver_noise: Normal<f32>,
    array_noise: Normal<f32>,
}

impl Scene {
    pub fn new(scenario: ScenarioConfig) -> anyhow::Result<Self> {
        let receiver_noise = awgn(scenario.noise).context("receiver noise")?;
        let array_noise = awgn(scenario.array_noise).context("array noise")?;
        let rng = StdRng::seed_from_u64(scenario.seed);
        Ok(Self {
            scenario,
            rng,
            receiver_noise,
            array_noise,
        })
    }

    /// Sum of delayed, Doppler-shifted copies of one transmitted frame.
    ///
    /// Delays wrap around the frame, as they would for a periodic transmitter.
    pub fn radar_echo(&mut self, frame: &[Complex32], symbol_length: usize) -> Vec<Complex32> {
        let len = frame.len();
        let echoes: Vec<EchoConfig> = self.scenario.echoes.clone();
        let mut rx = vec![Complex32::new(0.0, 0.0); len];
        for echo in &echoes {
            let step = 2.0 * std::f64::consts::PI * echo.doppler / symbol_length as f64;
            for (n, value) in rx.iter_mut().enumerate() {
                let rotation = Complex32::from_polar(echo.amplitude, (step * n as f64) as f32);
                *value += frame[(n + len - echo.delay % len) % len] * rotation;
            }
        }
        for value in rx.iter_mut() {
            *value += sample(&mut self.rng, &self.receiver_noise);
        }
        rx
    }

    /// Receiver noise only, for the part of a period past the frame.
    pub fn idle(&mut self, count: usize) -> Vec<Complex32> {
        (0..count)
            .map(|_| sample(&mut self.rng, &self.receiver_noise))
            .collect()
    }

    /// Random per-element gain/phase errors; element 0 stays at unity.
    pub fn element_gains(&mut self, array_size: usize) -> Vec<Complex32> {
        let spread = self.scenario.gain_error.abs();
        (0..array_size)
            .map(|i| {
                if i == 0 || spread == 0.0 {
                    return Complex32::new(1.0, 0.0);
                }
                let magnitude = 1.0 + self.rng.gen_range(-spread..spread);
                let phase = PI * self.rng.gen_range(-spread..spread);
                Complex32::from_polar(magnitude, phase)
            })
            .collect()
    }

    /// `count` snapshots of the configured sources, snapshot-major.
    pub fn array_snapshots(
        &mut self,
        gains: &[Complex32],
        spacing: f64,
        count: usize,
    ) -> Vec<Complex32> {
        let sources = self.scenario.sources.clone();
        self.snapshots(&sources, gains, spacing, count)
    }

    /// `count` snapshots of the calibration pilot alone.
    pub fn pilot_snapshots(
        &mut self,
        pilot_angle: f64,
        gains: &[Complex32],
        spacing: f64,
        count: usize,
    ) -> Vec<Complex32> {
        let pilot = [SourceConfig {
            angle: pilot_angle,
            power: self.scenario.pilot_power,
        }];
        self.snapshots(&pilot, gains, spacing, count)
    }

    fn snapshots(
        &mut self,
        sources: &[SourceConfig],
        gains: &[Complex32],
        spacing: f64,
        count: usize,
    ) -> Vec<Complex32> {
        let n = gains.len();
        let steering: Vec<Vec<Complex32>> = sources
            .iter()
            .map(|source| {
                steering_vector(source.angle, spacing, n)
                    .iter()
                    .map(|a| Complex32::new(a.re as f32, a.im as f32))
                    .collect()
            })
            .collect();

        let mut out = Vec::with_capacity(count * n);
        for _ in 0..count {
            // Each source emits a unit-modulus symbol with random phase.
            let symbols: Vec<Complex32> = sources
                .iter()
                .map(|source| {
                    let phase = self.rng.gen_range(0.0..2.0 * PI);
                    Complex32::from_polar(source.power.sqrt(), phase)
                })
                .collect();
            for i in 0..n {
                let mut x = sample(&mut self.rng, &self.array_noise);
                for (a, s) in steering.iter().zip(&symbols) {
                    x += a[i] * s;
                }
                out.push(x * gains[i]);
            }
        }
        out
    }
}

/// Complex Gaussian noise of standard deviation `sigma`, split evenly over I and Q.
fn awgn(sigma: f32) -> anyhow::Result<Normal<f32>> {
    Normal::new(0.0, sigma / 2f32.sqrt())
        .with_context(|| format!("invalid noise level {}", sigma))
}

fn sample(rng: &mut StdRng, noise: &Normal<f32>) -> Complex32 {
    Complex32::new(noise.sample(rng), noise.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> ScenarioConfig {
        ScenarioConfig {
            noise: 0.0,
            array_noise: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn echo_without_doppler_is_a_cyclic_shift() {
        let mut scene = Scene::new(ScenarioConfig {
            echoes: vec![EchoConfig {
                delay: 2,
                doppler: 0.0,
                amplitude: 0.5,
            }],
            ..quiet()
        })
        .unwrap();
        let frame: Vec<Complex32> = (0..6).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let rx = scene.radar_echo(&frame, 3);
        let expected = [4.0, 5.0, 0.0, 1.0, 2.0, 3.0];
        for (value, e) in rx.iter().zip(expected) {
            assert!((value - Complex32::new(0.5 * e, 0.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_scene() {
        let gains_a = Scene::new(ScenarioConfig {
            gain_error: 0.3,
            ..Default::default()
        })
        .unwrap()
        .element_gains(5);
        let gains_b = Scene::new(ScenarioConfig {
            gain_error: 0.3,
            ..Default::default()
        })
        .unwrap()
        .element_gains(5);
        assert_eq!(gains_a, gains_b);
        assert_eq!(gains_a[0], Complex32::new(1.0, 0.0));
        assert!(gains_a[1..].iter().all(|g| (g.norm() - 1.0).abs() <= 0.3));
    }

    #[test]
    fn noise_power_matches_sigma() {
        let mut scene = Scene::new(ScenarioConfig {
            noise: 0.5,
            echoes: Vec::new(),
            ..Default::default()
        })
        .unwrap();
        let noise = scene.idle(20_000);
        let power = noise.iter().map(|v| v.norm_sqr()).sum::<f32>() / noise.len() as f32;
        assert!((power - 0.25).abs() < 0.02);
    }

    #[test]
    fn noiseless_snapshots_follow_the_steering_vector() {
        let mut scene = Scene::new(ScenarioConfig {
            sources: vec![SourceConfig {
                angle: 0.4,
                power: 4.0,
            }],
            ..quiet()
        })
        .unwrap();
        let gains = vec![Complex32::new(1.0, 0.0); 4];
        let x = scene.array_snapshots(&gains, 0.5, 3);
        assert_eq!(x.len(), 12);
        let a = steering_vector(0.4, 0.5, 4);
        for snapshot in x.chunks_exact(4) {
            let s = snapshot[0];
            assert!((s.norm() - 2.0).abs() < 1e-5);
            for i in 0..4 {
                let expected = Complex32::new(a[i].re as f32, a[i].im as f32) * s;
                assert!((snapshot[i] - expected).norm() < 1e-5);
            }
        }
    }
    #[test]
    fn negative_noise_level_is_rejected() {
        let err = Scene::new(ScenarioConfig {
            array_noise: -0.1,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(format!("{:#}", err).contains("array noise"));
    }
}
