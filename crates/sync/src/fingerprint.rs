//! Device fingerprint generation.
//!
//! A fingerprint is a best-effort identifier for this install derived from
//! environment signals. It is not unique and not a secret. The generator only
//! computes it; persisting it is the caller's job.

use chrono::Utc;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::launch::DeviceEnvironment;

const FINGERPRINT_PREFIX: &str = "fp_";
const FINGERPRINT_HEX_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintSignal {
    RenderSurface,
    Screen,
    Timezone,
    Language,
    Platform,
}

impl FingerprintSignal {
    pub const ALL: [FingerprintSignal; 5] = [
        Self::RenderSurface,
        Self::Screen,
        Self::Timezone,
        Self::Language,
        Self::Platform,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::RenderSurface => "render_surface",
            Self::Screen => "screen",
            Self::Timezone => "timezone",
            Self::Language => "language",
            Self::Platform => "platform",
        }
    }
}

impl fmt::Display for FingerprintSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of environment signals.
pub trait EnvironmentProbe: Send + Sync {
    fn collect(&self, signal: FingerprintSignal) -> Result<String, String>;
}

impl EnvironmentProbe for DeviceEnvironment {
    fn collect(&self, signal: FingerprintSignal) -> Result<String, String> {
        let value = match signal {
            FingerprintSignal::RenderSurface => &self.render_surface,
            FingerprintSignal::Screen => &self.screen,
            FingerprintSignal::Timezone => &self.timezone,
            FingerprintSignal::Language => &self.language,
            FingerprintSignal::Platform => &self.platform,
        };
        value
            .as_ref()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| format!("{} not reported by host", signal))
    }
}

/// Signals readable from the local process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironmentProbe;

impl EnvironmentProbe for SystemEnvironmentProbe {
    fn collect(&self, signal: FingerprintSignal) -> Result<String, String> {
        match signal {
            FingerprintSignal::RenderSurface => Err("no rendering surface".to_string()),
            FingerprintSignal::Screen => Err("no screen information".to_string()),
            FingerprintSignal::Timezone => Ok(chrono::Local::now().offset().to_string()),
            FingerprintSignal::Language => std::env::var("LANG")
                .ok()
                .filter(|lang| !lang.is_empty())
                .ok_or_else(|| "LANG not set".to_string()),
            FingerprintSignal::Platform => Ok(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
        }
    }
}

/// Host-reported signals first, local process signals for the gaps.
pub struct LayeredProbe<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> LayeredProbe<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: EnvironmentProbe, B: EnvironmentProbe> EnvironmentProbe for LayeredProbe<A, B> {
    fn collect(&self, signal: FingerprintSignal) -> Result<String, String> {
        self.primary
            .collect(signal)
            .or_else(|_| self.secondary.collect(signal))
    }
}

pub struct DeviceFingerprintGenerator {
    probe: Box<dyn EnvironmentProbe>,
}

impl DeviceFingerprintGenerator {
    pub fn new(probe: Box<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }

    pub fn for_environment(environment: DeviceEnvironment) -> Self {
        Self::new(Box::new(LayeredProbe::new(
            environment,
            SystemEnvironmentProbe,
        )))
    }

    /// Always returns a non-empty fingerprint. Failed signals are replaced by
    /// a placeholder; only when every signal fails is a random value used.
    pub fn generate(&self) -> String {
        let mut components = Vec::with_capacity(FingerprintSignal::ALL.len());
        let mut collected = 0;

        for signal in FingerprintSignal::ALL {
            match self.probe.collect(signal) {
                Ok(value) => {
                    collected += 1;
                    components.push(format!("{}={}", signal, value));
                }
                Err(reason) => {
                    debug!("[Fingerprint] Signal {} unavailable: {}", signal, reason);
                    components.push(format!("{}=unavailable", signal));
                }
            }
        }

        if collected == 0 {
            warn!("[Fingerprint] No environment signals available; using random fingerprint");
            return random_fingerprint();
        }

        let digest = Sha256::digest(components.join("|").as_bytes());
        let hex: String = digest
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect();
        format!("{}{}", FINGERPRINT_PREFIX, &hex[..FINGERPRINT_HEX_CHARS])
    }
}

fn random_fingerprint() -> String {
    format!(
        "{}rand_{}_{}",
        FINGERPRINT_PREFIX,
        Uuid::new_v4().simple(),
        Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProbe;

    impl EnvironmentProbe for FailingProbe {
        fn collect(&self, signal: FingerprintSignal) -> Result<String, String> {
            Err(format!("{} blocked", signal))
        }
    }

    fn full_environment() -> DeviceEnvironment {
        DeviceEnvironment {
            render_surface: Some("canvas:9f2c".to_string()),
            screen: Some("1170x2532x3".to_string()),
            timezone: Some("Europe/Moscow".to_string()),
            language: Some("ru-RU".to_string()),
            platform: Some("ios".to_string()),
        }
    }

    #[test]
    fn fingerprint_is_stable_for_same_environment() {
        let first = DeviceFingerprintGenerator::new(Box::new(full_environment())).generate();
        let second = DeviceFingerprintGenerator::new(Box::new(full_environment())).generate();

        assert_eq!(first, second);
        assert!(first.starts_with("fp_"));
        assert_eq!(first.len(), 3 + 32);
    }

    #[test]
    fn different_environment_gives_different_fingerprint() {
        let mut other = full_environment();
        other.language = Some("en-US".to_string());

        let first = DeviceFingerprintGenerator::new(Box::new(full_environment())).generate();
        let second = DeviceFingerprintGenerator::new(Box::new(other)).generate();
        assert_ne!(first, second);
    }

    #[test]
    fn blocked_render_surface_still_produces_fingerprint() {
        let mut environment = full_environment();
        environment.render_surface = None;

        let fingerprint = DeviceFingerprintGenerator::new(Box::new(environment)).generate();

        assert!(!fingerprint.is_empty());
        assert!(fingerprint.starts_with("fp_"));
        assert!(!fingerprint.starts_with("fp_rand_"));
    }

    #[test]
    fn all_signals_failing_falls_back_to_random() {
        let generator = DeviceFingerprintGenerator::new(Box::new(FailingProbe));
        let first = generator.generate();
        let second = generator.generate();

        assert!(first.starts_with("fp_rand_"));
        assert_ne!(first, second);
    }

    #[test]
    fn layered_probe_fills_gaps_from_system() {
        let generator = DeviceFingerprintGenerator::for_environment(DeviceEnvironment::default());
        let fingerprint = generator.generate();

        // Platform and timezone always come from the local process.
        assert!(!fingerprint.starts_with("fp_rand_"));
    }
}
