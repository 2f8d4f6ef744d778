//! Analysis configuration.
//!
//! Mirrors the teacher's tiered validation approach (`ConfigValidator`,
//! range-checked fields with hints) scaled down to the single flat record
//! spec'd for this engine.

mod error;

pub use error::{ConfigError, ConfigResult};

/// How the value-flow graph computes aliasing between two pointer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AliasMode {
    /// Syntactic under-approximation: bitcast/load/store peers only.
    #[default]
    Under,
    /// Full points-to-set intersection.
    Over,
    /// Over-approximate when the checker requests soundness, under otherwise.
    Combined,
}

impl std::str::FromStr for AliasMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "under" => Ok(AliasMode::Under),
            "over" => Ok(AliasMode::Over),
            "combined" => Ok(AliasMode::Combined),
            other => Err(ConfigError::UnknownAliasMode(other.to_string())),
        }
    }
}

/// Configuration record for a single analysis session (spec §6).
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// 0 disables cross-function summary application entirely.
    pub restrict_inline_depth: u32,
    /// Caps callee fan-out per call site.
    pub restrict_cg_size: u32,
    /// Caps summary-application work per call site.
    pub restrict_inline_size: u32,
    /// Access-path depth cap (C1).
    pub restrict_ap_level: u32,
    pub timeout_seconds: f64,
    /// Enables self-checks / strict-mode error propagation.
    pub test_correctness: bool,
    pub alias_mode: AliasMode,
    pub context_sensitive: bool,
    pub k_context: u32,
    /// Inter-engine fixed-point round cap (spec §4.6: "default 10").
    pub max_rounds: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            restrict_inline_depth: 8,
            restrict_cg_size: 512,
            restrict_inline_size: 4096,
            restrict_ap_level: 8,
            timeout_seconds: 600.0,
            test_correctness: false,
            alias_mode: AliasMode::default(),
            context_sensitive: false,
            k_context: 2,
            max_rounds: 10,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.restrict_cg_size == 0 {
            return Err(ConfigError::range_with_hint(
                "restrict_cg_size",
                self.restrict_cg_size,
                1,
                u32::MAX,
                "at least one callee per site must be allowed",
            ));
        }
        if self.k_context == 0 && self.context_sensitive {
            return Err(ConfigError::range_with_hint(
                "k_context",
                self.k_context,
                1,
                u32::MAX,
                "context_sensitive requires k_context >= 1",
            ));
        }
        if self.timeout_seconds <= 0.0 {
            return Err(ConfigError::range_with_hint(
                "timeout_seconds",
                self.timeout_seconds,
                "0.0 (exclusive)",
                "inf",
                "timeout must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = AnalysisConfig::default();
        assert_eq!(c.restrict_inline_depth, 8);
        assert_eq!(c.restrict_cg_size, 512);
        assert_eq!(c.restrict_inline_size, 4096);
        assert_eq!(c.restrict_ap_level, 8);
        assert_eq!(c.k_context, 2);
        assert_eq!(c.max_rounds, 10);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_zero_cg_size() {
        let mut c = AnalysisConfig::default();
        c.restrict_cg_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn alias_mode_parses() {
        assert_eq!("under".parse::<AliasMode>().unwrap(), AliasMode::Under);
        assert_eq!("over".parse::<AliasMode>().unwrap(), AliasMode::Over);
        assert_eq!(
            "combined".parse::<AliasMode>().unwrap(),
            AliasMode::Combined
        );
        assert!("bogus".parse::<AliasMode>().is_err());
    }
}
