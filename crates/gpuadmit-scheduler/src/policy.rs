//! Effective policy resolution
//!
//! Enablement is resolved per pod from an ordered list of optional sources:
//! pod annotation, then the process-wide default, then off. The mode and the
//! safety margin are process-wide and fixed at start.

use gpuadmit_core::{
    CheckMode, EffectivePolicy, EnablementSource, PodSpec, RealtimeCheckConfig,
    DEFAULT_SAFETY_MARGIN_MB,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Process-wide policy defaults, resolved once at start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyDefaults {
    /// Process-wide enablement; `None` when no layer set it
    pub enabled: Option<bool>,
    /// Process-wide check mode
    pub mode: CheckMode,
    /// Capacity reserved before admission math, in MB
    pub safety_margin_mb: u64,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            enabled: None,
            mode: CheckMode::Strict,
            safety_margin_mb: DEFAULT_SAFETY_MARGIN_MB,
        }
    }
}

impl PolicyDefaults {
    /// Build defaults from layered process configuration
    pub fn from_config(config: &RealtimeCheckConfig) -> Self {
        Self {
            enabled: config.enabled,
            mode: resolve_mode(config.mode.as_deref()),
            safety_margin_mb: config.safety_margin_mb,
        }
    }
}

/// Parse the configured mode.
///
/// An absent mode means `strict`. An unrecognized mode disables checking, so a
/// typo can never start rejecting pods.
pub fn resolve_mode(raw: Option<&str>) -> CheckMode {
    match raw {
        None => CheckMode::Strict,
        Some(value) => match value.parse::<CheckMode>() {
            Ok(mode) => mode,
            Err(e) => {
                warn!(
                    mode = %value,
                    error = %e,
                    "Unrecognized real-time check mode, disabling real-time checks"
                );
                CheckMode::Disabled
            }
        },
    }
}

/// Resolves the effective policy of each scheduling attempt
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    defaults: PolicyDefaults,
}

impl PolicyResolver {
    /// Create a resolver over fixed process defaults
    pub fn new(defaults: PolicyDefaults) -> Self {
        Self { defaults }
    }

    /// Process-wide defaults this resolver applies
    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// Resolve the policy for one pod
    pub fn resolve(&self, pod: &PodSpec) -> EffectivePolicy {
        let pod_override = match pod.realtime_check_override() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    pod = %pod.key(),
                    error = %e,
                    "Ignoring malformed real-time check annotation"
                );
                None
            }
        };

        let layers = [
            (EnablementSource::PodAnnotation, pod_override),
            (EnablementSource::ProcessDefault, self.defaults.enabled),
        ];
        let (source, flag) = layers
            .into_iter()
            .find_map(|(source, value)| value.map(|v| (source, v)))
            .unwrap_or((EnablementSource::BuiltinDefault, false));

        let policy = EffectivePolicy {
            enabled: flag && self.defaults.mode != CheckMode::Disabled,
            mode: self.defaults.mode,
            safety_margin_mb: self.defaults.safety_margin_mb,
            source,
        };

        debug!(
            pod = %pod.key(),
            enabled = policy.enabled,
            mode = %policy.mode,
            source = ?policy.source,
            "Resolved real-time check policy"
        );

        policy
    }
}
