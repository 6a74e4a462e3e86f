//! Admission evaluation
//!
//! A pure function of its inputs. Strict mode is the only path that turns a
//! real-time insufficiency into a rejection.

use gpuadmit_core::{AdmissionVerdict, CheckMode, VerdictReason};

/// Inputs of one admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionInput {
    pub requested_memory_mb: u64,
    /// Reconciled used memory, real-time or cached
    pub used_memory_mb: u64,
    pub total_memory_mb: u64,
    pub safety_margin_mb: u64,
    /// Mode to apply; `Disabled` whenever checking is off for the attempt
    pub mode: CheckMode,
    /// The used figure came from cached data after a failed read
    pub used_fallback: bool,
}

impl AdmissionInput {
    /// `total - used - margin`, may be negative
    pub fn available_memory_mb(&self) -> i128 {
        i128::from(self.total_memory_mb)
            - i128::from(self.used_memory_mb)
            - i128::from(self.safety_margin_mb)
    }

    /// Pre-existing bookkeeping check: `requested <= total - used`, no margin
    fn cached_fits(&self) -> bool {
        i128::from(self.requested_memory_mb)
            <= i128::from(self.total_memory_mb) - i128::from(self.used_memory_mb)
    }
}

/// Decide whether `device_id` can take the requested memory
pub fn evaluate(device_id: &str, input: &AdmissionInput) -> AdmissionVerdict {
    let available = input.available_memory_mb();
    let fits = i128::from(input.requested_memory_mb) <= available;

    let (admit, reason, soft_reject) = if fits {
        (true, VerdictReason::Fits, false)
    } else {
        match (input.mode, input.used_fallback) {
            (CheckMode::Strict, false) => (false, VerdictReason::RealTimeMemoryExceeded, false),
            (CheckMode::Warning, false) => {
                (true, VerdictReason::RealTimeMemoryExceededWarningOnly, true)
            }
            _ if input.cached_fits() => (true, VerdictReason::CachedCapacityFits, false),
            _ => (false, VerdictReason::CachedMemoryExceeded, false),
        }
    };

    AdmissionVerdict {
        device_id: device_id.to_string(),
        admit,
        reason,
        used_fallback: input.used_fallback,
        soft_reject,
        requested_memory_mb: input.requested_memory_mb,
        used_memory_mb: input.used_memory_mb,
        total_memory_mb: input.total_memory_mb,
        safety_margin_mb: input.safety_margin_mb,
        available_memory_mb: clamp_i64(available),
    }
}

/// Compute units a request needs against the cached compute bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeDemand {
    pub requested_units: u32,
    pub used_units: u32,
    pub total_units: u32,
}

impl ComputeDemand {
    /// `requested <= total - used`
    pub fn fits(&self) -> bool {
        self.requested_units <= self.total_units.saturating_sub(self.used_units)
    }
}

/// Evaluate one device request: the cached compute check first, then memory.
///
/// Compute units are never checked in real time, so a compute shortfall
/// rejects in every mode.
pub fn evaluate_request(
    device_id: &str,
    memory: &AdmissionInput,
    compute: &ComputeDemand,
) -> AdmissionVerdict {
    if compute.fits() {
        return evaluate(device_id, memory);
    }

    AdmissionVerdict {
        device_id: device_id.to_string(),
        admit: false,
        reason: VerdictReason::CachedComputeExceeded,
        used_fallback: memory.used_fallback,
        soft_reject: false,
        requested_memory_mb: memory.requested_memory_mb,
        used_memory_mb: memory.used_memory_mb,
        total_memory_mb: memory.total_memory_mb,
        safety_margin_mb: memory.safety_margin_mb,
        available_memory_mb: clamp_i64(memory.available_memory_mb()),
    }
}

fn clamp_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(mode: CheckMode, used_fallback: bool) -> AdmissionInput {
        AdmissionInput {
            requested_memory_mb: 4096,
            used_memory_mb: 6144,
            total_memory_mb: 8192,
            safety_margin_mb: 100,
            mode,
            used_fallback,
        }
    }

    #[test]
    fn test_strict_rejects_realtime_insufficiency() {
        let verdict = evaluate("gpu-0", &input(CheckMode::Strict, false));
        assert!(!verdict.admit);
        assert_eq!(verdict.reason, VerdictReason::RealTimeMemoryExceeded);
        assert_eq!(verdict.available_memory_mb, 1948);
        assert!(!verdict.soft_reject);
    }

    #[test]
    fn test_warning_admits_with_soft_reject() {
        let verdict = evaluate("gpu-0", &input(CheckMode::Warning, false));
        assert!(verdict.admit);
        assert!(verdict.soft_reject);
        assert_eq!(verdict.reason, VerdictReason::RealTimeMemoryExceededWarningOnly);
    }

    #[test]
    fn test_fallback_uses_cached_arithmetic() {
        for mode in [CheckMode::Strict, CheckMode::Warning, CheckMode::Disabled] {
            // 4096 > 8192 - 6144, so bookkeeping alone rejects too
            let verdict = evaluate("gpu-0", &input(mode, true));
            assert!(!verdict.admit, "{mode}");
            assert_eq!(verdict.reason, VerdictReason::CachedMemoryExceeded);
            assert!(verdict.used_fallback);

            let mut fits = input(mode, true);
            fits.requested_memory_mb = 2048;
            let verdict = evaluate("gpu-0", &fits);
            assert!(verdict.admit, "{mode}");
            assert_eq!(verdict.reason, VerdictReason::CachedCapacityFits);
        }
    }

    #[test]
    fn test_disabled_ignores_margin() {
        let mut input = input(CheckMode::Disabled, false);
        input.requested_memory_mb = 2048;
        let verdict = evaluate("gpu-0", &input);
        assert!(verdict.admit);
        assert_eq!(verdict.reason, VerdictReason::CachedCapacityFits);
        assert!(!verdict.soft_reject);
    }

    #[test]
    fn test_fits() {
        let mut input = input(CheckMode::Strict, false);
        input.used_memory_mb = 1024;
        let verdict = evaluate("gpu-0", &input);
        assert!(verdict.admit);
        assert_eq!(verdict.reason, VerdictReason::Fits);
        assert_eq!(verdict.available_memory_mb, 7068);
    }

    #[test]
    fn test_negative_available() {
        let input = AdmissionInput {
            requested_memory_mb: 0,
            used_memory_mb: 9000,
            total_memory_mb: 8192,
            safety_margin_mb: 100,
            mode: CheckMode::Strict,
            used_fallback: false,
        };
        let verdict = evaluate("gpu-0", &input);
        assert!(!verdict.admit);
        assert_eq!(verdict.available_memory_mb, -908);
    }

    #[test]
    fn test_idempotent() {
        let input = input(CheckMode::Warning, false);
        assert_eq!(evaluate("gpu-0", &input), evaluate("gpu-0", &input));
    }

    #[test]
    fn test_compute_shortfall_rejects_in_every_mode() {
        let compute = ComputeDemand {
            requested_units: 50,
            used_units: 60,
            total_units: 100,
        };
        for mode in [CheckMode::Strict, CheckMode::Warning, CheckMode::Disabled] {
            let mut memory = input(mode, false);
            memory.requested_memory_mb = 512;
            let verdict = evaluate_request("gpu-0", &memory, &compute);
            assert!(!verdict.admit);
            assert_eq!(verdict.reason, VerdictReason::CachedComputeExceeded);
        }

        let roomy = ComputeDemand {
            requested_units: 40,
            ..compute
        };
        let verdict = evaluate_request("gpu-0", &input(CheckMode::Strict, false), &roomy);
        assert_eq!(verdict.reason, VerdictReason::RealTimeMemoryExceeded);
    }

    fn any_mode() -> impl Strategy<Value = CheckMode> {
        prop_oneof![
            Just(CheckMode::Strict),
            Just(CheckMode::Warning),
            Just(CheckMode::Disabled),
        ]
    }

    proptest! {
        #[test]
        fn prop_strict_never_admits_beyond_available(
            total in any::<u64>(),
            used in any::<u64>(),
            margin in any::<u64>(),
            requested in any::<u64>(),
        ) {
            let input = AdmissionInput {
                requested_memory_mb: requested,
                used_memory_mb: used,
                total_memory_mb: total,
                safety_margin_mb: margin,
                mode: CheckMode::Strict,
                used_fallback: false,
            };
            let verdict = evaluate("gpu-0", &input);
            let available = i128::from(total) - i128::from(used) - i128::from(margin);
            if i128::from(requested) > available {
                prop_assert!(!verdict.admit);
            } else {
                prop_assert!(verdict.admit);
            }
        }

        #[test]
        fn prop_fallback_matches_cached_only(
            total in 0u64..1_000_000,
            used in 0u64..1_000_000,
            margin in 0u64..10_000,
            requested in 0u64..1_000_000,
            mode in any_mode(),
        ) {
            let input = AdmissionInput {
                requested_memory_mb: requested,
                used_memory_mb: used,
                total_memory_mb: total,
                safety_margin_mb: margin,
                mode,
                used_fallback: true,
            };
            let verdict = evaluate("gpu-0", &input);
            let cached_only = i128::from(requested) <= i128::from(total) - i128::from(used);
            prop_assert_eq!(verdict.admit, cached_only);
            prop_assert!(!verdict.soft_reject);
        }
    }
}
