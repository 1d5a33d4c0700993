//! Per-phase transition evaluation.
//!
//! Each function looks at one sample and answers "which phase should we be
//! in now"; entry bookkeeping and action dispatch live in
//! [`FlightStateMachine::step`](super::FlightStateMachine::step).

use tracing::{debug, info, warn};

use super::{FlightPhase, FlightStateMachine, StateSample};
use crate::config::{
    ASCENT_ALTITUDE_THRESHOLD_M, ASCENT_CHECKS, ASCENT_VELOCITY_THRESHOLD_MPS,
    DROGUE_DEPLOY_CHECKS, DROGUE_DEPLOY_VELOCITY_THRESHOLD_MPS, GROUND_AVERAGE_SAMPLES,
    GROUND_WARMUP_MS, LANDED_CHECKS, LANDED_CHECK_INTERVAL_MS, LANDED_VELOCITY_THRESHOLD_MPS,
    MACH_LOCK_CHECKS, MACH_LOCK_VELOCITY_THRESHOLD_MPS, MACH_UNLOCK_CHECKS,
    MACH_UNLOCK_VELOCITY_THRESHOLD_MPS, MAIN_DEPLOY_ALTITUDE_M, MAIN_DEPLOY_CHECKS,
};

/// Standby: run ground calibration, then watch for liftoff.
pub(super) fn update_standby(sm: &mut FlightStateMachine, sample: &StateSample) -> FlightPhase {
    if !sm.ground_ready {
        // Warmup: give the barometer filter time to settle before any
        // sample is allowed into the ground average
        if sample
            .timestamp_ms
            .saturating_sub(sm.ground_warmup_start_ms)
            < GROUND_WARMUP_MS
        {
            return FlightPhase::Standby;
        }

        sm.ground_sum_m += sample.altitude_m;
        sm.ground_samples += 1;
        debug!(
            "ground calibration: {}/{} samples, current_alt={:.2} m",
            sm.ground_samples, GROUND_AVERAGE_SAMPLES, sample.altitude_m
        );

        if sm.ground_samples >= GROUND_AVERAGE_SAMPLES {
            sm.ground_altitude_m = sm.ground_sum_m / f64::from(sm.ground_samples);
            sm.ground_ready = true;
            info!(
                "ground calibration complete: {:.2} m ({} samples)",
                sm.ground_altitude_m, sm.ground_samples
            );
        }
        return FlightPhase::Standby;
    }

    let rel_altitude = sm.relative_altitude(sample.altitude_m);
    let ascent_condition = rel_altitude > ASCENT_ALTITUDE_THRESHOLD_M
        && sample.velocity_mps > ASCENT_VELOCITY_THRESHOLD_MPS;

    if sm.standby_check.update(ascent_condition, ASCENT_CHECKS) {
        return FlightPhase::Ascent;
    }

    if ascent_condition && sm.standby_check.count() > 0 {
        warn!(
            "ascent condition met, waiting for checks: {}/{}",
            sm.standby_check.count(),
            ASCENT_CHECKS
        );
    }

    FlightPhase::Standby
}

/// Ascent: watch for transonic lock-out or for apogee.
pub(super) fn update_ascent(sm: &mut FlightStateMachine, sample: &StateSample) -> FlightPhase {
    let mach_lock = sample.velocity_mps > MACH_LOCK_VELOCITY_THRESHOLD_MPS;
    if sm.mach_lock_check.update(mach_lock, MACH_LOCK_CHECKS) {
        return FlightPhase::MachLock;
    }

    let drogue = sample.velocity_mps < DROGUE_DEPLOY_VELOCITY_THRESHOLD_MPS;
    if sm.drogue_main_check.update(drogue, DROGUE_DEPLOY_CHECKS) {
        return FlightPhase::DrogueDescent;
    }

    FlightPhase::Ascent
}

/// Mach lock: barometric altitude is untrustworthy; the only way out is to
/// slow back below the unlock threshold. The drogue predicate is
/// deliberately not evaluated here.
pub(super) fn update_mach_lock(sm: &mut FlightStateMachine, sample: &StateSample) -> FlightPhase {
    let below_unlock = sample.velocity_mps < MACH_UNLOCK_VELOCITY_THRESHOLD_MPS;
    if sm.mach_unlock_check.update(below_unlock, MACH_UNLOCK_CHECKS) {
        return FlightPhase::Ascent;
    }
    FlightPhase::MachLock
}

/// Drogue descent: once the drogue has actually been commanded, watch for
/// the main-deploy altitude.
pub(super) fn update_drogue_descent(
    sm: &mut FlightStateMachine,
    sample: &StateSample,
) -> FlightPhase {
    if !sm.drogue_fired {
        return FlightPhase::DrogueDescent;
    }

    let rel_altitude = sm.relative_altitude(sample.altitude_m);
    let below_main_alt = rel_altitude < MAIN_DEPLOY_ALTITUDE_M;
    if sm.drogue_main_check.update(below_main_alt, MAIN_DEPLOY_CHECKS) {
        return FlightPhase::MainDescent;
    }

    FlightPhase::DrogueDescent
}

/// Main descent: declare landing after sustained stillness, sampled at a
/// slow pace so descent oscillations cannot fake it.
pub(super) fn update_main_descent(
    sm: &mut FlightStateMachine,
    sample: &StateSample,
) -> FlightPhase {
    let still = sample.velocity_mps.abs() < LANDED_VELOCITY_THRESHOLD_MPS;

    if still {
        let elapsed = sample.timestamp_ms.saturating_sub(sm.last_landed_check_ms);
        if elapsed >= LANDED_CHECK_INTERVAL_MS {
            sm.last_landed_check_ms = sample.timestamp_ms;
            if sm.landed_check.update(true, LANDED_CHECKS) {
                return FlightPhase::Landed;
            }
        }
    } else {
        // Movement restarts the whole landed argument, pacing clock included
        sm.landed_check.update(false, LANDED_CHECKS);
        sm.last_landed_check_ms = sample.timestamp_ms;
    }

    FlightPhase::MainDescent
}
