use std::time::Instant;

use log::{debug, info};
use thiserror::Error;

use crate::data::{ControlConfig, ControlMethod};
use crate::timer::{SamplingEvent, SubscriberClass, SubscriberToken, Timer};

pub const DEFAULT_LIMITS: [f64; 2] = [0.0, 4095.0];
pub const DEFAULT_GAINS: [f64; 3] = [100.0, 0.01, 0.0];

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid control config: {0}")]
    InvalidConfig(String),
    #[error("controller needs a reference sensor")]
    MissingReference,
}

fn missing(method: &str, field: &str) -> ControlError {
    ControlError::InvalidConfig(format!("{method} requires {field}"))
}

/// How two PID controllers compare for the replace-on-config path.
///
/// The classic behavior compares the setpoint alone, which means a
/// gains-only change keeps the running controller (integral and last error
/// survive) but silently drops the new gains. `Full` widens the comparison
/// so a gain or limit change rebuilds the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidEquality {
    #[default]
    SetpointOnly,
    Full,
}

/// Builds controllers from configuration records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFactory {
    pid_equality: PidEquality,
}

impl ControlFactory {
    pub fn new() -> ControlFactory {
        ControlFactory::default()
    }

    pub fn with_pid_equality(pid_equality: PidEquality) -> ControlFactory {
        ControlFactory { pid_equality }
    }

    pub fn create(&self, config: &ControlConfig) -> Result<Controller, ControlError> {
        let limits = config.limits.unwrap_or(DEFAULT_LIMITS);
        match config.method {
            ControlMethod::Manual => {
                let value = config.value.ok_or_else(|| missing("manual", "value"))?;
                Ok(Controller::Manual(ManualControl::new(value, limits)))
            }
            ControlMethod::Timer => {
                let value = config.value.ok_or_else(|| missing("timer", "value"))?;
                let time_on = config.time_on.ok_or_else(|| missing("timer", "time_on"))?;
                let time_off = config.time_off.ok_or_else(|| missing("timer", "time_off"))?;
                if time_on <= 0.0 || time_off <= 0.0 {
                    return Err(ControlError::InvalidConfig(
                        "timer phases must be positive".into(),
                    ));
                }
                Ok(Controller::Timer(TimerControl::new(
                    time_on, time_off, value, limits,
                )))
            }
            ControlMethod::OnBoundaries => {
                let lb = config
                    .lower_bound
                    .ok_or_else(|| missing("on_boundaries", "lower_bound"))?;
                let ub = config
                    .upper_bound
                    .ok_or_else(|| missing("on_boundaries", "upper_bound"))?;
                let value = config.value.ok_or_else(|| missing("on_boundaries", "value"))?;
                if lb > ub {
                    return Err(ControlError::InvalidConfig(format!(
                        "lower bound {lb} above upper bound {ub}"
                    )));
                }
                Ok(Controller::OnBoundaries(OnBoundariesControl::new(
                    lb,
                    ub,
                    value,
                    config.backwards.unwrap_or(false),
                    limits,
                )))
            }
            ControlMethod::Pid => {
                let setpoint = config.setpoint.ok_or_else(|| missing("pid", "setpoint"))?;
                let gains = config.gains.unwrap_or(DEFAULT_GAINS);
                Ok(Controller::Pid(PidControl::new(
                    setpoint,
                    gains,
                    limits,
                    self.pid_equality,
                )))
            }
        }
    }
}

/// The closed controller family. Owned by an actuator, replaceable at
/// runtime through [`ControlFactory`].
#[derive(Debug)]
pub enum Controller {
    Manual(ManualControl),
    Timer(TimerControl),
    OnBoundaries(OnBoundariesControl),
    Pid(PidControl),
}

impl Controller {
    /// The factory default an actuator starts with: open-loop zero output.
    pub fn default_manual() -> Controller {
        Controller::Manual(ManualControl::new(0.0, DEFAULT_LIMITS))
    }

    pub fn method(&self) -> ControlMethod {
        match self {
            Controller::Manual(_) => ControlMethod::Manual,
            Controller::Timer(_) => ControlMethod::Timer,
            Controller::OnBoundaries(_) => ControlMethod::OnBoundaries,
            Controller::Pid(_) => ControlMethod::Pid,
        }
    }

    /// Compute the output value.
    ///
    /// `fired` is the actuator's sampling event for this pass: the gated
    /// laws (hysteresis, PID) only recompute when it is set and hold their
    /// previous output otherwise. `input` is the reference channel value,
    /// `dt` the effective sample period of the reference timer.
    pub fn evaluate(&mut self, fired: bool, input: Option<f64>, dt: f64) -> Result<f64, ControlError> {
        self.evaluate_at(Instant::now(), fired, input, dt)
    }

    fn evaluate_at(
        &mut self,
        now: Instant,
        fired: bool,
        input: Option<f64>,
        dt: f64,
    ) -> Result<f64, ControlError> {
        match self {
            Controller::Manual(c) => Ok(c.evaluate()),
            Controller::Timer(c) => Ok(c.evaluate_at(now)),
            Controller::OnBoundaries(c) => c.evaluate(fired, input),
            Controller::Pid(c) => c.evaluate(fired, input, dt),
        }
    }

    /// Discard internal state, keeping the configuration.
    pub fn reset(&mut self) {
        match self {
            Controller::Manual(_) => {}
            Controller::Timer(c) => c.reset(),
            Controller::OnBoundaries(c) => c.reset(),
            Controller::Pid(c) => c.reset(),
        }
    }

    pub fn limits(&self) -> [f64; 2] {
        match self {
            Controller::Manual(c) => [c.min_val, c.max_val],
            Controller::Timer(c) => [c.min_val, c.max_val],
            Controller::OnBoundaries(c) => [c.min_val, c.max_val],
            Controller::Pid(c) => [c.min_val, c.max_val],
        }
    }

    /// Snapshot of the live configuration, the shape the control surface
    /// re-derives its variables from.
    pub fn config(&self) -> ControlConfig {
        match self {
            Controller::Manual(c) => ControlConfig::manual(c.value),
            Controller::Timer(c) => ControlConfig::timer(c.value_on, c.time_on, c.time_off),
            Controller::OnBoundaries(c) => {
                let mut config = ControlConfig::on_boundaries(c.lower_bound, c.upper_bound, c.value_on);
                config.backwards = Some(c.backwards);
                config
            }
            Controller::Pid(c) => {
                let mut config = ControlConfig::pid(c.setpoint);
                config.gains = Some([c.kp, c.ki, c.kd]);
                config.limits = Some([c.min_val, c.max_val]);
                config
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Controller::Manual(c) => format!("manual({})", c.value),
            Controller::Timer(c) => {
                format!("timer(on: {}s, off: {}s, {})", c.time_on, c.time_off, c.value_on)
            }
            Controller::OnBoundaries(c) => {
                format!("on_boundaries({}, {}, {})", c.lower_bound, c.upper_bound, c.value_on)
            }
            Controller::Pid(c) => format!("pid(setpoint: {})", c.setpoint),
        }
    }
}

impl PartialEq for Controller {
    fn eq(&self, other: &Controller) -> bool {
        match (self, other) {
            (Controller::Manual(a), Controller::Manual(b)) => a.value == b.value,
            (Controller::Timer(a), Controller::Timer(b)) => {
                a.time_on == b.time_on && a.time_off == b.time_off && a.value_on == b.value_on
            }
            (Controller::OnBoundaries(a), Controller::OnBoundaries(b)) => {
                a.lower_bound == b.lower_bound
                    && a.upper_bound == b.upper_bound
                    && a.value_on == b.value_on
            }
            (Controller::Pid(a), Controller::Pid(b)) => {
                let setpoint = a.setpoint == b.setpoint;
                if a.equality == PidEquality::Full || b.equality == PidEquality::Full {
                    setpoint
                        && [a.kp, a.ki, a.kd] == [b.kp, b.ki, b.kd]
                        && [a.min_val, a.max_val] == [b.min_val, b.max_val]
                } else {
                    setpoint
                }
            }
            _ => false,
        }
    }
}

/// Open-loop output at a user-commanded value. The factory default.
#[derive(Debug)]
pub struct ManualControl {
    value: f64,
    min_val: f64,
    max_val: f64,
}

impl ManualControl {
    fn new(value: f64, limits: [f64; 2]) -> ManualControl {
        ManualControl {
            value,
            min_val: limits[0],
            max_val: limits[1],
        }
    }

    fn evaluate(&self) -> f64 {
        self.value.clamp(self.min_val, self.max_val)
    }
}

/// Duty-cycle law: `value_on` for `time_on` seconds, 0 for `time_off`
/// seconds. Owns its phase sub-timer.
#[derive(Debug)]
pub struct TimerControl {
    time_on: f64,
    time_off: f64,
    value_on: f64,
    value: f64,
    is_on: bool,
    min_val: f64,
    max_val: f64,
    timer: Timer,
    sampling: SamplingEvent,
    _token: SubscriberToken,
}

impl TimerControl {
    fn new(time_on: f64, time_off: f64, value_on: f64, limits: [f64; 2]) -> TimerControl {
        let mut timer = Timer::new(time_on);
        let (token, sampling) = timer.subscribe(SubscriberClass::Generic);
        // Force the first evaluation into the on phase
        sampling.raise();
        TimerControl {
            time_on,
            time_off,
            value_on,
            value: value_on,
            is_on: false,
            min_val: limits[0],
            max_val: limits[1],
            timer,
            sampling,
            _token: token,
        }
    }

    fn evaluate_at(&mut self, now: Instant) -> f64 {
        self.timer.tick_at(now);
        if self.sampling.take() {
            if self.is_on {
                self.timer.set_interval_at(self.time_off, now);
                self.is_on = false;
                self.value = 0.0;
            } else {
                self.timer.set_interval_at(self.time_on, now);
                self.is_on = true;
                self.value = self.value_on;
            }
            debug!("duty cycle value: {}, is_on: {}", self.value, self.is_on);
        }
        self.value.clamp(self.min_val, self.max_val)
    }

    fn reset(&mut self) {
        self.is_on = false;
        self.value = self.value_on;
        self.timer.set_interval(self.time_on);
        self.sampling.raise();
    }
}

/// Hysteretic on/off law. Switches only on strictly-outside crossings of
/// the two thresholds and holds in between; `backwards` flips the sense.
#[derive(Debug)]
pub struct OnBoundariesControl {
    lower_bound: f64,
    upper_bound: f64,
    value_on: f64,
    backwards: bool,
    value: f64,
    min_val: f64,
    max_val: f64,
}

impl OnBoundariesControl {
    fn new(
        lower_bound: f64,
        upper_bound: f64,
        value_on: f64,
        backwards: bool,
        limits: [f64; 2],
    ) -> OnBoundariesControl {
        OnBoundariesControl {
            lower_bound,
            upper_bound,
            value_on,
            backwards,
            value: if backwards { value_on } else { 0.0 },
            min_val: limits[0],
            max_val: limits[1],
        }
    }

    fn evaluate(&mut self, fired: bool, input: Option<f64>) -> Result<f64, ControlError> {
        let variable = input.ok_or(ControlError::MissingReference)?;
        if fired {
            if variable < self.lower_bound {
                self.value = if self.backwards { 0.0 } else { self.value_on };
            } else if variable > self.upper_bound {
                self.value = if self.backwards { self.value_on } else { 0.0 };
            }
            debug!(
                "on_boundaries lb: {}, ub: {}, var: {}, value: {}",
                self.lower_bound, self.upper_bound, variable, self.value
            );
        }
        Ok(self.value.clamp(self.min_val, self.max_val))
    }

    fn reset(&mut self) {
        self.value = if self.backwards { self.value_on } else { 0.0 };
    }
}

/// Textbook PID with clamped-integral anti-windup.
#[derive(Debug)]
pub struct PidControl {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    min_val: f64,
    max_val: f64,
    value: f64,
    last_error: f64,
    integral_sum: f64,
    equality: PidEquality,
}

impl PidControl {
    fn new(setpoint: f64, gains: [f64; 3], limits: [f64; 2], equality: PidEquality) -> PidControl {
        info!(
            "pid kp: {}, ki: {}, kd: {}, limits: [{}, {}]",
            gains[0], gains[1], gains[2], limits[0], limits[1]
        );
        PidControl {
            setpoint,
            kp: gains[0],
            ki: gains[1],
            kd: gains[2],
            min_val: limits[0],
            max_val: limits[1],
            value: 0.0,
            last_error: 0.0,
            integral_sum: 0.0,
            equality,
        }
    }

    fn evaluate(&mut self, fired: bool, input: Option<f64>, dt: f64) -> Result<f64, ControlError> {
        let variable = input.ok_or(ControlError::MissingReference)?;
        if fired {
            let error = self.setpoint - variable;
            let d_error = error - self.last_error;

            let p_term = self.kp * error;
            // A zero sample period contributes no integral and no derivative
            let i_term = if dt > 0.0 { self.ki * error * dt } else { 0.0 };
            let d_term = if dt > 0.0 { self.kd * d_error / dt } else { 0.0 };

            // Anti-windup: clamp the integral before summation
            self.integral_sum = (self.integral_sum + i_term).clamp(self.min_val, self.max_val);

            let output = p_term + self.integral_sum + d_term;
            self.value = output.clamp(self.min_val, self.max_val);
            self.last_error = error;
            debug!(
                "pid error: {}, integral_sum: {}, value: {}",
                error, self.integral_sum, self.value
            );
        }
        Ok(self.value)
    }

    fn reset(&mut self) {
        self.value = 0.0;
        self.last_error = 0.0;
        self.integral_sum = 0.0;
    }

    pub fn integral_sum(&self) -> f64 {
        self.integral_sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(start: Instant, secs: f64) -> Instant {
        start + Duration::from_secs_f64(secs)
    }

    fn make(config: &ControlConfig) -> Controller {
        ControlFactory::new().create(config).unwrap()
    }

    #[test]
    fn manual_returns_clamped_value() {
        let mut c = make(&ControlConfig::manual(2000.0));
        assert_eq!(c.evaluate(false, None, 0.0).unwrap(), 2000.0);

        let mut over = make(&ControlConfig::manual(9000.0));
        assert_eq!(over.evaluate(true, Some(1.0), 0.0).unwrap(), 4095.0);
    }

    #[test]
    fn factory_rejects_missing_fields() {
        let mut config = ControlConfig::manual(10.0);
        config.value = None;
        assert!(matches!(
            ControlFactory::new().create(&config),
            Err(ControlError::InvalidConfig(_))
        ));

        let mut config = ControlConfig::timer(100.0, 1.0, 3.0);
        config.time_off = None;
        assert!(ControlFactory::new().create(&config).is_err());

        let mut config = ControlConfig::pid(35.0);
        config.setpoint = None;
        assert!(ControlFactory::new().create(&config).is_err());
    }

    #[test]
    fn duty_cycle_timeline() {
        let start = Instant::now();
        let mut c = make(&ControlConfig::timer(4000.0, 1.0, 3.0));

        let mut outputs = Vec::new();
        let mut t = 0.0;
        while t < 6.0 {
            let v = c.evaluate_at(at(start, t), false, None, 0.0).unwrap();
            outputs.push((t, v));
            t += 0.1;
        }
        let sample = |secs: f64| {
            outputs
                .iter()
                .find(|(t, _)| (*t - secs).abs() < 0.01)
                .unwrap()
                .1
        };
        assert_eq!(sample(0.5), 4000.0);
        assert_eq!(sample(1.5), 0.0);
        assert_eq!(sample(4.5), 4000.0);
        assert_eq!(sample(5.5), 0.0);
    }

    #[test]
    fn hysteresis_rising_trace() {
        let mut c = make(&ControlConfig::on_boundaries(1.1, 2.1, 255.0));
        let trace = [0.0, 1.5, 2.2, 1.5, 1.0, 1.5];
        let outputs: Vec<f64> = trace
            .iter()
            .map(|v| c.evaluate(true, Some(*v), 1.0).unwrap())
            .collect();
        assert_eq!(outputs, [255.0, 255.0, 0.0, 0.0, 255.0, 255.0]);
    }

    #[test]
    fn hysteresis_backwards_flips_the_sense() {
        let mut config = ControlConfig::on_boundaries(1.1, 2.1, 255.0);
        config.backwards = Some(true);
        let mut c = make(&config);
        assert_eq!(c.evaluate(true, Some(0.5), 1.0).unwrap(), 0.0);
        assert_eq!(c.evaluate(true, Some(3.0), 1.0).unwrap(), 255.0);
    }

    #[test]
    fn hysteresis_holds_on_the_edges() {
        let mut c = make(&ControlConfig::on_boundaries(1.0, 2.0, 255.0));
        assert_eq!(c.evaluate(true, Some(0.5), 1.0).unwrap(), 255.0);
        // Values exactly on a bound hold the previous output
        assert_eq!(c.evaluate(true, Some(2.0), 1.0).unwrap(), 255.0);
        assert_eq!(c.evaluate(true, Some(1.0), 1.0).unwrap(), 255.0);
        assert_eq!(c.evaluate(true, Some(2.01), 1.0).unwrap(), 0.0);
        assert_eq!(c.evaluate(true, Some(1.0), 1.0).unwrap(), 0.0);
    }

    #[test]
    fn hysteresis_requires_a_reference() {
        let mut c = make(&ControlConfig::on_boundaries(1.0, 2.0, 255.0));
        assert!(matches!(
            c.evaluate(true, None, 1.0),
            Err(ControlError::MissingReference)
        ));
    }

    #[test]
    fn pid_anti_windup_saturates_exactly() {
        let mut c = make(&ControlConfig::pid(35.0));
        let mut last = 0.0;
        for _ in 0..100_000 {
            last = c.evaluate(true, Some(0.0), 1.0).unwrap();
        }
        assert_eq!(last, 4095.0);
        if let Controller::Pid(pid) = &c {
            assert_eq!(pid.integral_sum(), 4095.0);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn pid_zero_dt_keeps_integral_and_derivative_out() {
        let mut config = ControlConfig::pid(10.0);
        config.gains = Some([2.0, 0.5, 1.0]);
        let mut c = make(&config);
        // One normal step builds some integral
        c.evaluate(true, Some(4.0), 1.0).unwrap();
        let integral = match &c {
            Controller::Pid(pid) => pid.integral_sum(),
            _ => unreachable!(),
        };
        // dt = 0: output is p + clamp(integral), integral unchanged
        let out = c.evaluate(true, Some(4.0), 0.0).unwrap();
        assert_eq!(out, 2.0 * 6.0 + integral);
        if let Controller::Pid(pid) = &c {
            assert_eq!(pid.integral_sum(), integral);
        }
    }

    #[test]
    fn gated_laws_hold_between_firings() {
        let mut c = make(&ControlConfig::on_boundaries(1.1, 2.1, 255.0));
        assert_eq!(c.evaluate(true, Some(0.0), 1.0).unwrap(), 255.0);
        // Not fired: input above ub is ignored, output held
        assert_eq!(c.evaluate(false, Some(5.0), 1.0).unwrap(), 255.0);
        assert_eq!(c.evaluate(true, Some(5.0), 1.0).unwrap(), 0.0);
    }

    #[test]
    fn pid_equality_modes() {
        let factory = ControlFactory::new();
        let a = factory.create(&ControlConfig::pid(35.0)).unwrap();
        let mut gains_changed = ControlConfig::pid(35.0);
        gains_changed.gains = Some([1.0, 1.0, 1.0]);
        let b = factory.create(&gains_changed).unwrap();
        // Classic comparison: setpoint alone
        assert_eq!(a, b);

        let strict = ControlFactory::with_pid_equality(PidEquality::Full);
        let c = strict.create(&ControlConfig::pid(35.0)).unwrap();
        let d = strict.create(&gains_changed).unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn cross_variant_never_equal() {
        let a = make(&ControlConfig::manual(0.0));
        let b = make(&ControlConfig::pid(0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn reset_discards_internal_state() {
        let mut c = make(&ControlConfig::pid(35.0));
        for _ in 0..100 {
            c.evaluate(true, Some(0.0), 1.0).unwrap();
        }
        c.reset();
        if let Controller::Pid(pid) = &c {
            assert_eq!(pid.integral_sum(), 0.0);
        }
    }
}
