use std::sync::{Arc, Mutex};
use std::time::Duration;

use derivative::Derivative;
use http::{Response, StatusCode};
use hyper::Body;
use rand::Rng;
use tracing::{info, warn};

use crate::handler::fault::Fault;
use crate::handler::rule::{
    keys, AccessRule, AccessVerb, Matcher, ResponseRule, ResponseVerb, Rule,
};

/// Delay bounds for slow rules without `slow_min` / `slow_max` entries, in milliseconds.
pub const DEFAULT_SLOW_MIN: u64 = 1000;
pub const DEFAULT_SLOW_MAX: u64 = 3000;
pub const DEFAULT_STATUS_CODE: u16 = 401;

/// Status codes that a `return` rule raises as faults instead of building a response.
const STATUS_CODE_FAULTS: &[(u16, Fault)] =
    &[(403, Fault::PermissionDenied), (404, Fault::NotFound)];

/// Status codes that a `return` rule answers with a canned response.
const STATUS_CODE_RESPONSES: &[(u16, fn(Body) -> Response<Body>)] = &[(500, server_error)];

/// Source of the draws of the probability gate and of slow effects.
pub trait RandomSource: Send + Sync {
    /// Uniform in `[0, 100)`.
    fn percent(&self) -> f64;
    /// Uniform in `[low, high]`, `low <= high`.
    fn between(&self, low: u64, high: u64) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Always draws the same percentage; slow delays still come from the thread rng.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl RandomSource for FixedDraw {
    fn percent(&self) -> f64 {
        self.0
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        ThreadRandom.between(low, high)
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Remembers the requested delays and returns at once.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        match self.slept.lock() {
            Ok(slept) => slept.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        match self.slept.lock() {
            Ok(mut slept) => slept.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }
}

/// Marks responses built from a fixed template rather than from the status code alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canned {
    ServerError,
}

fn server_error(body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.extensions_mut().insert(Canned::ServerError);
    response
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Executor {
    #[derivative(Debug = "ignore")]
    random: Arc<dyn RandomSource>,
    #[derivative(Debug = "ignore")]
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom), Arc::new(ThreadSleeper))
    }
}

impl Executor {
    pub fn new(random: Arc<dyn RandomSource>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { random, sleeper }
    }

    /// Draws once from `[0, 100)` and fires when the rule probability is at least the draw, so a
    /// probability of 0 only fires on a draw of exactly 0.
    pub fn should_fire<M: Matcher>(&self, rule: &Rule<M>) -> bool {
        rule.probability.as_percent() >= self.random.percent()
    }

    /// When `slow_max <= slow_min` the delay is exactly `slow_min`.
    pub fn slow_delay<M: Matcher>(&self, rule: &Rule<M>) -> Duration {
        let slow_min = rule.arg(keys::SLOW_MIN, DEFAULT_SLOW_MIN);
        let slow_max = rule.arg(keys::SLOW_MAX, DEFAULT_SLOW_MAX);
        let millis = if slow_max <= slow_min {
            slow_min
        } else {
            self.random.between(slow_min, slow_max)
        };
        Duration::from_millis(millis)
    }

    pub fn perform_slow<M: Matcher>(&self, rule: &Rule<M>) -> Duration {
        let delay = self.slow_delay(rule);
        warn!("{}: chaos effect: slow {}ms", rule.reference(), delay.as_millis());
        self.sleeper.sleep(delay);
        delay
    }

    /// Unknown `exception` identifiers fall back to the default fault of the rule variant.
    pub fn perform_raise<M: Matcher>(&self, rule: &Rule<M>) -> Fault {
        let fault = match rule.get(keys::EXCEPTION) {
            None => M::DEFAULT_FAULT,
            Some(identifier) => Fault::resolve(identifier, M::DEFAULT_FAULT),
        };
        warn!("{}: chaos effect: raise {}", rule.reference(), fault.name());
        fault
    }

    pub fn perform_return(&self, rule: &ResponseRule) -> Result<Response<Body>, Fault> {
        let mut code = rule.arg(keys::STATUS_CODE, DEFAULT_STATUS_CODE);
        warn!("{}: chaos effect: return {}", rule.reference(), code);
        if let Some((_, fault)) = STATUS_CODE_FAULTS.iter().find(|(c, _)| *c == code) {
            return Err(*fault);
        }

        let body = Body::from(format!("Chaos response {}", code));
        if let Some((_, canned)) = STATUS_CODE_RESPONSES.iter().find(|(c, _)| *c == code) {
            return Ok(canned(body));
        }

        let status = match StatusCode::from_u16(code) {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    "{}: invalid status code {}: {}, using {}",
                    rule.reference(),
                    code,
                    e,
                    DEFAULT_STATUS_CODE
                );
                code = DEFAULT_STATUS_CODE;
                StatusCode::UNAUTHORIZED
            }
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;
        info!("{}: response status set to {}", rule.reference(), code);
        Ok(response)
    }

    /// Gates and runs a response rule. `Ok(None)` means the request should go on, `Ok(Some(_))`
    /// replaces the response.
    pub fn perform_response(&self, rule: &ResponseRule) -> Result<Option<Response<Body>>, Fault> {
        if !self.should_fire(rule) {
            return Ok(None);
        }
        match rule.verb {
            ResponseVerb::Slow => {
                self.perform_slow(rule);
                Ok(None)
            }
            ResponseVerb::Raise => Err(self.perform_raise(rule)),
            ResponseVerb::Return => self.perform_return(rule).map(Some),
        }
    }

    pub fn perform_access(&self, rule: &AccessRule) -> Result<bool, Fault> {
        if !self.should_fire(rule) {
            return Ok(false);
        }
        match rule.verb {
            AccessVerb::Slow => {
                self.perform_slow(rule);
                Ok(true)
            }
            AccessVerb::Raise => Err(self.perform_raise(rule)),
        }
    }
}
