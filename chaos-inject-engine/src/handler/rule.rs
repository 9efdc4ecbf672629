use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::handler::dump::DumpValue;
use crate::handler::fault::Fault;

pub type RuleId = u64;

/// Well-known config entry keys.
pub mod keys {
    pub const EXCEPTION: &str = "exception";
    pub const SLOW_MIN: &str = "slow_min";
    pub const SLOW_MAX: &str = "slow_max";
    pub const STATUS_CODE: &str = "status_code";
    pub const CREATOR: &str = "creator";
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("invalid probability of {0}")]
    InvalidProbability(f64),
    #[error("unknown verb `{verb}` for {kind} rules")]
    UnknownVerb { kind: RuleKind, verb: String },
    #[error("unknown target attribute `{0}`")]
    UnknownAttribute(String),
    #[error("unknown rule kind `{0}`")]
    UnknownKind(String),
    #[error("malformed identity reference `{0}`")]
    MalformedIdentity(String),
    #[error("{0} rule {1} not found")]
    NotFound(RuleKind, RuleId),
}

/// A percentage in `[0, 100]` kept with 5 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Probability(u32);

const PROBABILITY_SCALE: u32 = 100_000;

impl Probability {
    pub const NEVER: Probability = Probability(0);
    pub const ALWAYS: Probability = Probability(100 * PROBABILITY_SCALE);

    /// Rounds `percent` to 5 fractional digits. Values outside `[0, 100]` are rejected, never
    /// clamped.
    pub fn new(percent: f64) -> Result<Self, RuleError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(RuleError::InvalidProbability(percent));
        }
        Ok(Probability(
            (percent * f64::from(PROBABILITY_SCALE)).round() as u32,
        ))
    }

    pub fn as_percent(&self) -> f64 {
        f64::from(self.0) / f64::from(PROBABILITY_SCALE)
    }
}

impl Default for Probability {
    fn default() -> Self {
        Probability::ALWAYS
    }
}

impl TryFrom<f64> for Probability {
    type Error = RuleError;

    fn try_from(percent: f64) -> Result<Self, Self::Error> {
        Probability::new(percent)
    }
}

impl From<Probability> for f64 {
    fn from(probability: Probability) -> Self {
        probability.as_percent()
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:05}",
            self.0 / PROBABILITY_SCALE,
            self.0 % PROBABILITY_SCALE
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Response,
    Access,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Response => write!(f, "response"),
            RuleKind::Access => write!(f, "access"),
        }
    }
}

impl FromStr for RuleKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response" => Ok(RuleKind::Response),
            "access" | "db" => Ok(RuleKind::Access),
            _ => Err(RuleError::UnknownKind(s.to_string())),
        }
    }
}

/// Owner of a [ConfigEntry]: a rule id qualified by its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub kind: RuleKind,
    pub id: RuleId,
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

pub trait Verb:
    fmt::Debug
    + fmt::Display
    + FromStr<Err = RuleError>
    + Copy
    + Eq
    + Hash
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const ALL: &'static [Self];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseVerb {
    Slow,
    Return,
    Raise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessVerb {
    Slow,
    Raise,
}

impl Verb for ResponseVerb {
    const ALL: &'static [Self] = &[ResponseVerb::Slow, ResponseVerb::Return, ResponseVerb::Raise];
}

impl Verb for AccessVerb {
    const ALL: &'static [Self] = &[AccessVerb::Slow, AccessVerb::Raise];
}

impl fmt::Display for ResponseVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseVerb::Slow => write!(f, "slow"),
            ResponseVerb::Return => write!(f, "return"),
            ResponseVerb::Raise => write!(f, "raise"),
        }
    }
}

impl fmt::Display for AccessVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessVerb::Slow => write!(f, "slow"),
            AccessVerb::Raise => write!(f, "raise"),
        }
    }
}

impl FromStr for ResponseVerb {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slow" => Ok(ResponseVerb::Slow),
            "return" => Ok(ResponseVerb::Return),
            "raise" => Ok(ResponseVerb::Raise),
            _ => Err(RuleError::UnknownVerb {
                kind: RuleKind::Response,
                verb: s.to_string(),
            }),
        }
    }
}

impl FromStr for AccessVerb {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slow" => Ok(AccessVerb::Slow),
            "raise" => Ok(AccessVerb::Raise),
            _ => Err(RuleError::UnknownVerb {
                kind: RuleKind::Access,
                verb: s.to_string(),
            }),
        }
    }
}

/// One representation of a resource's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAttribute {
    Name,
    Module,
    AppLabel,
    ClassName,
}

impl TargetAttribute {
    pub const ALL: &'static [TargetAttribute] = &[
        TargetAttribute::Name,
        TargetAttribute::Module,
        TargetAttribute::AppLabel,
        TargetAttribute::ClassName,
    ];
}

impl Default for TargetAttribute {
    fn default() -> Self {
        TargetAttribute::AppLabel
    }
}

impl fmt::Display for TargetAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAttribute::Name => write!(f, "name"),
            TargetAttribute::Module => write!(f, "module"),
            TargetAttribute::AppLabel => write!(f, "app_label"),
            TargetAttribute::ClassName => write!(f, "class_name"),
        }
    }
}

impl FromStr for TargetAttribute {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetAttribute::ALL
            .iter()
            .find(|attribute| attribute.to_string() == s)
            .copied()
            .ok_or_else(|| RuleError::UnknownAttribute(s.to_string()))
    }
}

/// Both sets empty means anyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub for_users: BTreeSet<String>,
    #[serde(default)]
    pub for_groups: BTreeSet<String>,
}

impl Scope {
    pub fn is_anyone(&self) -> bool {
        self.for_users.is_empty() && self.for_groups.is_empty()
    }
}

pub fn check_identity(identity: &str) -> Result<String, RuleError> {
    if identity.is_empty() || identity.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RuleError::MalformedIdentity(identity.to_string()));
    }
    Ok(identity.to_string())
}

/// Keys are not unique, the first entry in insertion order wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub owner: RuleRef,
    pub key: String,
    pub value: String,
}

impl fmt::Display for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// The variant-specific part of a rule: what it targets and how it fails by default.
pub trait Matcher:
    fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Verb: Verb;
    const KIND: RuleKind;
    /// Raised when the configured `exception` can not be resolved.
    const DEFAULT_FAULT: Fault;

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)>;
}

/// An empty route name matches every route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatcher {
    #[serde(default)]
    pub route_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMatcher {
    pub attribute: TargetAttribute,
    #[serde(default)]
    pub value: String,
}

impl Matcher for RouteMatcher {
    type Verb = ResponseVerb;
    const KIND: RuleKind = RuleKind::Response;
    const DEFAULT_FAULT: Fault = Fault::Response;

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
        vec![("route name", DumpValue::Text(self.route_name.clone()))]
    }
}

impl Matcher for ResourceMatcher {
    type Verb = AccessVerb;
    const KIND: RuleKind = RuleKind::Access;
    const DEFAULT_FAULT: Fault = Fault::Access;

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
        vec![
            ("target attribute", DumpValue::Text(self.attribute.to_string())),
            ("target value", DumpValue::Text(self.value.clone())),
        ]
    }
}

/// A declarative fault definition: matcher, scope, probability and effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Rule<M: Matcher> {
    pub id: RuleId,
    pub verb: M::Verb,
    pub enabled: bool,
    pub probability: Probability,
    /// Limit the rule to this host, empty for any.
    #[serde(default)]
    pub on_host: String,
    #[serde(default)]
    pub scope: Scope,
    pub matcher: M,
    #[serde(default)]
    pub config: Vec<ConfigEntry>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

pub type ResponseRule = Rule<RouteMatcher>;
pub type AccessRule = Rule<ResourceMatcher>;

impl<M: Matcher> Rule<M> {
    pub fn reference(&self) -> RuleRef {
        RuleRef {
            kind: M::KIND,
            id: self.id,
        }
    }

    pub fn humanized_enabled(&self) -> &'static str {
        if self.enabled {
            "enabled"
        } else {
            "disabled"
        }
    }

    /// Value of the first config entry named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    /// Falls back to `default` when the entry is absent or can not be parsed.
    pub fn arg<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(
                        "{}: can not parse config {}={:?}, using default",
                        self.reference(),
                        key,
                        raw
                    );
                    default
                }
            },
        }
    }

    pub fn has_entry(&self, key: &str, value: &str) -> bool {
        self.config
            .iter()
            .any(|entry| entry.key == key && entry.value == value)
    }

    /// Moves the rule and its config entries to another id.
    pub(crate) fn with_id(mut self, id: RuleId) -> Self {
        self.id = id;
        let owner = self.reference();
        for entry in self.config.iter_mut() {
            entry.owner = owner;
        }
        self
    }

    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.enabled = enabled;
        self.modified_at = now;
    }
}

impl<M: Matcher> fmt::Display for Rule<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reference(), self.verb)?;
        for (_, value) in self.matcher.dump_fields() {
            write!(f, " {}", value)?;
        }
        Ok(())
    }
}

/// Collects everything of a rule except its identity and timestamps, which are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct RuleBuilder<M: Matcher> {
    verb: M::Verb,
    matcher: M,
    enabled: bool,
    probability: Probability,
    on_host: String,
    users: Vec<String>,
    groups: Vec<String>,
    config: Vec<(String, String)>,
}

impl RuleBuilder<RouteMatcher> {
    pub fn response(verb: ResponseVerb, route_name: impl Into<String>) -> Self {
        Self::new(
            verb,
            RouteMatcher {
                route_name: route_name.into(),
            },
        )
    }
}

impl RuleBuilder<ResourceMatcher> {
    pub fn access(verb: AccessVerb, attribute: TargetAttribute, value: impl Into<String>) -> Self {
        Self::new(
            verb,
            ResourceMatcher {
                attribute,
                value: value.into(),
            },
        )
    }
}

impl<M: Matcher> RuleBuilder<M> {
    pub fn new(verb: M::Verb, matcher: M) -> Self {
        Self {
            verb,
            matcher,
            enabled: true,
            probability: Probability::default(),
            on_host: String::new(),
            users: vec![],
            groups: vec![],
            config: vec![],
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn probability(mut self, probability: Probability) -> Self {
        self.probability = probability;
        self
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.on_host = host.into();
        self
    }

    pub fn for_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.extend(users.into_iter().map(Into::into));
        self
    }

    pub fn for_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    pub fn build(self, id: RuleId, now: DateTime<Utc>) -> Result<Rule<M>, RuleError> {
        let owner = RuleRef { kind: M::KIND, id };
        let scope = Scope {
            for_users: self
                .users
                .iter()
                .map(|user| check_identity(user))
                .collect::<Result<_, _>>()?,
            for_groups: self
                .groups
                .iter()
                .map(|group| check_identity(group))
                .collect::<Result<_, _>>()?,
        };
        Ok(Rule {
            id,
            verb: self.verb,
            enabled: self.enabled,
            probability: self.probability,
            on_host: self.on_host.trim().to_string(),
            scope,
            matcher: self.matcher,
            config: self
                .config
                .into_iter()
                .map(|(key, value)| ConfigEntry { owner, key, value })
                .collect(),
            created_at: now,
            modified_at: now,
        })
    }
}
