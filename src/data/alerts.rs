//! Disease-risk alert rules.
//!
//! Each rule is a conjunction of two closed intervals, one over temperature
//! and one over humidity. Rules are independent and non-exclusive: any number
//! may hold at once. The table is static; evaluation has no memory.

use std::collections::BTreeSet;

/// Identifier of a disease-risk rule.
///
/// The derived ordering follows the declaration order of the rule table,
/// which is also the order alerts are listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlertId {
    /// R1: white mold (Sclerotinia sclerotiorum).
    WhiteMold,
    /// R2: downy mildew (Peronospora manshurica).
    DownyMildew,
    /// R3: anthracnose (Colletotrichum lindemuthianum).
    Anthracnose,
    /// R4: root rot (Rhizoctonia solani).
    RootRot,
    /// R5: bean common mosaic virus.
    MosaicVirus,
}

impl AlertId {
    /// Short rule code (`R1`..`R5`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::WhiteMold => "R1",
            Self::DownyMildew => "R2",
            Self::Anthracnose => "R3",
            Self::RootRot => "R4",
            Self::MosaicVirus => "R5",
        }
    }

    /// Condition name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WhiteMold => "White mold risk",
            Self::DownyMildew => "Downy mildew risk",
            Self::Anthracnose => "Anthracnose risk",
            Self::RootRot => "Root rot risk",
            Self::MosaicVirus => "Mosaic virus risk",
        }
    }

    /// The rule declared for this id in [`DISEASE_RULES`].
    pub fn rule(&self) -> &'static AlertRule {
        &DISEASE_RULES[*self as usize]
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Closed numeric interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// Inclusive lower bound.
    pub min: f32,
    /// Inclusive upper bound.
    pub max: f32,
}

impl Interval {
    /// Create a closed interval.
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Check whether `value` lies inside the interval, bounds included.
    ///
    /// NaN is never contained.
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A single disease-risk rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    /// Rule identifier.
    pub id: AlertId,
    /// Temperature range in °C.
    pub temperature: Interval,
    /// Relative humidity range in %.
    pub humidity: Interval,
    /// User-facing alert text.
    pub message: &'static str,
}

impl AlertRule {
    /// Check whether both intervals hold.
    pub fn matches(&self, temperature: f32, humidity: f32) -> bool {
        self.temperature.contains(temperature) && self.humidity.contains(humidity)
    }
}

/// The fixed rule table, in declaration order.
pub const DISEASE_RULES: [AlertRule; 5] = [
    AlertRule {
        id: AlertId::WhiteMold,
        temperature: Interval::new(15.0, 25.0),
        humidity: Interval::new(85.0, 100.0),
        message: "ALERT: Ideal conditions for white mold (Sclerotinia sclerotiorum).",
    },
    AlertRule {
        id: AlertId::DownyMildew,
        temperature: Interval::new(15.0, 20.0),
        humidity: Interval::new(80.0, 90.0),
        message: "ALERT: Ideal conditions for downy mildew (Peronospora manshurica).",
    },
    AlertRule {
        id: AlertId::Anthracnose,
        temperature: Interval::new(20.0, 30.0),
        humidity: Interval::new(70.0, 85.0),
        message: "ALERT: Ideal conditions for anthracnose (Colletotrichum lindemuthianum).",
    },
    AlertRule {
        id: AlertId::RootRot,
        temperature: Interval::new(20.0, 28.0),
        humidity: Interval::new(60.0, 75.0),
        message: "ALERT: Ideal conditions for root rot (Rhizoctonia solani).",
    },
    AlertRule {
        id: AlertId::MosaicVirus,
        temperature: Interval::new(20.0, 30.0),
        humidity: Interval::new(60.0, 80.0),
        message: "ALERT: Ideal conditions for mosaic virus (Bean common mosaic virus).",
    },
];

/// Set of rules whose predicate currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActiveAlerts {
    ids: BTreeSet<AlertId>,
}

impl ActiveAlerts {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a rule is active.
    pub fn contains(&self, id: AlertId) -> bool {
        self.ids.contains(&id)
    }

    /// Check if no rule is active.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Active ids in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = AlertId> + '_ {
        self.ids.iter().copied()
    }

    /// Active ids in declaration order, collected.
    pub fn ids(&self) -> Vec<AlertId> {
        self.iter().collect()
    }

    /// Alert messages in declaration order.
    pub fn messages(&self) -> Vec<String> {
        self.iter().map(|id| id.rule().message.to_string()).collect()
    }
}

impl FromIterator<AlertId> for ActiveAlerts {
    fn from_iter<I: IntoIterator<Item = AlertId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Evaluates the rule table against a (temperature, humidity) pair.
#[derive(Debug, Clone, Copy)]
pub struct AlertEngine {
    rules: &'static [AlertRule],
}

impl AlertEngine {
    /// Engine over [`DISEASE_RULES`].
    pub fn new() -> Self {
        Self {
            rules: &DISEASE_RULES,
        }
    }

    /// The rules this engine evaluates.
    pub fn rules(&self) -> &'static [AlertRule] {
        self.rules
    }

    /// Recompute the full active set for the given values.
    pub fn evaluate(&self, temperature: f32, humidity: f32) -> ActiveAlerts {
        self.rules
            .iter()
            .filter(|rule| rule.matches(temperature, humidity))
            .map(|rule| rule.id)
            .collect()
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}
