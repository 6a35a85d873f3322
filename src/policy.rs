//! Policy table: categories, tiers, windows, and allowances.
//!
//! The table is built once at startup and immutable afterwards. Two named
//! profiles ship with the crate: [`Profile::Relaxed`] for pre-production
//! environments and [`Profile::Strict`] for production thresholds. Exactly
//! one profile is active per process, selected at startup (typically via
//! [`Profile::from_env`]); it is never hot-swapped.
//!
//! Custom tables can be assembled with [`PolicyTable::builder`] or
//! deserialized from JSON with [`PolicyTable::from_json`].

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PolicyError;

/// Canonical category names shared with the calling layer. Keeping them here
/// makes every limit centrally auditable instead of scattered per route.
pub mod categories {
    pub const KUNDLI: &str = "kundli";
    pub const CHAT: &str = "chat";
    pub const AUTH: &str = "auth";
    pub const REGISTER: &str = "register";
    pub const PASSWORD_RESET: &str = "passwordReset";
    pub const FEEDBACK: &str = "feedback";
    pub const UPLOAD: &str = "upload";
    pub const GENERAL: &str = "general";
    pub const STRICT: &str = "strict";

    pub const ALL: &[&str] = &[
        KUNDLI,
        CHAT,
        AUTH,
        REGISTER,
        PASSWORD_RESET,
        FEEDBACK,
        UPLOAD,
        GENERAL,
        STRICT,
    ];
}

/// Subscription tier of the identity making a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    /// Parse a tier name. Unknown or anonymous tiers resolve to `Free`; the
    /// caller's session layer may hand us anything.
    pub fn parse(s: &str) -> Tier {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Tier::Basic,
            "premium" => Tier::Premium,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-window allowance for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    Limited(u64),
    Unlimited,
}

impl Allowance {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }
}

// In config, an allowance is either a number or the string "unlimited".
impl Serialize for Allowance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Allowance::Limited(n) => serializer.serialize_u64(*n),
            Allowance::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Allowance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AllowanceVisitor;

        impl<'de> Visitor<'de> for AllowanceVisitor {
            type Value = Allowance;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or the string \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Allowance, E> {
                Ok(Allowance::Limited(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Allowance, E> {
                u64::try_from(v)
                    .map(Allowance::Limited)
                    .map_err(|_| E::custom("allowance must be non-negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Allowance, E> {
                if v.eq_ignore_ascii_case("unlimited") {
                    Ok(Allowance::Unlimited)
                } else {
                    Err(E::custom(format!("expected \"unlimited\", got {v:?}")))
                }
            }
        }

        deserializer.deserialize_any(AllowanceVisitor)
    }
}

/// Window and allowances for one category.
#[derive(Debug, Clone)]
pub struct CategoryPolicy {
    window: Duration,
    allowances: BTreeMap<Tier, Allowance>,
    message: Arc<str>,
}

impl CategoryPolicy {
    /// Same allowance for every tier.
    pub fn flat(window: Duration, limit: u64, message: impl Into<Arc<str>>) -> Self {
        let mut allowances = BTreeMap::new();
        allowances.insert(Tier::Free, Allowance::Limited(limit));
        Self { window, allowances, message: message.into() }
    }

    /// Per-tier allowances. Must include `Tier::Free`; the table builder
    /// rejects the policy otherwise.
    pub fn tiered(
        window: Duration,
        allowances: impl IntoIterator<Item = (Tier, Allowance)>,
        message: impl Into<Arc<str>>,
    ) -> Self {
        Self { window, allowances: allowances.into_iter().collect(), message: message.into() }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn allowance_for(&self, tier: Tier) -> Option<Allowance> {
        self.allowances
            .get(&tier)
            .or_else(|| self.allowances.get(&Tier::Free))
            .copied()
    }
}

/// The `(window, allowance)` pair resolved for one request.
#[derive(Debug, Clone)]
pub struct ResolvedLimit {
    pub window: Duration,
    pub allowance: Allowance,
    /// Category-specific text surfaced to the end user on denial.
    pub exhausted_message: Arc<str>,
}

/// Immutable map from category to [`CategoryPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    categories: BTreeMap<String, CategoryPolicy>,
}

impl PolicyTable {
    pub fn builder() -> PolicyTableBuilder {
        PolicyTableBuilder::default()
    }

    /// Resolve `(category, tier)` to its window and allowance. Unknown tiers
    /// fall back to the category's free allowance; an unknown category is a
    /// configuration error.
    pub fn resolve(&self, category: &str, tier: Tier) -> Result<ResolvedLimit, PolicyError> {
        let policy = self
            .categories
            .get(category)
            .ok_or_else(|| PolicyError::UnknownCategory(category.to_string()))?;
        let allowance = policy
            .allowance_for(tier)
            .ok_or_else(|| PolicyError::invalid(category, "no allowance for the free tier"))?;
        Ok(ResolvedLimit {
            window: policy.window,
            allowance,
            exhausted_message: policy.message.clone(),
        })
    }

    /// Startup check: every category the calling layer references must be
    /// registered. Run this before serving traffic so a typo aborts process
    /// initialization instead of failing requests.
    pub fn validate(&self, referenced: &[&str]) -> Result<(), PolicyError> {
        for category in referenced {
            if !self.categories.contains_key(*category) {
                return Err(PolicyError::UnknownCategory(category.to_string()));
            }
        }
        Ok(())
    }

    /// Registered category names, sorted.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Load a table from a JSON document (see [`PolicyConfig`] for the shape).
    pub fn from_json(json: &str) -> Result<PolicyTable, PolicyError> {
        let config: PolicyConfig = serde_json::from_str(json)
            .map_err(|e| PolicyError::MalformedConfig(e.to_string()))?;
        PolicyTable::from_config(config)
    }

    /// Build a table from deserialized configuration.
    pub fn from_config(config: PolicyConfig) -> Result<PolicyTable, PolicyError> {
        let mut builder = PolicyTable::builder();
        for (name, category) in config.categories {
            let window = Duration::from_secs(category.window_secs);
            let policy = match (category.allowance, category.tiers.is_empty()) {
                (Some(_), false) => {
                    return Err(PolicyError::invalid(
                        &name,
                        "set either a flat allowance or per-tier allowances, not both",
                    ));
                }
                (Some(Allowance::Limited(limit)), true) => {
                    CategoryPolicy::flat(window, limit, category.message)
                }
                (Some(Allowance::Unlimited), true) => CategoryPolicy::tiered(
                    window,
                    [(Tier::Free, Allowance::Unlimited)],
                    category.message,
                ),
                (None, false) => {
                    CategoryPolicy::tiered(window, category.tiers, category.message)
                }
                (None, true) => {
                    return Err(PolicyError::invalid(&name, "no allowance configured"));
                }
            };
            builder = builder.category(name, policy);
        }
        builder.build()
    }
}

/// Builder enforcing the table invariants at startup.
#[derive(Debug, Default)]
pub struct PolicyTableBuilder {
    categories: BTreeMap<String, CategoryPolicy>,
}

impl PolicyTableBuilder {
    pub fn category(mut self, name: impl Into<String>, policy: CategoryPolicy) -> Self {
        self.categories.insert(name.into(), policy);
        self
    }

    pub fn build(self) -> Result<PolicyTable, PolicyError> {
        for (name, policy) in &self.categories {
            if name.is_empty() {
                return Err(PolicyError::invalid(name, "category name must not be empty"));
            }
            // Store keys are "rl:{category}:{identity}"; a colon in the
            // category would let two categories alias the same key space.
            if name.contains(':') {
                return Err(PolicyError::invalid(name, "category name must not contain ':'"));
            }
            if policy.window.is_zero() {
                return Err(PolicyError::invalid(name, "window must be non-zero"));
            }
            if policy.allowance_for(Tier::Free).is_none() {
                return Err(PolicyError::invalid(name, "no allowance for the free tier"));
            }
        }
        Ok(PolicyTable { categories: self.categories })
    }
}

/// JSON shape for a policy table.
///
/// ```json
/// {
///   "categories": {
///     "kundli": {
///       "window_secs": 86400,
///       "tiers": { "free": 1, "premium": 50, "enterprise": "unlimited" },
///       "message": "Daily kundli generation limit reached."
///     },
///     "auth": { "window_secs": 900, "allowance": 10, "message": "Too many attempts." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub categories: BTreeMap<String, CategoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub window_secs: u64,
    #[serde(default)]
    pub allowance: Option<Allowance>,
    #[serde(default)]
    pub tiers: BTreeMap<Tier, Allowance>,
    pub message: String,
}

/// Named configuration profile, selected once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// High thresholds for pre-production testing.
    Relaxed,
    /// Production-grade thresholds.
    Strict,
}

impl Profile {
    pub fn parse(s: &str) -> Result<Profile, PolicyError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relaxed" => Ok(Profile::Relaxed),
            "strict" => Ok(Profile::Strict),
            other => Err(PolicyError::UnknownProfile(other.to_string())),
        }
    }

    /// Read the active profile from an environment variable. An unset
    /// variable selects `Strict`; a set-but-unknown value is a configuration
    /// error and should abort startup.
    pub fn from_env(var: &str) -> Result<Profile, PolicyError> {
        match std::env::var(var) {
            Ok(value) => Profile::parse(&value),
            Err(std::env::VarError::NotPresent) => Ok(Profile::Strict),
            Err(std::env::VarError::NotUnicode(raw)) => {
                Err(PolicyError::UnknownProfile(raw.to_string_lossy().into_owned()))
            }
        }
    }

    /// The built-in policy table for this profile.
    pub fn table(self) -> PolicyTable {
        match self {
            Profile::Strict => strict_table(),
            Profile::Relaxed => relaxed_table(),
        }
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * 60 * 60;

fn strict_table() -> PolicyTable {
    use Allowance::{Limited, Unlimited};
    use Tier::{Basic, Enterprise, Free, Premium};

    let table = PolicyTable::builder()
        .category(
            categories::KUNDLI,
            CategoryPolicy::tiered(
                Duration::from_secs(DAY),
                [
                    (Free, Limited(1)),
                    (Basic, Limited(5)),
                    (Premium, Limited(50)),
                    (Enterprise, Unlimited),
                ],
                "Daily kundli generation limit reached. Upgrade your plan for more charts.",
            ),
        )
        .category(
            categories::CHAT,
            CategoryPolicy::tiered(
                Duration::from_secs(HOUR),
                [
                    (Free, Limited(20)),
                    (Basic, Limited(100)),
                    (Premium, Limited(500)),
                    (Enterprise, Unlimited),
                ],
                "Hourly chat message limit reached. Upgrade your plan to keep chatting.",
            ),
        )
        .category(
            categories::AUTH,
            CategoryPolicy::flat(
                Duration::from_secs(15 * MINUTE),
                10,
                "Too many sign-in attempts. Please try again later.",
            ),
        )
        .category(
            categories::REGISTER,
            CategoryPolicy::flat(
                Duration::from_secs(HOUR),
                5,
                "Too many accounts created from this address. Please try again later.",
            ),
        )
        .category(
            categories::PASSWORD_RESET,
            CategoryPolicy::flat(
                Duration::from_secs(HOUR),
                3,
                "Too many password reset requests. Please try again later.",
            ),
        )
        .category(
            categories::FEEDBACK,
            CategoryPolicy::flat(
                Duration::from_secs(DAY),
                10,
                "Daily feedback limit reached. Thank you for your enthusiasm!",
            ),
        )
        .category(
            categories::UPLOAD,
            CategoryPolicy::tiered(
                Duration::from_secs(HOUR),
                [
                    (Free, Limited(5)),
                    (Basic, Limited(20)),
                    (Premium, Limited(100)),
                    (Enterprise, Unlimited),
                ],
                "Hourly upload limit reached.",
            ),
        )
        .category(
            categories::GENERAL,
            CategoryPolicy::flat(
                Duration::from_secs(15 * MINUTE),
                300,
                "Too many requests. Please slow down.",
            ),
        )
        .category(
            categories::STRICT,
            CategoryPolicy::flat(
                Duration::from_secs(15 * MINUTE),
                10,
                "Too many requests to a sensitive endpoint. Please try again later.",
            ),
        )
        .build();

    // The built-in tables are covered by tests; a failure here is a bug in
    // this module, not an operational condition.
    table.expect("built-in strict profile must be valid")
}

fn relaxed_table() -> PolicyTable {
    use Allowance::{Limited, Unlimited};
    use Tier::{Free, Premium};

    let flat = |window_secs: u64, limit: u64, message: &str| {
        CategoryPolicy::flat(Duration::from_secs(window_secs), limit, message)
    };

    let table = PolicyTable::builder()
        .category(
            categories::KUNDLI,
            CategoryPolicy::tiered(
                Duration::from_secs(DAY),
                [(Free, Limited(1_000)), (Premium, Unlimited)],
                "Daily kundli generation limit reached. Upgrade your plan for more charts.",
            ),
        )
        .category(categories::CHAT, flat(HOUR, 10_000, "Hourly chat message limit reached."))
        .category(categories::AUTH, flat(15 * MINUTE, 1_000, "Too many sign-in attempts."))
        .category(categories::REGISTER, flat(HOUR, 1_000, "Too many accounts created."))
        .category(
            categories::PASSWORD_RESET,
            flat(HOUR, 1_000, "Too many password reset requests."),
        )
        .category(categories::FEEDBACK, flat(DAY, 1_000, "Daily feedback limit reached."))
        .category(categories::UPLOAD, flat(HOUR, 1_000, "Hourly upload limit reached."))
        .category(categories::GENERAL, flat(15 * MINUTE, 100_000, "Too many requests."))
        .category(categories::STRICT, flat(15 * MINUTE, 1_000, "Too many requests."))
        .build();

    table.expect("built-in relaxed profile must be valid")
}
