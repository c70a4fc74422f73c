//! Naming Bridge
//!
//! Translates logical names to environment-variable keys and suggested
//! physical resource names, and resolves platform-assigned physical names back
//! to logical ones.
//!
//! The environment-derived mapping is authoritative. When a physical name is
//! not in it, a best-effort heuristic looks for the `<prefix>-<kind>-<slug>`
//! segment inside the mangled identifier; anything else resolves to
//! [`Resolution::Unknown`].

use crate::domain::{Layout, LogicalName, ResourceKind};
use crate::port::EnvSource;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Default prefix of every environment key (`SWITCHYARD_QUEUE_ORDERS_URL`)
pub const DEFAULT_ENV_PREFIX: &str = "SWITCHYARD";

/// Which value an environment key carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvSuffix {
    Url,
    Name,
}

impl EnvSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvSuffix::Url => "URL",
            EnvSuffix::Name => "NAME",
        }
    }
}

/// Uppercase token used inside env keys: `nightly-sweep` -> `NIGHTLY_SWEEP`
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Lowercase hyphenated form: `Nightly_Sweep` -> `nightly-sweep`
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

pub fn env_key(prefix: &str, kind: ResourceKind, logical_name: &str, suffix: EnvSuffix) -> String {
    format!(
        "{}_{}_{}_{}",
        normalize(prefix),
        kind.env_segment(),
        normalize(logical_name),
        suffix.as_str()
    )
}

/// Suffixes wired for a kind: queues carry URL and NAME, schedules only NAME
pub fn suffixes(kind: ResourceKind) -> &'static [EnvSuffix] {
    match kind {
        ResourceKind::Queue => &[EnvSuffix::Url, EnvSuffix::Name],
        ResourceKind::Schedule => &[EnvSuffix::Name],
    }
}

/// Physical name requested from the deployment tooling: `switchyard-queue-orders`
pub fn physical_name(prefix: &str, kind: ResourceKind, logical_name: &str) -> String {
    format!("{}-{}-{}", slug(prefix), kind.as_str(), slug(logical_name))
}

/// Pairs of distinct logical names that share an env key or a physical name
///
/// `a-b` and `a_b` both become `..._A_B_...` and `...-a-b`, so the reverse
/// mapping could not tell them apart. Each pair is `(earlier, later)` in input
/// order.
pub fn colliding_names<'a, I>(names: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut by_key: HashMap<String, &'a str> = HashMap::new();
    let mut by_slug: HashMap<String, &'a str> = HashMap::new();
    let mut collisions = Vec::new();

    for name in names {
        let existing = by_key
            .get(&normalize(name))
            .or_else(|| by_slug.get(&slug(name)))
            .copied();
        match existing {
            Some(first) if first != name => {
                collisions.push((first.to_string(), name.to_string()));
            }
            Some(_) => {}
            None => {
                by_key.insert(normalize(name), name);
                by_slug.insert(slug(name), name);
            }
        }
    }
    collisions
}

/// Outcome of resolving a physical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Found in the environment-derived mapping
    Mapped(LogicalName),
    /// Recovered heuristically from a mangled identifier (degraded mode)
    Inferred(LogicalName),
    /// Not a resource this process knows about
    Unknown,
}

impl Resolution {
    pub fn logical_name(&self) -> Option<&str> {
        match self {
            Resolution::Mapped(name) | Resolution::Inferred(name) => Some(name),
            Resolution::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct KindTable {
    /// physical -> logical
    reverse: HashMap<String, LogicalName>,
    /// logical -> physical
    forward: HashMap<LogicalName, String>,
    known: Vec<LogicalName>,
}

/// Bidirectional logical <-> physical association, built once at start-up
#[derive(Debug, Clone, Default)]
pub struct NameMapping {
    prefix: String,
    queues: KindTable,
    schedules: KindTable,
}

impl NameMapping {
    /// Empty mapping that only knows the logical names in `layout`
    pub fn new(prefix: impl Into<String>, layout: &Layout) -> Self {
        let mut mapping = Self {
            prefix: prefix.into(),
            ..Default::default()
        };
        mapping.queues.known = layout.queue_names().map(String::from).collect();
        mapping.schedules.known = layout.schedule_names().map(String::from).collect();
        mapping
    }

    /// Build the mapping from environment variables wired by the deployment
    ///
    /// Missing keys are logged, never fatal.
    pub fn from_env(env: &dyn EnvSource, prefix: &str, layout: &Layout) -> Self {
        let mut mapping = Self::new(prefix, layout);

        for kind in [ResourceKind::Queue, ResourceKind::Schedule] {
            for logical in layout.names(kind) {
                let mut wired = false;
                for suffix in suffixes(kind) {
                    let key = env_key(prefix, kind, logical, *suffix);
                    match env.get(&key).filter(|v| !v.trim().is_empty()) {
                        Some(value) => {
                            let physical = match suffix {
                                EnvSuffix::Url => url_resource(&value).to_string(),
                                EnvSuffix::Name => value.trim().to_string(),
                            };
                            mapping.insert(kind, logical, &physical);
                            wired = true;
                        }
                        None => {
                            warn!(kind = %kind, logical_name = %logical, key = %key, "Environment key not set");
                        }
                    }
                }
                if !wired {
                    warn!(
                        kind = %kind,
                        logical_name = %logical,
                        "No physical name wired, events for this resource can only be resolved heuristically"
                    );
                }
            }
        }

        mapping.log_unclaimed_keys(env);

        info!(
            queues = mapping.queues.forward.len(),
            schedules = mapping.schedules.forward.len(),
            "Name mapping built from environment"
        );
        mapping
    }

    /// Mapping that assumes every resource got exactly its suggested physical name
    pub fn identity(prefix: &str, layout: &Layout) -> Self {
        let mut mapping = Self::new(prefix, layout);
        for kind in [ResourceKind::Queue, ResourceKind::Schedule] {
            for logical in layout.names(kind) {
                mapping.insert(kind, logical, &physical_name(prefix, kind, logical));
            }
        }
        mapping
    }

    /// Add one association (builder style)
    pub fn with_entry(mut self, kind: ResourceKind, logical: &str, physical: &str) -> Self {
        self.insert(kind, logical, physical);
        self
    }

    fn insert(&mut self, kind: ResourceKind, logical: &str, physical: &str) {
        let table = self.table_mut(kind);
        table
            .reverse
            .insert(physical.to_string(), logical.to_string());
        table
            .forward
            .entry(logical.to_string())
            .or_insert_with(|| physical.to_string());
        if !table.known.iter().any(|k| k == logical) {
            table.known.push(logical.to_string());
        }
    }

    fn table(&self, kind: ResourceKind) -> &KindTable {
        match kind {
            ResourceKind::Queue => &self.queues,
            ResourceKind::Schedule => &self.schedules,
        }
    }

    fn table_mut(&mut self, kind: ResourceKind) -> &mut KindTable {
        match kind {
            ResourceKind::Queue => &mut self.queues,
            ResourceKind::Schedule => &mut self.schedules,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical name wired for a logical name
    pub fn physical_for(&self, kind: ResourceKind, logical: &str) -> Option<&str> {
        self.table(kind).forward.get(logical).map(String::as_str)
    }

    /// Resolve a platform physical name to a logical name. Never fails.
    pub fn resolve(&self, kind: ResourceKind, physical: &str) -> Resolution {
        let table = self.table(kind);

        if let Some(logical) = table.reverse.get(physical) {
            return Resolution::Mapped(logical.clone());
        }

        match self.infer(kind, physical) {
            Some(logical) => {
                warn!(
                    kind = %kind,
                    physical_name = %physical,
                    logical_name = %logical,
                    "Physical name not in environment mapping, inferred logical name from its shape"
                );
                Resolution::Inferred(logical)
            }
            None => {
                debug!(kind = %kind, physical_name = %physical, "Physical name is unknown");
                Resolution::Unknown
            }
        }
    }

    /// Heuristic fallback: locate `<prefix>-<kind>-<slug>` inside the identifier
    fn infer(&self, kind: ResourceKind, physical: &str) -> Option<LogicalName> {
        let lowered = physical.to_ascii_lowercase();
        let marker = format!("{}-{}-", slug(&self.prefix), kind.as_str());
        let tail = lowered.find(&marker).map(|idx| &lowered[idx + marker.len()..])?;

        self.table(kind)
            .known
            .iter()
            .filter(|logical| {
                let s = slug(logical);
                !s.is_empty()
                    && (tail == s
                        || tail
                            .strip_prefix(s.as_str())
                            .is_some_and(|rest| rest.starts_with('-')))
            })
            .max_by_key(|logical| slug(logical).len())
            .cloned()
    }

    fn log_unclaimed_keys(&self, env: &dyn EnvSource) {
        let prefix = normalize(&self.prefix);
        for (key, _) in env.vars() {
            for kind in [ResourceKind::Queue, ResourceKind::Schedule] {
                let head = format!("{}_{}_", prefix, kind.env_segment());
                if !key.starts_with(&head) {
                    continue;
                }
                let claimed = self.table(kind).known.iter().any(|logical| {
                    suffixes(kind)
                        .iter()
                        .any(|suffix| env_key(&self.prefix, kind, logical, *suffix) == key)
                });
                if !claimed {
                    debug!(key = %key, kind = %kind, "Environment key matches no registered handler");
                }
            }
        }
    }
}

/// Last path segment of a queue URL (`https://sqs.../123/acct-orders-42`)
fn url_resource(url: &str) -> &str {
    url.trim().trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}
