// Layout Domain Model
//
// The set of queue and schedule declarations discovered at build time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Stable, developer-chosen identifier for a queue or schedule
pub type LogicalName = String;

/// Kind of declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Queue,
    Schedule,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Queue => "queue",
            ResourceKind::Schedule => "schedule",
        }
    }

    /// Segment used inside environment variable keys
    pub fn env_segment(&self) -> &'static str {
        match self {
            ResourceKind::Queue => "QUEUE",
            ResourceKind::Schedule => "SCHEDULE",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueDecl {
    pub logical_name: LogicalName,
}

impl QueueDecl {
    pub fn new(logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleDecl {
    pub logical_name: LogicalName,
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
}

impl ScheduleDecl {
    pub fn new(logical_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            logical_name: logical_name.into(),
            interval,
        }
    }
}

/// Build-time view of every declared queue and schedule.
///
/// Entries are unique per kind (first declaration wins) and always sorted by
/// logical name, whatever order they were discovered in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LayoutRepr")]
pub struct Layout {
    queues: Vec<QueueDecl>,
    schedules: Vec<ScheduleDecl>,
}

#[derive(Deserialize)]
struct LayoutRepr {
    #[serde(default)]
    queues: Vec<QueueDecl>,
    #[serde(default)]
    schedules: Vec<ScheduleDecl>,
}

impl From<LayoutRepr> for Layout {
    fn from(repr: LayoutRepr) -> Self {
        Layout::new(repr.queues, repr.schedules)
    }
}

impl Layout {
    pub fn new(
        queues: impl IntoIterator<Item = QueueDecl>,
        schedules: impl IntoIterator<Item = ScheduleDecl>,
    ) -> Self {
        let mut queue_map: BTreeMap<LogicalName, QueueDecl> = BTreeMap::new();
        for decl in queues {
            queue_map.entry(decl.logical_name.clone()).or_insert(decl);
        }

        let mut schedule_map: BTreeMap<LogicalName, ScheduleDecl> = BTreeMap::new();
        for decl in schedules {
            schedule_map.entry(decl.logical_name.clone()).or_insert(decl);
        }

        Self {
            queues: queue_map.into_values().collect(),
            schedules: schedule_map.into_values().collect(),
        }
    }

    pub fn queues(&self) -> &[QueueDecl] {
        &self.queues
    }

    pub fn schedules(&self) -> &[ScheduleDecl] {
        &self.schedules
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|q| q.logical_name.as_str())
    }

    pub fn schedule_names(&self) -> impl Iterator<Item = &str> {
        self.schedules.iter().map(|s| s.logical_name.as_str())
    }

    /// Logical names of the given kind, sorted
    pub fn names(&self, kind: ResourceKind) -> Vec<&str> {
        match kind {
            ResourceKind::Queue => self.queue_names().collect(),
            ResourceKind::Schedule => self.schedule_names().collect(),
        }
    }

    pub fn schedule(&self, logical_name: &str) -> Option<&ScheduleDecl> {
        self.schedules
            .binary_search_by(|s| s.logical_name.as_str().cmp(logical_name))
            .ok()
            .map(|idx| &self.schedules[idx])
    }

    pub fn contains(&self, kind: ResourceKind, logical_name: &str) -> bool {
        match kind {
            ResourceKind::Queue => self
                .queues
                .binary_search_by(|q| q.logical_name.as_str().cmp(logical_name))
                .is_ok(),
            ResourceKind::Schedule => self.schedule(logical_name).is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty() && self.schedules.is_empty()
    }

    /// Entries of `self` that `discovered` does not know about.
    ///
    /// Used at start-up to flag handlers registered with dynamic names: the
    /// build-time scan could not see them, so no infrastructure exists for them.
    pub fn missing_from(&self, discovered: &Layout) -> Layout {
        Layout::new(
            self.queues
                .iter()
                .filter(|q| !discovered.contains(ResourceKind::Queue, &q.logical_name))
                .cloned(),
            self.schedules
                .iter()
                .filter(|s| !discovered.contains(ResourceKind::Schedule, &s.logical_name))
                .cloned(),
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
