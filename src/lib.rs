pub mod analytics;
pub mod classify;
pub mod config;
pub mod engine;
pub mod event;
pub mod extract;
pub mod lineage;
pub mod model;
pub mod persist;
pub mod state;

pub use analytics::{compute_analytics, Analytics, ParetoPoint, TrendPoint};
pub use classify::{default_rules, Classifier, ClassifierRule, Role, RulePattern};
pub use config::Config;
pub use engine::Engine;
pub use event::{read_events, LogKind, NodePayload, RunEvent, StreamError};
pub use extract::{DimensionLabels, Extractor};
pub use lineage::trace_lineage;
pub use model::{Candidate, Confidence, IterationSnapshot, LineageEdge, LineageTrace, Score};
pub use persist::{deserialize, serialize, FsStore, RecordMeta, Store};
pub use state::{CachedNodeOutput, ReconciledState};
