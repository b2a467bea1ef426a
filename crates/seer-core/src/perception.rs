//! Per-entity perception stage.
//!
//! Perception runs a chain of [`PerceptionModule`]s over one entity at a
//! time. The modules share a JSON result document: each writes its own
//! section (`result["size_matcher"]`, ...) and later modules may read the
//! sections of earlier ones. The finished document is merged into the
//! entity's data under `perception_result`; a top-level `"type"` string in
//! it also becomes the entity type.
//!
//! The [`PerceptionStage`] keeps one background worker per entity and
//! re-runs the chain whenever the entity's best measurement may have
//! changed (its measurement sequence advanced since the last run).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::entity::{Entity, EntityId};
use crate::error::Result;
use crate::update_request::UpdateRequest;
use crate::worker::{BackgroundTask, TaskOutcome, TaskState};
use crate::world_model::WorldModel;

/// Data key holding the perception result document.
pub const PERCEPTION_RESULT: &str = "perception_result";

/// Default score a labelled result must exceed to count.
pub const DEFAULT_POSITIVE_THRESHOLD: f64 = 0.5;

// =============================================================================
// Module Contract
// =============================================================================

/// One classification step over a single entity.
pub trait PerceptionModule: Send + Sync {
    /// Section name the module writes under.
    fn name(&self) -> &str;

    /// Inspects the entity and annotates the shared result document.
    fn process(&self, entity: &Entity, result: &mut Value);
}

fn section<'a>(result: &'a mut Value, name: &str) -> &'a mut Value {
    if !result.is_object() {
        *result = Value::Object(Map::new());
    }
    &mut result[name]
}

// =============================================================================
// Size Matcher
// =============================================================================

/// Height and width bounds describing one way an object type can look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeModel {
    /// Type label proposed on a match.
    pub label: String,
    /// Minimum vertical extent in metres.
    pub min_height: f64,
    /// Maximum vertical extent in metres.
    pub max_height: f64,
    /// Minimum horizontal diagonal in metres.
    pub min_width: f64,
    /// Maximum horizontal diagonal in metres.
    pub max_width: f64,
}

impl SizeModel {
    fn matches(&self, width: f64, height: f64) -> bool {
        (self.min_height..=self.max_height).contains(&height) && (self.min_width..=self.max_width).contains(&width)
    }
}

/// Proposes types whose size bounds contain the entity's measured size.
///
/// The size is taken from the best measurement's points: height is the z
/// extent and width the diagonal of the horizontal bounding box. Every
/// matching label gets an equal share of probability.
#[derive(Debug, Clone, Default)]
pub struct SizeMatcher {
    models: BTreeMap<String, Vec<SizeModel>>,
}

impl SizeMatcher {
    /// Creates a matcher over the given size models.
    #[must_use]
    pub fn new(models: impl IntoIterator<Item = SizeModel>) -> Self {
        let mut grouped: BTreeMap<String, Vec<SizeModel>> = BTreeMap::new();
        for model in models {
            grouped.entry(model.label.clone()).or_default().push(model);
        }
        Self { models: grouped }
    }
}

impl PerceptionModule for SizeMatcher {
    fn name(&self) -> &str {
        "size_matcher"
    }

    fn process(&self, entity: &Entity, result: &mut Value) {
        let Some(best) = entity.best_measurement() else {
            return;
        };
        let mut points = best.points().iter();
        let Some(&first) = points.next() else {
            return;
        };
        let (min, max) = points.fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        let extent = max - min;
        let width = extent.truncate().length();
        let height = extent.z;

        let labels: Vec<&str> = self
            .models
            .iter()
            .filter(|(_, sizes)| sizes.iter().any(|s| s.matches(width, height)))
            .map(|(label, _)| label.as_str())
            .collect();

        let mut out = json!({"size": {"width": width, "height": height}});
        if !labels.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let score = 1.0 / labels.len() as f64;
            out["hypothesis"] = labels
                .iter()
                .map(|label| json!({"name": label, "score": score}))
                .collect();
        }
        *section(result, self.name()) = out;
    }
}

// =============================================================================
// Type Aggregator
// =============================================================================

/// Combines the sections written by earlier modules into one `"type"`.
///
/// A section contributes its `label` when its `score` exceeds the positive
/// threshold. Scores of `hypothesis` entries are summed per name across all
/// sections and the highest total wins. Contributions are joined with
/// `", "`; when the document has sections but none contribute, the type is
/// `"Unknown"`.
#[derive(Debug, Clone)]
pub struct TypeAggregator {
    positive_threshold: f64,
}

impl TypeAggregator {
    /// Creates an aggregator with the given positive threshold.
    #[must_use]
    pub fn new(positive_threshold: f64) -> Self {
        Self { positive_threshold }
    }
}

impl Default for TypeAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_POSITIVE_THRESHOLD)
    }
}

impl PerceptionModule for TypeAggregator {
    fn name(&self) -> &str {
        "type_aggregator"
    }

    fn process(&self, _entity: &Entity, result: &mut Value) {
        let Some(sections) = result.as_object() else {
            return;
        };
        if sections.is_empty() {
            return;
        }

        let mut labels: Vec<&str> = Vec::new();
        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();

        for (name, section) in sections {
            if name == "type" {
                continue;
            }
            if let (Some(score), Some(label)) = (
                section.get("score").and_then(Value::as_f64),
                section.get("label").and_then(Value::as_str),
            ) {
                if score > self.positive_threshold {
                    labels.push(label);
                }
            }
            for hypothesis in section.get("hypothesis").and_then(Value::as_array).into_iter().flatten() {
                if let (Some(name), Some(score)) = (
                    hypothesis.get("name").and_then(Value::as_str),
                    hypothesis.get("score").and_then(Value::as_f64),
                ) {
                    *totals.entry(name).or_insert(0.0) += score;
                }
            }
        }

        let best = totals
            .iter()
            .fold(None::<(&str, f64)>, |best, (&name, &total)| match best {
                Some((_, top)) if top >= total => best,
                _ if total > 0.0 => Some((name, total)),
                _ => best,
            })
            .map(|(name, _)| name);

        let mut parts = labels;
        parts.extend(best);
        let entity_type = if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(", ")
        };
        result["type"] = Value::String(entity_type);
    }
}

// =============================================================================
// Perception Stage
// =============================================================================

#[derive(Debug)]
struct PerceptionWorker {
    task: BackgroundTask<Value>,
    processed_seq: u64,
}

/// Schedules the module chain over entities with fresh measurements.
pub struct PerceptionStage {
    modules: Arc<Vec<Box<dyn PerceptionModule>>>,
    workers: BTreeMap<EntityId, PerceptionWorker>,
    max_workers: usize,
}

impl PerceptionStage {
    /// Creates a stage running `modules` in order, with at most
    /// `max_workers` entities processed concurrently (at least one).
    #[must_use]
    pub fn new(modules: Vec<Box<dyn PerceptionModule>>, max_workers: usize) -> Self {
        Self {
            modules: Arc::new(modules),
            workers: BTreeMap::new(),
            max_workers: max_workers.max(1),
        }
    }

    /// Creates the default chain: a [`SizeMatcher`] followed by a
    /// [`TypeAggregator`].
    #[must_use]
    pub fn with_default_chain(sizes: Vec<SizeModel>, positive_threshold: f64, max_workers: usize) -> Self {
        Self::new(
            vec![
                Box::new(SizeMatcher::new(sizes)),
                Box::new(TypeAggregator::new(positive_threshold)),
            ],
            max_workers,
        )
    }

    /// Names of the modules in execution order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(|m| m.name())
    }

    /// Number of entities currently being processed.
    #[must_use]
    pub fn running(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.task.state() == TaskState::Running)
            .count()
    }

    /// Collects finished results, one update request per entity.
    ///
    /// An entity removed since dispatch only invalidates its own request.
    pub fn harvest(&mut self) -> Vec<UpdateRequest> {
        let mut requests = Vec::new();
        for (id, worker) in &mut self.workers {
            if worker.task.poll() != TaskState::Done {
                continue;
            }
            match worker.task.take() {
                Some(TaskOutcome::Completed(result)) => {
                    if result.as_object().is_some_and(Map::is_empty) || result.is_null() {
                        continue;
                    }
                    let mut request = UpdateRequest::new();
                    if let Some(entity_type) = result.get("type").and_then(Value::as_str) {
                        request.set_type(id.clone(), entity_type);
                    }
                    request.add_data(id.clone(), json!({ (PERCEPTION_RESULT): result }));
                    requests.push(request);
                }
                Some(TaskOutcome::Panicked(message)) => {
                    tracing::warn!(entity = %id, %message, "perception chain panicked");
                }
                None => {}
            }
        }
        requests
    }

    /// Starts the chain for entities whose measurements advanced.
    ///
    /// Returns the number of executions started.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a worker thread could not be spawned.
    pub fn dispatch(&mut self, world: &WorldModel) -> Result<usize> {
        self.workers
            .retain(|id, w| world.contains(id) || w.task.state() == TaskState::Running);

        let mut running = self.running();
        let mut started = 0;

        for entity in world.iter() {
            if running >= self.max_workers {
                break;
            }
            if entity.best_measurement().is_none() {
                continue;
            }
            let seq = entity.measurement_seq();
            let worker = self
                .workers
                .entry(entity.id().clone())
                .or_insert_with_key(|id| PerceptionWorker {
                    task: BackgroundTask::new(format!("perception-{id}")),
                    processed_seq: 0,
                });
            if worker.task.state() != TaskState::Idle || seq <= worker.processed_seq {
                continue;
            }

            let modules = Arc::clone(&self.modules);
            let entity = Arc::clone(entity);
            if worker.task.start(move |cancel| {
                let mut result = Value::Object(Map::new());
                for module in modules.iter() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    module.process(&entity, &mut result);
                }
                result
            })? {
                worker.processed_seq = seq;
                running += 1;
                started += 1;
            }
        }

        if started > 0 {
            tracing::debug!(started, running, "perception dispatched");
        }
        Ok(started)
    }

    /// Cancels every running chain and waits up to `timeout` for each.
    ///
    /// Returns the number of executions that had to be abandoned.
    pub fn shutdown(&mut self, timeout: Duration) -> usize {
        self.workers
            .values_mut()
            .map(|w| w.task.shutdown(timeout))
            .filter(|stopped| !stopped)
            .count()
    }
}

impl std::fmt::Debug for PerceptionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptionStage")
            .field("modules", &self.module_names().collect::<Vec<_>>())
            .field("workers", &self.workers.len())
            .field("max_workers", &self.max_workers)
            .finish()
    }
}
