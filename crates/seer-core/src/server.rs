//! The core loop.
//!
//! The [`Server`] owns the canonical [`EntityStore`] and is its only writer
//! (sensor modules borrow it for the duration of their update). Each call to
//! [`Server::step`] runs one cycle:
//!
//! 1. **SENSE**: sensor modules write measurements into the store
//! 2. **HARVEST**: finished plugin containers and perception workers hand
//!    back their update requests
//! 3. **APPLY**: the harvested requests are applied field group by field
//!    group (see [`EntityStore::apply_batch`])
//! 4. **DISPATCH**: if any container is due, one snapshot is built and
//!    handed to every due container
//! 5. **MERGE**: stale duplicate percepts are collapsed
//! 6. **ADVANCE**: the cycle counter and step time are recorded
//!
//! Applying before dispatching means a plugin always sees the effects of
//! every request harvested up to and including the current cycle.
//!
//! # Example
//!
//! ```
//! use seer_core::config::ServerConfig;
//! use seer_core::plugin::PluginRegistry;
//! use seer_core::server::Server;
//! use serde_json::json;
//!
//! let mut server = Server::from_config(ServerConfig::default(), &PluginRegistry::with_builtins()).unwrap();
//! let loaded = server.load_world(&json!({"id": "table", "type": "table"}), 0.0);
//! assert!(loaded.diagnostics.is_empty());
//!
//! for i in 0..3 {
//!     server.step(f64::from(i) * 0.1);
//! }
//! assert_eq!(server.cycle(), 3);
//! assert_eq!(server.store().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::entity::{EntityId, IdGenerator};
use crate::error::{Result, SeerError};
use crate::merge::{MergeEngine, MergeReport};
use crate::model::{ModelBuilder, ModelLibrary};
use crate::perception::PerceptionStage;
use crate::plugin::{Plugin, PluginRegistry};
use crate::plugin_container::{ContainerStats, PluginContainer};
use crate::property::PropertyRegistry;
use crate::sensor::SensorModule;
use crate::store::{ApplyReport, EntityStore};
use crate::worker::TaskState;
use crate::world_model::WorldModel;

// =============================================================================
// Reports
// =============================================================================

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Cycle number of the step.
    pub cycle: u64,
    /// Time of the step in seconds.
    pub time: f64,
    /// Non-empty requests harvested.
    pub harvested: usize,
    /// Outcome of applying them.
    pub apply: ApplyReport,
    /// Plugin executions started.
    pub dispatched: usize,
    /// Perception executions started.
    pub perception_dispatched: usize,
    /// Merges performed.
    pub merge: MergeReport,
}

/// Outcome of [`Server::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Containers that were idle or stopped in time.
    pub stopped: usize,
    /// Names of containers whose execution was abandoned.
    pub abandoned: Vec<String>,
    /// Perception executions abandoned.
    pub perception_abandoned: usize,
}

impl ShutdownReport {
    /// Returns true if nothing had to be abandoned.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.perception_abandoned == 0
    }
}

/// Outcome of [`Server::load_world`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Entities described by the model, parents first.
    pub created: Vec<EntityId>,
    /// Descriptions that were skipped.
    pub diagnostics: Vec<SeerError>,
    /// Outcome of applying the generated request.
    pub apply: ApplyReport,
}

// =============================================================================
// Server
// =============================================================================

/// Owner of the world model and driver of the core loop.
pub struct Server {
    config: ServerConfig,
    store: EntityStore,
    properties: PropertyRegistry,
    containers: Vec<PluginContainer>,
    sensors: Vec<Box<dyn SensorModule>>,
    perception: Option<PerceptionStage>,
    merge: Option<MergeEngine>,
    library: ModelLibrary,
    cycle: u64,
    last_step: Option<f64>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("cycle", &self.cycle)
            .field("entities", &self.store.len())
            .field("containers", &self.containers)
            .field("sensors", &format!("[{} sensors]", self.sensors.len()))
            .field("perception", &self.perception)
            .field("merge", &self.merge)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Builds a server from configuration, instantiating the configured
    /// plugins from `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::Config`] for invalid configuration and
    /// [`SeerError::PluginSetup`] listing every plugin that could not be
    /// created or configured.
    pub fn from_config(config: ServerConfig, registry: &PluginRegistry) -> Result<Self> {
        config.validate()?;

        let ids = match config.runtime.id_seed {
            Some(seed) => IdGenerator::seeded(seed),
            None => IdGenerator::from_entropy(),
        };
        let store = EntityStore::new()
            .with_measurement_capacity(config.entity.measurement_capacity)
            .with_id_generator(ids);

        let perception = config.perception.enabled.then(|| {
            PerceptionStage::with_default_chain(
                config.perception.sizes.clone(),
                config.perception.positive_threshold,
                config.perception.max_workers,
            )
        });
        let merge = config
            .merge
            .enabled
            .then(|| MergeEngine::new(config.merge.stale_age, config.merge.overlap_threshold));

        let mut server = Self {
            config,
            store,
            properties: PropertyRegistry::new(),
            containers: Vec::new(),
            sensors: Vec::new(),
            perception,
            merge,
            library: ModelLibrary::new(),
            cycle: 0,
            last_step: None,
        };

        let mut failures = Vec::new();
        for entry in server.config.plugins.clone() {
            let Some(plugin) = registry.create(&entry.kind) else {
                failures.push(SeerError::UnknownPluginKind {
                    name: entry.name,
                    kind: entry.kind,
                });
                continue;
            };
            if let Err(err) = server.install(entry.name.clone(), plugin, &entry.parameters, entry.frequency) {
                failures.push(err);
            }
        }
        if !failures.is_empty() {
            return Err(SeerError::PluginSetup(failures));
        }

        tracing::info!(
            plugins = server.containers.len(),
            perception = server.perception.is_some(),
            merge = server.merge.is_some(),
            apply_mode = ?server.config.apply.mode,
            "server configured"
        );
        Ok(server)
    }

    fn install(
        &mut self,
        name: String,
        mut plugin: Box<dyn Plugin>,
        parameters: &toml::Table,
        frequency: f64,
    ) -> Result<()> {
        if self.containers.iter().any(|c| c.name() == name) {
            return Err(SeerError::PluginConfig {
                name,
                reason: "duplicate plugin name".to_string(),
            });
        }
        plugin
            .configure(parameters, &mut self.properties)
            .map_err(|err| SeerError::PluginConfig {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        tracing::info!(plugin = %name, kind = plugin.name(), frequency, "plugin loaded");
        self.containers.push(PluginContainer::new(name, plugin, frequency));
        Ok(())
    }

    /// Adds a plugin instance at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::PluginConfig`] if the name is taken or the
    /// plugin rejects its parameters.
    pub fn add_plugin(
        &mut self,
        name: impl Into<String>,
        plugin: Box<dyn Plugin>,
        parameters: &toml::Table,
        frequency: f64,
    ) -> Result<()> {
        self.install(name.into(), plugin, parameters, frequency)
    }

    /// Adds a sensor module; sensors run in insertion order.
    pub fn add_sensor(&mut self, sensor: Box<dyn SensorModule>) {
        tracing::info!(sensor = sensor.name(), "sensor added");
        self.sensors.push(sensor);
    }

    /// Replaces the model library used by [`Server::load_world`].
    pub fn set_model_library(&mut self, library: ModelLibrary) {
        self.library = library;
    }

    /// Builds a model description and applies it to the store.
    ///
    /// Descriptions that cannot be built are skipped and reported; the rest
    /// are applied with the configured apply mode.
    pub fn load_world(&mut self, description: &Value, now: f64) -> LoadReport {
        let store = &mut self.store;
        let build = ModelBuilder::new(&self.library).build(description, &mut || store.generate_id());

        let apply = store.apply_batch(std::slice::from_ref(&build.request), self.config.apply.mode, now);
        tracing::info!(
            created = apply.created.len(),
            skipped = build.diagnostics.len(),
            "world model loaded"
        );
        LoadReport {
            created: build.created,
            diagnostics: build.diagnostics,
            apply,
        }
    }

    // -------------------------------------------------------------------------
    // Core loop
    // -------------------------------------------------------------------------

    /// Runs one cycle at time `now` (seconds).
    pub fn step(&mut self, now: f64) -> StepReport {
        let cycle = self.cycle;

        // SENSE
        for sensor in &mut self.sensors {
            sensor.update(&mut self.store, now);
        }

        // HARVEST
        let mut requests = Vec::new();
        for container in &mut self.containers {
            if let Some(request) = container.harvest() {
                if !request.is_empty() {
                    requests.push(request);
                }
            }
        }
        if let Some(perception) = &mut self.perception {
            requests.extend(perception.harvest().into_iter().filter(|r| !r.is_empty()));
        }

        // APPLY
        let apply = self.store.apply_batch(&requests, self.config.apply.mode, now);

        // DISPATCH
        let mut dispatched = 0;
        let mut perception_dispatched = 0;
        let any_due = self.containers.iter().any(|c| c.is_due(now));
        if any_due || self.perception.is_some() {
            let world = Arc::new(self.store.snapshot(cycle, now));
            for container in &mut self.containers {
                match container.dispatch(&world, now) {
                    Ok(true) => dispatched += 1,
                    Ok(false) => {}
                    Err(err) => tracing::error!(plugin = container.name(), error = %err, "dispatch failed"),
                }
            }
            if let Some(perception) = &mut self.perception {
                match perception.dispatch(&world) {
                    Ok(started) => perception_dispatched = started,
                    Err(err) => tracing::error!(error = %err, "perception dispatch failed"),
                }
            }
        }

        // MERGE
        let merge = self
            .merge
            .map(|engine| engine.run(&mut self.store, now))
            .unwrap_or_default();

        // ADVANCE
        self.cycle += 1;
        self.last_step = Some(now);

        tracing::debug!(
            cycle,
            now,
            entities = self.store.len(),
            harvested = requests.len(),
            dispatched,
            merged = merge.len(),
            "cycle complete"
        );

        StepReport {
            cycle,
            time: now,
            harvested: requests.len(),
            apply,
            dispatched,
            perception_dispatched,
            merge,
        }
    }

    /// Cancels all running work and waits for it, up to the configured
    /// timeout per execution. Executions that do not return in time are
    /// detached and reported.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let timeout = self.config.runtime.shutdown_timeout();
        let mut report = ShutdownReport::default();

        for container in &mut self.containers {
            if container.shutdown(timeout) {
                report.stopped += 1;
            } else {
                report.abandoned.push(container.name().to_string());
            }
        }
        if let Some(perception) = &mut self.perception {
            report.perception_abandoned = perception.shutdown(timeout);
        }

        if report.is_clean() {
            tracing::info!(stopped = report.stopped, "server shut down");
        } else {
            tracing::error!(
                abandoned = ?report.abandoned,
                perception_abandoned = report.perception_abandoned,
                "server shut down with abandoned executions"
            );
        }
        report
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The canonical store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Mutable access to the store, for privileged writers outside the loop.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    /// A snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> WorldModel {
        self.store.snapshot(self.cycle, self.last_step.unwrap_or_default())
    }

    /// Typed property registry shared by the plugins.
    #[must_use]
    pub fn properties(&self) -> &PropertyRegistry {
        &self.properties
    }

    /// Number of completed cycles.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Time of the last step, if any.
    #[must_use]
    pub fn last_step_time(&self) -> Option<f64> {
        self.last_step
    }

    /// Configuration the server was built from.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Name, state, counters and last panic message of every plugin
    /// container, in dispatch order.
    pub fn plugin_status(&self) -> impl Iterator<Item = (&str, TaskState, ContainerStats, Option<&str>)> + '_ {
        self.containers
            .iter()
            .map(|c| (c.name(), c.state(), c.stats(), c.last_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;

    fn plugin_entry(name: &str, kind: &str, params: &str) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            kind: kind.to_string(),
            frequency: 0.0,
            parameters: toml::from_str(params).unwrap(),
        }
    }

    #[test]
    fn setup_failures_are_collected() {
        let mut config = ServerConfig::default();
        config.plugins = vec![
            plugin_entry("a", "teleporter", ""),
            plugin_entry("b", "reaper", "max_age = -1.0"),
            plugin_entry("c", "footprint", ""),
        ];
        let err = Server::from_config(config, &PluginRegistry::with_builtins()).unwrap_err();
        match err {
            SeerError::PluginSetup(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(matches!(&failures[0], SeerError::UnknownPluginKind { kind, .. } if kind == "teleporter"));
                assert!(matches!(&failures[1], SeerError::PluginConfig { name, .. } if name == "b"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn configured_plugins_register_properties() {
        let mut config = ServerConfig::default();
        config.plugins = vec![plugin_entry("percepts", "footprint", "")];
        let server = Server::from_config(config, &PluginRegistry::with_builtins()).unwrap();
        assert_eq!(server.properties().len(), 1);
        let status: Vec<_> = server.plugin_status().collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].0, "percepts");
        assert_eq!(status[0].1, TaskState::Idle);
        assert_eq!(status[0].3, None);
    }

    #[test]
    fn duplicate_runtime_plugin_is_rejected() {
        let mut config = ServerConfig::default();
        config.plugins = vec![plugin_entry("cleanup", "reaper", "")];
        let mut server = Server::from_config(config, &PluginRegistry::with_builtins()).unwrap();
        let err = server
            .add_plugin("cleanup", Box::new(crate::plugins::ReaperPlugin::new()), &toml::Table::new(), 1.0)
            .unwrap_err();
        assert!(matches!(err, SeerError::PluginConfig { .. }));
    }

    struct Faulty;

    impl Plugin for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn process(&mut self, _ctx: &crate::plugin::PluginContext, _world: &WorldModel, _request: &mut crate::update_request::UpdateRequest) {
            panic!("sensor calibration missing");
        }
    }

    #[test]
    fn plugin_panic_is_reported_in_status() {
        let mut server = Server::from_config(ServerConfig::default(), &PluginRegistry::new()).unwrap();
        server.add_plugin("faulty", Box::new(Faulty), &toml::Table::new(), 0.0).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut now = 0.0;
        while server.plugin_status().all(|(_, _, stats, _)| stats.panics == 0) && std::time::Instant::now() < deadline {
            server.step(now);
            now += 0.1;
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let (_, _, stats, last_error) = server.plugin_status().next().unwrap();
        assert!(stats.panics >= 1);
        assert_eq!(last_error, Some("sensor calibration missing"));
        assert!(server.shutdown().is_clean());
    }

    #[test]
    fn step_advances_bookkeeping() {
        let mut server = Server::from_config(ServerConfig::default(), &PluginRegistry::new()).unwrap();
        assert_eq!(server.last_step_time(), None);
        let report = server.step(1.5);
        assert_eq!(report.cycle, 0);
        assert_eq!(server.cycle(), 1);
        assert_eq!(server.last_step_time(), Some(1.5));
        assert_eq!(server.snapshot().cycle(), 1);
        assert!(server.shutdown().is_clean());
    }
}
