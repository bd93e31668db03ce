//! Scripted simulation.
//!
//! A [`Scenario`] describes a scene, the interaction framework and what the
//! user does on each tick, all by object path. [`run_scenario`] replays it
//! against a [`SimulatedWorld`] and returns a [`RunReport`].

pub mod report;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::guidance::{GuidanceBus, RecordingListener, TracingListener};
use crate::program::loader::{load_program, parse_definition, DefinitionFormat};
use crate::program::{Program, StepId};
use crate::world::sim::SimulatedWorld;
use crate::world::{
    FastenerConfig, FastenerState, InteractionFramework, KnobConfig, World, WorldEvent,
};

pub use report::{EnablementRecord, RunReport, TickRecord};

/// Program to run: a path (relative to the scenario file) or inline
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProgramSource {
    Path(PathBuf),
    Inline(Box<Program>),
}

/// Initial state of one scene object
#[derive(Debug, Clone, Deserialize)]
pub struct SceneObject {
    pub path: String,
    #[serde(default)]
    pub fastener: Option<FastenerConfig>,
    #[serde(default)]
    pub fastener_state: Option<FastenerState>,
    #[serde(default)]
    pub knob: Option<KnobConfig>,
    /// Path of the object already attached to this socket
    #[serde(default)]
    pub occupied_by: Option<String>,
}

/// World event addressed by object path
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptedEvent {
    Grabbed { object: String },
    Released { object: String },
    Snapped { socket: String, object: String },
    Unsnapped { socket: String, object: String },
    FastenerTightened { object: String },
    FastenerLoosened { object: String },
    KnobTurned { object: String, angle: f32 },
    ScriptSignal { name: String },
    InstructionAcknowledged,
    Teleported { anchor: String },
}

impl ScriptedEvent {
    fn resolve(&self, world: &SimulatedWorld) -> Result<WorldEvent> {
        let find = |path: &str| {
            world
                .find_by_path(path)
                .ok_or_else(|| anyhow!("scene has no object '{path}'"))
        };
        let event = match self {
            ScriptedEvent::Grabbed { object } => WorldEvent::Grabbed {
                object: find(object)?,
            },
            ScriptedEvent::Released { object } => WorldEvent::Released {
                object: find(object)?,
            },
            ScriptedEvent::Snapped { socket, object } => WorldEvent::Snapped {
                socket: find(socket)?,
                object: find(object)?,
            },
            ScriptedEvent::Unsnapped { socket, object } => WorldEvent::Unsnapped {
                socket: find(socket)?,
                object: find(object)?,
            },
            ScriptedEvent::FastenerTightened { object } => WorldEvent::FastenerTightened {
                object: find(object)?,
            },
            ScriptedEvent::FastenerLoosened { object } => WorldEvent::FastenerLoosened {
                object: find(object)?,
            },
            ScriptedEvent::KnobTurned { object, angle } => WorldEvent::KnobTurned {
                object: find(object)?,
                angle: *angle,
            },
            ScriptedEvent::ScriptSignal { name } => WorldEvent::ScriptSignal { name: name.clone() },
            ScriptedEvent::InstructionAcknowledged => WorldEvent::InstructionAcknowledged,
            ScriptedEvent::Teleported { anchor } => WorldEvent::Teleported {
                anchor: find(anchor)?,
            },
        };
        Ok(event)
    }
}

/// What happens before one engine tick
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedTick {
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
    /// Objects that appear in the scene
    #[serde(default)]
    pub spawn: Vec<String>,
    /// Objects destroyed this tick
    #[serde(default)]
    pub despawn: Vec<String>,
    #[serde(default)]
    pub set_conditions: Vec<String>,
    #[serde(default)]
    pub clear_conditions: Vec<String>,
    /// Skip an optional step, e.g. `{ module: 0, group: 1, step: 2 }`
    #[serde(default)]
    pub skip_step: Option<StepId>,
    #[serde(default)]
    pub skip_task_group: bool,
    #[serde(default)]
    pub abort: bool,
    /// Empty ticks to run after this one
    #[serde(default)]
    pub repeat: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub program: ProgramSource,
    /// Overrides `engine.framework` from configuration
    #[serde(default)]
    pub framework: Option<InteractionFramework>,
    /// Overrides `engine.tick_ms` from configuration
    #[serde(default)]
    pub tick_ms: Option<u64>,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    /// Conditions that hold from the start
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub ticks: Vec<ScriptedTick>,
}

impl Scenario {
    /// Load a scenario file (JSON, YAML or TOML by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let Some(format) = DefinitionFormat::from_path(path) else {
            bail!("Unsupported scenario file extension: {}", path.display());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        parse_definition(&contents, format)
            .with_context(|| format!("Invalid scenario: {}", path.display()))
    }

    /// Resolve the program, reading it relative to `base_dir` if needed
    pub fn program(&self, base_dir: &Path) -> Result<Program> {
        match &self.program {
            ProgramSource::Inline(program) => Ok(program.as_ref().clone()),
            ProgramSource::Path(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                load_program(&path)
            }
        }
    }

    /// Build the initial scene
    pub fn build_world(&self) -> Result<SimulatedWorld> {
        let mut world = SimulatedWorld::new();
        for object in &self.objects {
            match (object.fastener, object.knob) {
                (Some(config), _) => {
                    world.add_fastener(
                        &object.path,
                        config,
                        object.fastener_state.unwrap_or_default(),
                    );
                }
                (None, Some(knob)) => {
                    world.add_knob(&object.path, knob);
                }
                (None, None) => {
                    world.add_object(&object.path);
                }
            }
        }
        for object in &self.objects {
            let Some(occupant) = &object.occupied_by else {
                continue;
            };
            let socket = world
                .find_by_path(&object.path)
                .ok_or_else(|| anyhow!("scene has no object '{}'", object.path))?;
            let occupant = world
                .find_by_path(occupant)
                .ok_or_else(|| anyhow!("scene has no object '{occupant}'"))?;
            world.set_occupant(socket, Some(occupant));
        }
        for condition in &self.conditions {
            world.set_condition(condition, true);
        }
        Ok(world)
    }
}

/// Drain the world's enablement log into path-addressed records
fn take_enablement(world: &mut SimulatedWorld) -> Vec<EnablementRecord> {
    let records = world
        .enablement_log()
        .iter()
        .map(|call| EnablementRecord {
            object: world
                .path_of(call.object)
                .map_or_else(|| call.object.to_string(), str::to_string),
            enabled: call.enabled,
        })
        .collect();
    world.clear_enablement_log();
    records
}

/// Replay `scenario` tick by tick.
///
/// Stops when the script is exhausted, the engine leaves the running state,
/// or `max_ticks` ticks have run.
pub fn run_scenario(
    scenario: &Scenario,
    base_dir: &Path,
    config: &EngineConfig,
    max_ticks: Option<usize>,
) -> Result<RunReport> {
    let program = scenario.program(base_dir)?;
    let mut world = scenario.build_world()?;
    let framework = scenario.framework.unwrap_or(config.framework);
    let dt = scenario
        .tick_ms
        .map_or_else(|| config.tick(), |ms| std::time::Duration::from_millis(ms.max(1)));

    let recorder = RecordingListener::new();
    let mut guidance = GuidanceBus::new();
    guidance.subscribe(Box::new(TracingListener));
    guidance.subscribe(Box::new(recorder.handle()));
    let engine_config = EngineConfig {
        framework,
        ..config.clone()
    };
    let mut engine = Engine::from_config(&engine_config, guidance);

    let started_at = chrono::Utc::now();
    let digest = program.digest();
    let program_name = program.name.clone();
    let run_id = engine
        .start(program, &mut world)
        .map_err(|e| match e {
            crate::engine::EngineError::Validation(issues) => anyhow!(
                "{}",
                issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            other => anyhow!(other),
        })
        .context("Failed to start sequence")?;

    let mut ticks = vec![TickRecord {
        tick: 0,
        events: recorder.take(),
        enablement: take_enablement(&mut world),
    }];

    let schedule = scenario.ticks.iter().flat_map(|tick| {
        std::iter::once(Some(tick)).chain(std::iter::repeat(None).take(tick.repeat))
    });
    let limit = max_ticks.unwrap_or(usize::MAX);

    for (index, scripted) in schedule.enumerate() {
        if !engine.is_running() {
            break;
        }
        if index >= limit {
            warn!(max_ticks = limit, "Tick limit reached");
            break;
        }
        let tick = index + 1;

        if let Some(scripted) = scripted {
            for path in &scripted.spawn {
                world.add_object(path);
            }
            for path in &scripted.despawn {
                if world.remove_object(path).is_none() {
                    warn!(tick, object = %path, "Despawn of unknown object");
                }
            }
            for condition in &scripted.set_conditions {
                world.set_condition(condition, true);
            }
            for condition in &scripted.clear_conditions {
                world.set_condition(condition, false);
            }
            for event in &scripted.events {
                let event = event
                    .resolve(&world)
                    .with_context(|| format!("tick {tick}"))?;
                debug!(tick, ?event, "Scripted event");
                world.push_event(event);
            }
            if let Some(step) = scripted.skip_step {
                if let Err(e) = engine.skip_step(step, &mut world) {
                    warn!(tick, step = %step, error = %e, "Scripted skip rejected");
                }
            }
            if scripted.skip_task_group {
                if let Err(e) = engine.skip_task_group(&mut world) {
                    warn!(tick, error = %e, "Scripted group skip rejected");
                }
            }
            if scripted.abort {
                engine.abort(&mut world);
            }
        }

        engine.tick(&mut world, dt);
        ticks.push(TickRecord {
            tick,
            events: recorder.take(),
            enablement: take_enablement(&mut world),
        });
    }

    let report = RunReport {
        run_id,
        program: program_name,
        digest,
        framework: engine.framework(),
        final_state: engine.state(),
        progress: engine.progress().unwrap_or_default(),
        blocker: engine.blocker().map(ToString::to_string),
        ticks,
        started_at,
    };
    info!(
        run_id = %report.run_id,
        state = %report.final_state,
        ticks = report.ticks.len() - 1,
        "Simulation finished"
    );
    Ok(report)
}
