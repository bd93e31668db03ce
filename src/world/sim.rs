//! In-memory world used by the simulator and tests.
//!
//! Records every enablement call so tests can assert on what the engine
//! actually issued, not only on the final flags.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use super::{
    FastenerConfig, FastenerState, KnobConfig, ObjectHandle, World, WorldEvent,
};

#[derive(Debug, Clone)]
struct SimObject {
    path: String,
    enabled: bool,
    occupant: Option<ObjectHandle>,
    fastener: Option<(FastenerConfig, FastenerState)>,
    knob: Option<KnobConfig>,
}

/// One `set_interaction_enabled` call as seen by the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnablementCall {
    pub object: ObjectHandle,
    pub enabled: bool,
    /// Whether the object reported occupied when the call was made
    pub occupied: bool,
}

/// Scriptable world with no physics
#[derive(Debug, Default)]
pub struct SimulatedWorld {
    objects: BTreeMap<ObjectHandle, SimObject>,
    next_id: u64,
    events: VecDeque<WorldEvent>,
    conditions: BTreeSet<String>,
    enablement_log: Vec<EnablementCall>,
    config_writes: usize,
}

impl SimulatedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain object; it starts with interaction disabled
    pub fn add_object(&mut self, path: &str) -> ObjectHandle {
        self.next_id += 1;
        let handle = ObjectHandle(self.next_id);
        self.objects.insert(
            handle,
            SimObject {
                path: path.to_string(),
                enabled: false,
                occupant: None,
                fastener: None,
                knob: None,
            },
        );
        handle
    }

    pub fn add_fastener(
        &mut self,
        path: &str,
        config: FastenerConfig,
        state: FastenerState,
    ) -> ObjectHandle {
        let handle = self.add_object(path);
        if let Some(object) = self.objects.get_mut(&handle) {
            object.fastener = Some((config, state));
        }
        handle
    }

    pub fn add_knob(&mut self, path: &str, config: KnobConfig) -> ObjectHandle {
        let handle = self.add_object(path);
        if let Some(object) = self.objects.get_mut(&handle) {
            object.knob = Some(config);
        }
        handle
    }

    /// Destroy the object at `path` (simulates scene teardown or deletion)
    pub fn remove_object(&mut self, path: &str) -> Option<ObjectHandle> {
        let handle = self.find_by_path(path)?;
        self.objects.remove(&handle);
        Some(handle)
    }

    pub fn rename_object(&mut self, handle: ObjectHandle, path: &str) {
        if let Some(object) = self.objects.get_mut(&handle) {
            object.path = path.to_string();
        }
    }

    pub fn path_of(&self, handle: ObjectHandle) -> Option<&str> {
        self.objects.get(&handle).map(|o| o.path.as_str())
    }

    pub fn set_occupant(&mut self, socket: ObjectHandle, occupant: Option<ObjectHandle>) {
        if let Some(object) = self.objects.get_mut(&socket) {
            object.occupant = occupant;
        }
    }

    pub fn set_fastener_state(&mut self, handle: ObjectHandle, state: FastenerState) {
        if let Some((_, current)) = self
            .objects
            .get_mut(&handle)
            .and_then(|o| o.fastener.as_mut())
        {
            *current = state;
        }
    }

    pub fn set_condition(&mut self, name: &str, met: bool) {
        if met {
            self.conditions.insert(name.to_string());
        } else {
            self.conditions.remove(name);
        }
    }

    /// Queue an event and apply its physical side effects
    pub fn push_event(&mut self, event: WorldEvent) {
        match &event {
            WorldEvent::Snapped { socket, object } => {
                self.set_occupant(*socket, Some(*object));
                self.update_fastener(*object, |s| s.locked = true);
            }
            WorldEvent::Unsnapped { socket, object } => {
                self.set_occupant(*socket, None);
                self.update_fastener(*object, |s| s.locked = false);
            }
            WorldEvent::FastenerTightened { object } => {
                self.update_fastener(*object, |s| s.tight = true);
            }
            WorldEvent::FastenerLoosened { object } => {
                self.update_fastener(*object, |s| s.tight = false);
            }
            _ => {}
        }
        self.events.push_back(event);
    }

    fn update_fastener(&mut self, handle: ObjectHandle, f: impl FnOnce(&mut FastenerState)) {
        if let Some((_, state)) = self
            .objects
            .get_mut(&handle)
            .and_then(|o| o.fastener.as_mut())
        {
            f(state);
        }
    }

    pub fn is_enabled(&self, handle: ObjectHandle) -> bool {
        self.objects.get(&handle).is_some_and(|o| o.enabled)
    }

    pub fn enablement_log(&self) -> &[EnablementCall] {
        &self.enablement_log
    }

    pub fn clear_enablement_log(&mut self) {
        self.enablement_log.clear();
    }

    /// Number of fastener/knob configuration writes, for override tests
    pub fn config_writes(&self) -> usize {
        self.config_writes
    }
}

impl World for SimulatedWorld {
    fn find_by_path(&self, path: &str) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .find(|(_, o)| o.path == path)
            .map(|(h, _)| *h)
    }

    fn find_by_name(&self, name: &str) -> Vec<ObjectHandle> {
        self.objects
            .iter()
            .filter(|(_, o)| o.path.rsplit('/').next() == Some(name))
            .map(|(h, _)| *h)
            .collect()
    }

    fn object_paths(&self) -> Vec<(ObjectHandle, String)> {
        self.objects
            .iter()
            .map(|(h, o)| (*h, o.path.clone()))
            .collect()
    }

    fn set_interaction_enabled(&mut self, object: ObjectHandle, enabled: bool) {
        let occupied = self.is_occupied(object);
        if let Some(o) = self.objects.get_mut(&object) {
            o.enabled = enabled;
        }
        self.enablement_log.push(EnablementCall {
            object,
            enabled,
            occupied,
        });
    }

    fn occupant(&self, socket: ObjectHandle) -> Option<ObjectHandle> {
        self.objects.get(&socket).and_then(|o| o.occupant)
    }

    fn fastener_config(&self, object: ObjectHandle) -> Option<FastenerConfig> {
        self.objects
            .get(&object)
            .and_then(|o| o.fastener.map(|(c, _)| c))
    }

    fn set_fastener_config(&mut self, object: ObjectHandle, config: FastenerConfig) {
        if let Some((current, _)) = self
            .objects
            .get_mut(&object)
            .and_then(|o| o.fastener.as_mut())
        {
            *current = config;
            self.config_writes += 1;
        }
    }

    fn fastener_state(&self, object: ObjectHandle) -> Option<FastenerState> {
        self.objects
            .get(&object)
            .and_then(|o| o.fastener.map(|(_, s)| s))
    }

    fn knob_config(&self, object: ObjectHandle) -> Option<KnobConfig> {
        self.objects.get(&object).and_then(|o| o.knob)
    }

    fn set_knob_config(&mut self, object: ObjectHandle, config: KnobConfig) {
        if let Some(knob) = self.objects.get_mut(&object).and_then(|o| o.knob.as_mut()) {
            *knob = config;
            self.config_writes += 1;
        }
    }

    fn condition_met(&self, name: &str) -> bool {
        self.conditions.contains(name)
    }

    fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.events.drain(..).collect()
    }
}
