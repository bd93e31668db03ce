//! End-to-end sequencing tests against the simulated world.
//!
//! Each test drives a real [`Engine`] with the default handler set and
//! checks what the user would see: which objects are interactable, which
//! guidance events fire, and when the sequence moves on.

use std::time::Duration;

use stepwise::config::EngineConfig;
use stepwise::enablement::Enablement;
use stepwise::engine::{Engine, EngineError, EngineState};
use stepwise::guidance::{GuidanceBus, GuidanceEvent, RecordingListener};
use stepwise::program::{
    FastenerParams, KnobParams, Module, Program, Step, StepAction, StepId, StepStatus, TaskGroup,
};
use stepwise::world::sim::SimulatedWorld;
use stepwise::world::{
    FastenerConfig, FastenerState, InteractionFramework, KnobConfig, World, WorldEvent,
};

const TICK: Duration = Duration::from_millis(100);

// ─── Helpers ────────────────────────────────────────────────────────────────

fn engine_with(config: EngineConfig) -> (Engine, RecordingListener) {
    let recorder = RecordingListener::new();
    let mut guidance = GuidanceBus::new();
    guidance.subscribe(Box::new(recorder.handle()));
    (Engine::from_config(&config, guidance), recorder)
}

fn engine(framework: InteractionFramework) -> (Engine, RecordingListener) {
    engine_with(EngineConfig {
        framework,
        ..EngineConfig::default()
    })
}

fn step_id(module: usize, group: usize, step: usize) -> StepId {
    StepId {
        module,
        group,
        step,
    }
}

fn one_group(steps: Vec<Step>) -> Program {
    Program::new(
        "procedure",
        vec![Module::new("Main", vec![TaskGroup::new("Work", steps)])],
    )
}

fn grab(name: &str, target: &str) -> Step {
    Step::new(name, StepAction::Grab).with_target(target)
}

fn snap(name: &str, target: &str, socket: &str) -> Step {
    Step::new(name, StepAction::GrabAndSnap)
        .with_target(target)
        .with_destination(socket)
}

fn instruction(name: &str, text: &str) -> Step {
    Step::new(
        name,
        StepAction::ShowInstruction {
            text: text.to_string(),
            duration_secs: None,
        },
    )
}

/// Enablement states a step went through, in order
fn state_history(events: &[GuidanceEvent], id: StepId) -> Vec<Enablement> {
    events
        .iter()
        .filter_map(|e| match e {
            GuidanceEvent::StepStateChanged { step, state } if *step == id => Some(*state),
            _ => None,
        })
        .collect()
}

fn count(events: &[GuidanceEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn test_linear_sequence_completes_module_then_program() {
    let (mut engine, recorder) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("Bench/PartA");
    let socket = world.add_object("Bench/Socket1");

    let program = Program::new(
        "Assembly",
        vec![
            Module::new(
                "Fit part",
                vec![TaskGroup::new(
                    "Seat part A",
                    vec![
                        grab("Pick up A", "Bench/PartA"),
                        snap("Seat A", "Bench/PartA", "Bench/Socket1"),
                        instruction("Check", "Part A is seated"),
                    ],
                )],
            ),
            Module::new(
                "Wrap up",
                vec![TaskGroup::new(
                    "Finish",
                    vec![Step::new(
                        "Done",
                        StepAction::ShowInstruction {
                            text: "All done".to_string(),
                            duration_secs: Some(0.5),
                        },
                    )],
                )],
            ),
        ],
    );

    let run_id = engine.start(program, &mut world).unwrap();
    assert_eq!(engine.run_id(), Some(run_id));
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 0)]);

    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 1)]);

    world.push_event(WorldEvent::Snapped { socket, object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 2)]);

    world.push_event(WorldEvent::InstructionAcknowledged);
    engine.tick(&mut world, TICK);
    assert_eq!(
        engine.state(),
        EngineState::Running(step_id(1, 0, 0).group_id())
    );

    let events = recorder.events();
    assert_eq!(
        state_history(&events, step_id(0, 0, 2)),
        vec![Enablement::Locked, Enablement::Active, Enablement::Completed]
    );
    let module_done = events
        .iter()
        .position(|e| matches!(e, GuidanceEvent::ModuleCompleted { module: 0, .. }))
        .unwrap();
    let last_step_done = events
        .iter()
        .position(|e| {
            matches!(e, GuidanceEvent::StepCompleted { step, .. } if *step == step_id(0, 0, 2))
        })
        .unwrap();
    assert!(last_step_done < module_done);

    // The timed instruction finishes on its own
    for _ in 0..10 {
        if !engine.is_running() {
            break;
        }
        engine.tick(&mut world, TICK);
    }
    assert_eq!(engine.state(), EngineState::Completed);
    assert_eq!(count(&recorder.events(), "module.completed"), 2);
    assert_eq!(count(&recorder.events(), "program.completed"), 1);

    // The filled socket stays interactable
    assert!(world.is_enabled(socket));
}

/// `[Grab A (parallel), GrabAndSnap A->Socket1, TurnKnob B]`: the parallel
/// chain starts the snap right away, so its step is Active rather than
/// Prepared and Socket1 is enabled from the first frame. The Prepared path is
/// covered by `test_snap_after_sequential_step_is_prepared`.
#[test]
fn test_parallel_step_starts_snap_and_arms_socket() {
    let (mut engine, _) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("A");
    let socket = world.add_object("Socket1");
    let b = world.add_knob("B", KnobConfig::default());

    let program = one_group(vec![
        grab("Pick up A", "A").parallel(),
        snap("Seat A", "A", "Socket1"),
        Step::new("Turn B", StepAction::TurnKnob(KnobParams::default())).with_target("B"),
    ]);
    engine.start(program, &mut world).unwrap();

    assert_eq!(
        engine.active_steps(),
        vec![step_id(0, 0, 0), step_id(0, 0, 1)]
    );
    assert!(world.is_enabled(a));
    assert!(world.is_enabled(socket));
    assert!(!world.is_enabled(b));
    assert_eq!(
        engine.enablement().state(step_id(0, 0, 1)),
        Some(Enablement::Active)
    );
    assert_eq!(
        engine.enablement().state(step_id(0, 0, 2)),
        Some(Enablement::Locked)
    );

    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 1)]);
    assert_eq!(
        engine.enablement().state(step_id(0, 0, 0)),
        Some(Enablement::Retained)
    );
    assert!(world.is_enabled(a));

    world.push_event(WorldEvent::Snapped { socket, object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 2)]);
    assert!(world.is_enabled(b));
    assert!(!world.is_enabled(a));
    assert!(world.is_enabled(socket), "occupied socket was disabled");

    world.push_event(WorldEvent::KnobTurned {
        object: b,
        angle: 92.0,
    });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.state(), EngineState::Completed);
}

#[test]
fn test_snap_after_sequential_step_is_prepared() {
    let (mut engine, recorder) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("A");
    let socket = world.add_object("Socket1");

    engine
        .start(
            one_group(vec![grab("Pick up A", "A"), snap("Seat A", "A", "Socket1")]),
            &mut world,
        )
        .unwrap();

    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 0)]);
    assert_eq!(
        engine.enablement().state(step_id(0, 0, 1)),
        Some(Enablement::Prepared)
    );
    assert!(world.is_enabled(a));
    assert!(world.is_enabled(socket));

    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(
        state_history(&recorder.events(), step_id(0, 0, 1)),
        vec![Enablement::Locked, Enablement::Prepared, Enablement::Active]
    );
}

#[test]
fn test_missing_handler_stalls_and_reports_once() {
    let (mut engine, recorder) = engine(InteractionFramework::PhysicsHands);
    let mut world = SimulatedWorld::new();
    world.add_object("Anchors/Door");

    let program = one_group(vec![
        Step::new("Walk to door", StepAction::Teleport).with_destination("Anchors/Door")
    ]);
    engine.start(program, &mut world).unwrap();
    for _ in 0..5 {
        engine.tick(&mut world, TICK);
    }

    assert!(engine.is_running());
    assert!(engine.active_steps().is_empty());
    assert!(matches!(
        engine.blocker(),
        Some(EngineError::NoHandler {
            framework: InteractionFramework::PhysicsHands,
            ..
        })
    ));
    let status = engine
        .program()
        .and_then(|p| p.step(step_id(0, 0, 0)))
        .map(Step::status);
    assert_eq!(status, Some(StepStatus::NotStarted));
    assert_eq!(count(&recorder.events(), "sequence.blocked"), 1);
}

#[test]
fn test_tighten_wait_warns_but_never_fails() {
    let (mut engine, recorder) = engine_with(EngineConfig {
        poll_interval_ms: 100,
        wait_timeout_ms: 300,
        ..EngineConfig::default()
    });
    let mut world = SimulatedWorld::new();
    let bolt = world.add_fastener(
        "Panel/Bolt1",
        FastenerConfig::default(),
        FastenerState::default(),
    );

    let program = one_group(vec![Step::new(
        "Tighten bolt",
        StepAction::TightenFastener(FastenerParams::default()),
    )
    .with_target("Panel/Bolt1")]);
    engine.start(program, &mut world).unwrap();

    for _ in 0..9 {
        engine.tick(&mut world, TICK);
    }
    let warnings: Vec<u64> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            GuidanceEvent::WaitWarning { waited_ms, .. } => Some(*waited_ms),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, vec![300, 300, 300]);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 0)]);

    // Tightening before the bolt is seated does not count
    world.push_event(WorldEvent::FastenerTightened { object: bolt });
    engine.tick(&mut world, TICK);
    assert!(engine.is_running());

    world.set_fastener_state(
        bolt,
        FastenerState {
            locked: true,
            tight: false,
        },
    );
    engine.tick(&mut world, TICK);
    world.push_event(WorldEvent::FastenerTightened { object: bolt });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.state(), EngineState::Completed);
}

#[test]
fn test_knob_override_reconfigures_target() {
    let (mut engine, _) = engine(InteractionFramework::Desktop);
    let mut world = SimulatedWorld::new();
    let dial = world.add_knob("Console/Dial", KnobConfig::default());

    let params = KnobParams {
        target_angle: Some(45.0),
        ..KnobParams::default()
    };
    engine
        .start(
            one_group(vec![
                Step::new("Set dial", StepAction::TurnKnob(params)).with_target("Console/Dial")
            ]),
            &mut world,
        )
        .unwrap();
    assert_eq!(world.config_writes(), 1);
    assert_eq!(
        world.knob_config(dial).map(|c| c.target_angle),
        Some(45.0)
    );

    world.push_event(WorldEvent::KnobTurned {
        object: dial,
        angle: 90.0,
    });
    engine.tick(&mut world, TICK);
    assert!(engine.is_running());

    world.push_event(WorldEvent::KnobTurned {
        object: dial,
        angle: 44.0,
    });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.state(), EngineState::Completed);
}

#[test]
fn test_shared_object_is_retained_between_steps() {
    let (mut engine, _) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let tool = world.add_object("Tray/Wrench");

    engine
        .start(
            one_group(vec![
                grab("Pick up wrench", "Tray/Wrench"),
                instruction("Read", "Check the torque table"),
                grab("Pick up wrench again", "Tray/Wrench"),
            ]),
            &mut world,
        )
        .unwrap();
    world.clear_enablement_log();

    world.push_event(WorldEvent::Grabbed { object: tool });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 1)]);
    assert_eq!(
        engine.enablement().state(step_id(0, 0, 0)),
        Some(Enablement::Retained)
    );
    assert!(world.is_enabled(tool));
    assert!(world
        .enablement_log()
        .iter()
        .filter(|call| call.object == tool)
        .all(|call| call.enabled));

    world.push_event(WorldEvent::InstructionAcknowledged);
    engine.tick(&mut world, TICK);
    world.push_event(WorldEvent::Grabbed { object: tool });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.state(), EngineState::Completed);
    assert!(!world.is_enabled(tool));
}

#[test]
fn test_destroyed_object_stalls_until_it_returns() {
    let (mut engine, recorder) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("A");
    world.add_object("B");

    engine
        .start(
            one_group(vec![grab("Pick up A", "A"), grab("Pick up B", "B")]),
            &mut world,
        )
        .unwrap();
    world.remove_object("B");

    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    engine.tick(&mut world, TICK);
    assert!(engine.active_steps().is_empty());
    assert!(matches!(
        engine.blocker(),
        Some(EngineError::UnresolvedReference { .. })
    ));
    assert_eq!(count(&recorder.events(), "sequence.blocked"), 1);

    let b = world.add_object("B");
    engine.tick(&mut world, TICK);
    assert!(engine.blocker().is_none());
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 1)]);
    assert!(world.is_enabled(b));
}

#[test]
fn test_renamed_object_stalls_until_renamed_back() {
    let (mut engine, _) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("Rig/A");
    let b = world.add_object("Rig/B");

    engine
        .start(
            one_group(vec![grab("Pick up A", "Rig/A"), grab("Pick up B", "Rig/B")]),
            &mut world,
        )
        .unwrap();
    world.rename_object(b, "Rig/B (old)");
    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    assert!(engine.blocker().is_some());
    assert!(!world.is_enabled(b));

    world.rename_object(b, "Rig/B");
    engine.tick(&mut world, TICK);
    assert_eq!(engine.active_steps(), vec![step_id(0, 0, 1)]);
    assert!(world.is_enabled(b));
}

#[test]
fn test_abort_locks_all_but_occupied_sockets() {
    let (mut engine, recorder) = engine(InteractionFramework::XrToolkit);
    let mut world = SimulatedWorld::new();
    let a = world.add_object("A");
    let filled = world.add_object("SocketFull");
    let plug = world.add_object("Plug");
    world.set_occupant(filled, Some(plug));
    world.add_object("SocketEmpty");

    engine
        .start(
            one_group(vec![
                grab("Pick up A", "A").parallel(),
                snap("Seat A", "A", "SocketEmpty"),
                snap("Seat plug", "Plug", "SocketFull"),
            ]),
            &mut world,
        )
        .unwrap();
    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);

    engine.abort(&mut world);
    engine.abort(&mut world);

    assert_eq!(engine.state(), EngineState::Aborted);
    assert!(engine.active_steps().is_empty());
    assert_eq!(engine.progress().map(|p| p.completed), Some(0));
    assert_eq!(count(&recorder.events(), "sequence.aborted"), 1);

    assert!(!world.is_enabled(a));
    assert!(!world.is_enabled(plug));
    assert!(world.is_enabled(filled));
    assert!(world
        .enablement_log()
        .iter()
        .all(|call| !(call.occupied && !call.enabled)));

    // Nothing moves after an abort
    world.push_event(WorldEvent::Grabbed { object: a });
    engine.tick(&mut world, TICK);
    assert_eq!(engine.state(), EngineState::Aborted);
}
