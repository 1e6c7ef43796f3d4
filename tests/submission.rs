//! Opaque submission: state binding, clustering and hardware instancing.
mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{
    begin_passes, draw_count, instance_bindings, instanced_counts, tints, world_translations,
    Harness,
};
use deferred_draw::renderer::device::{
    LockMode, PrimitiveType, StreamFrequency, GEOMETRY_STREAM, INSTANCE_STREAM,
};
use deferred_draw::renderer::{
    ChannelMask, ChannelType, DeviceCommand, DeviceError, PrimitiveGroup, PropertyValue,
    RecordingDevice,
};
use deferred_draw::{DrawContextSettings, DrawError};
use glam::{Mat4, Vec3};

fn positions(count: usize) -> Vec<Vec3> {
    (0..count)
        .map(|i| Vec3::new(i as f32, 0.0, -(i as f32)))
        .collect()
}

fn vertex_writes(commands: &[DeviceCommand]) -> Vec<(u64, LockMode)> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::WriteVertexData { offset, lock, .. } => Some((*offset, *lock)),
            _ => None,
        })
        .collect()
}

#[test]
fn single_draw_is_one_effect_pass_draw_sequence() {
    let mut harness = Harness::without_instancing();
    let material = harness.material(ChannelType::Opaque);
    let at = Vec3::new(1.0, 2.0, 3.0);
    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&material, at);
    });

    let commands = harness.flush();

    let effect = harness.effect;
    assert_eq!(
        commands,
        vec![
            DeviceCommand::BeginEffect {
                effect,
                technique: harness.main,
            },
            DeviceCommand::BeginPass(0),
            DeviceCommand::SetProperty {
                effect,
                name: "tint".to_string(),
                value: PropertyValue::Float(1.0),
            },
            DeviceCommand::SetVertexDeclaration(harness.vertices.declaration(false).unwrap()),
            DeviceCommand::SetVertexBuffer {
                stream: GEOMETRY_STREAM,
                buffer: harness.vertices.buffer(),
                offset: 0,
                stride: 12,
            },
            DeviceCommand::SetIndexBuffer(harness.primitives.index_buffer()),
            DeviceCommand::SetWorldMatrix(Some(Mat4::from_translation(at))),
            DeviceCommand::CommitChanges(effect),
            DeviceCommand::DrawIndexed {
                primitive_type: PrimitiveType::TriangleList,
                group: PrimitiveGroup::new(0, 1, 0, 3),
            },
            DeviceCommand::EndPass,
            DeviceCommand::EndEffect,
            DeviceCommand::SetWorldMatrix(None),
        ]
    );
    assert_eq!(harness.ctx.statistics().draw_calls, 1);
}

#[test]
fn equal_keys_cluster_with_two_material_switches() {
    let mut harness = Harness::with(
        RecordingDevice::without_instancing(),
        DrawContextSettings {
            collect_statistics: true,
            ..DrawContextSettings::default()
        },
    );
    let first = harness.material(ChannelType::Opaque);
    let second = harness.material(ChannelType::Opaque);
    let [p1, p2, p3] = [Vec3::X, Vec3::Y, Vec3::Z];

    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&first, p1);
        h.draw(&second, p2);
        h.draw(&first, p3);
    });
    let commands = harness.flush();

    let order = world_translations(&commands);
    assert_eq!(order.len(), 3);
    let i1 = order.iter().position(|p| *p == p1).unwrap();
    let i3 = order.iter().position(|p| *p == p3).unwrap();
    assert_eq!(i3, i1 + 1, "ops sharing a key stay adjacent in push order");

    assert_eq!(tints(&commands).len(), 2);
    let stats = harness.ctx.statistics();
    assert_eq!(stats.opaque_material_switches, 2);
    assert_eq!(stats.opaque_shader_switches, 1);
    assert_eq!(stats.collected_opaque_ops, 3);
}

#[test]
fn instanced_run_matches_individual_draws() {
    let at = positions(5);

    let mut instanced = Harness::new();
    let material = instanced.material(ChannelType::Opaque);
    instanced.collect(ChannelMask::OPAQUE, |h| {
        for &p in &at {
            h.draw(&material, p);
        }
    });
    let commands = instanced.flush();

    assert_eq!(instanced_counts(&commands), vec![5]);
    assert_eq!(draw_count(&commands), 1);
    let (buffer, first) = instance_bindings(&commands)[0];
    assert_eq!(first, 0);
    let uploaded = instanced
        .device()
        .instance_transforms(buffer, 0, 5)
        .unwrap();

    let mut single = Harness::without_instancing();
    let material = single.material(ChannelType::Opaque);
    single.collect(ChannelMask::OPAQUE, |h| {
        for &p in &at {
            h.draw(&material, p);
        }
    });
    let commands = single.flush();

    assert_eq!(draw_count(&commands), 5);
    let drawn: Vec<Mat4> = world_translations(&commands)
        .into_iter()
        .map(Mat4::from_translation)
        .collect();
    assert_eq!(uploaded, drawn);
}

#[test]
fn instanced_draw_sets_and_restores_stream_frequencies() {
    let mut harness = Harness::new();
    let material = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&material, Vec3::ZERO);
        h.draw(&material, Vec3::X);
    });
    let commands = harness.flush();

    let frequencies: Vec<_> = commands
        .iter()
        .filter(|command| matches!(command, DeviceCommand::SetStreamFrequency { .. }))
        .cloned()
        .collect();
    assert_eq!(
        frequencies,
        vec![
            DeviceCommand::SetStreamFrequency {
                stream: INSTANCE_STREAM,
                frequency: StreamFrequency::InstanceData(1),
            },
            DeviceCommand::SetStreamFrequency {
                stream: GEOMETRY_STREAM,
                frequency: StreamFrequency::IndexedData(2),
            },
            DeviceCommand::SetStreamFrequency {
                stream: GEOMETRY_STREAM,
                frequency: StreamFrequency::Default,
            },
            DeviceCommand::SetStreamFrequency {
                stream: INSTANCE_STREAM,
                frequency: StreamFrequency::Default,
            },
        ]
    );
    assert!(commands.contains(&DeviceCommand::ResetVertexStream(INSTANCE_STREAM)));
}

#[test]
fn buffer_overflow_splits_into_two_instanced_draws() {
    let max = 4;
    let mut harness = Harness::with_settings(DrawContextSettings {
        max_instances: max,
        ..DrawContextSettings::default()
    });
    let material = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        for p in positions(max as usize + 1) {
            h.draw(&material, p);
        }
    });
    let commands = harness.flush();

    assert_eq!(instanced_counts(&commands), vec![max, 1]);
    assert_eq!(
        vertex_writes(&commands),
        vec![(0, LockMode::Discard), (0, LockMode::Discard)]
    );
}

#[test]
fn chain_breaks_append_within_one_buffer_generation() {
    let mut harness = Harness::new();
    let first = harness.material(ChannelType::Opaque);
    let second = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&first, Vec3::ZERO);
        h.draw(&second, Vec3::X);
        h.draw(&first, Vec3::Y);
        h.draw(&second, Vec3::Z);
        h.draw(&second, Vec3::ONE);
    });
    let commands = harness.flush();

    let counts = instanced_counts(&commands);
    let mut sorted_counts = counts.clone();
    sorted_counts.sort_unstable();
    assert_eq!(sorted_counts, vec![2, 3]);

    let writes = vertex_writes(&commands);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], (0, LockMode::Discard));
    assert_eq!(writes[1], (u64::from(counts[0]) * 64, LockMode::NoOverwrite));

    let firsts: Vec<u32> = instance_bindings(&commands)
        .into_iter()
        .map(|(_, first)| first)
        .collect();
    assert_eq!(firsts, vec![0, counts[0]]);
}

#[test]
fn multi_pass_technique_draws_every_pass_per_op() {
    let mut harness = Harness::without_instancing();
    let material = harness.two_pass_material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&material, Vec3::ZERO);
        h.draw(&material, Vec3::X);
    });
    let commands = harness.flush();

    assert_eq!(begin_passes(&commands), vec![0, 1, 0, 1]);
    assert_eq!(draw_count(&commands), 4);
}

#[test]
fn instancing_can_be_disabled_by_settings() {
    let mut harness = Harness::with_settings(DrawContextSettings {
        hw_instancing_enabled: false,
        ..DrawContextSettings::default()
    });
    let material = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        for p in positions(3) {
            h.draw(&material, p);
        }
    });
    let commands = harness.flush();

    assert!(instanced_counts(&commands).is_empty());
    assert_eq!(draw_count(&commands), 3);
    assert!(!commands
        .iter()
        .any(|command| matches!(command, DeviceCommand::CreateVertexBuffer { .. })));
}

#[test]
fn failed_upload_skips_only_that_chain() {
    let mut harness = Harness::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    harness
        .ctx
        .set_error_handler(move |error| sink.borrow_mut().push(error.clone()));

    let first = harness.material(ChannelType::Opaque);
    let second = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        for p in positions(3) {
            h.draw(&first, p);
        }
        h.draw(&second, Vec3::ONE);
    });
    harness.ctx.device_mut().fail_next_vertex_writes(1);
    let commands = harness.flush();

    assert_eq!(draw_count(&commands), 1);
    assert_eq!(errors.borrow().len(), 1);
    assert!(matches!(
        errors.borrow()[0],
        DrawError::InstanceUpload {
            source: DeviceError::LockFailed { .. },
            ..
        }
    ));
    assert_eq!(harness.ctx.statistics().skipped_ops, 1);
}

#[test]
fn missing_instancing_buffer_falls_back_to_single_draws() {
    let mut harness = Harness::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    harness
        .ctx
        .set_error_handler(move |error| sink.borrow_mut().push(error.clone()));
    harness.ctx.device_mut().fail_buffer_creation(true);

    let material = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        for p in positions(3) {
            h.draw(&material, p);
        }
    });
    let commands = harness.flush();

    assert_eq!(draw_count(&commands), 3);
    assert!(instanced_counts(&commands).is_empty());
    assert_eq!(
        *errors.borrow(),
        vec![DrawError::InstanceBufferCreation(
            DeviceError::OutOfVideoMemory
        )]
    );
    assert_eq!(harness.ctx.statistics().skipped_ops, 0);

    let techniques: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::BeginEffect { technique, .. } => Some(*technique),
            _ => None,
        })
        .collect();
    assert_eq!(techniques, vec![harness.main]);
    let declarations: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::SetVertexDeclaration(declaration) => Some(*declaration),
            _ => None,
        })
        .collect();
    assert_eq!(declarations, vec![harness.vertices.declaration(false).unwrap()]);
    assert!(!commands.iter().any(|command| matches!(
        command,
        DeviceCommand::SetVertexBuffer { stream, .. } if *stream == INSTANCE_STREAM
    )));
}

#[test]
fn instancing_buffer_survives_device_reset() {
    let mut harness = Harness::new();
    harness.ctx.create_unmanaged_objects();
    harness.ctx.delete_unmanaged_objects();
    let lifecycle = harness.ctx.device_mut().take_commands();
    assert!(matches!(
        lifecycle.as_slice(),
        [
            DeviceCommand::CreateVertexBuffer { .. },
            DeviceCommand::ReleaseVertexBuffer(_)
        ]
    ));

    let material = harness.material(ChannelType::Opaque);
    harness.collect(ChannelMask::OPAQUE, |h| {
        h.draw(&material, Vec3::ZERO);
        h.draw(&material, Vec3::X);
    });
    let commands = harness.flush();

    assert!(matches!(
        commands.first(),
        Some(DeviceCommand::CreateVertexBuffer { .. })
    ));
    assert_eq!(instanced_counts(&commands), vec![2]);
}

#[test]
fn statistics_accumulate_across_frames_without_auto_reset() {
    let mut harness = Harness::with_settings(DrawContextSettings {
        auto_reset_statistics: false,
        ..DrawContextSettings::default()
    });
    let material = harness.material(ChannelType::Opaque);

    for frame in 1..=2 {
        harness.collect(ChannelMask::OPAQUE, |h| {
            h.draw(&material, Vec3::ZERO);
        });
        harness.flush();
        assert_eq!(harness.ctx.statistics().draw_calls, frame);
    }

    harness.ctx.reset_statistics();
    assert_eq!(harness.ctx.statistics().draw_calls, 0);
}
