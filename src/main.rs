mod demo_scenes;

use deferred_draw::renderer::{ChannelMask, RecordingDevice, RenderingPass};
use deferred_draw::{DrawContext, DrawContextSettings};
use demo_scenes::{DemoAssets, DemoScene};
use glam::{Mat4, Vec3};
use log::{info, warn};

//const ACTIVE_SCENE: DemoScene = DemoScene::GlassStack { layers: 6 };

const ACTIVE_SCENE: DemoScene = DemoScene::Mixed { size: 5 };

const FRAMES: u32 = 3;

fn main() {
    deferred_draw::init_logging();

    let settings = DrawContextSettings {
        collect_statistics: true,
        ..DrawContextSettings::load()
    };

    let mut device = RecordingDevice::new();
    let assets = DemoAssets::load(&mut device);

    let mut ctx = DrawContext::new(device, RenderingPass::Color, settings).with_name("main");
    ctx.create_unmanaged_objects();
    ctx.set_view(
        Mat4::look_at_rh(Vec3::new(0.0, 8.0, 14.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 200.0),
    );

    info!(
        "Running {:?} for {} frames (instancing available: {})",
        ACTIVE_SCENE,
        FRAMES,
        ctx.hw_instancing_available()
    );

    for frame in 0..FRAMES {
        ctx.begin(ChannelMask::ALL);
        ACTIVE_SCENE.draw(&mut ctx, &assets, frame);
        ctx.end(ChannelMask::ALL);
        ctx.flush(ChannelMask::ALL, true);

        let commands = ctx.device_mut().take_commands();
        match serde_json::to_string(ctx.statistics()) {
            Ok(json) => info!(
                "Frame {}: {} device calls, statistics {}",
                frame,
                commands.len(),
                json
            ),
            Err(err) => warn!("Failed to serialise frame statistics: {}", err),
        }
    }

    ctx.delete_unmanaged_objects();
}
