//! Venus demo.
//!
//! Opens a window, initializes the engine and draws a spinning triangle
//! until the window is closed.

use anyhow::{Context, Result};
use glam::{Mat4, Vec3, Vec4};
use tracing::info;

use venus_core::{report_error, FrameClock};
use venus_platform::{Display, KeyCode, WinitDisplay};
use venus_renderer::{create_buffer_with_data, Engine, EngineConfig, RenderObject};
use venus_rhi::buffer::BufferUsage;
use venus_rhi::vertex::Vertex;
use venus_rhi::vk;

const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 1.0];
const ALT_CLEAR_COLOR: [f32; 4] = [0.2, 0.1, 0.1, 1.0];

fn triangle() -> [Vertex; 3] {
    [
        Vertex::colored(Vec3::new(0.0, -0.5, 0.0), Vec4::new(1.0, 0.0, 0.0, 1.0)),
        Vertex::colored(Vec3::new(0.5, 0.5, 0.0), Vec4::new(0.0, 1.0, 0.0, 1.0)),
        Vertex::colored(Vec3::new(-0.5, 0.5, 0.0), Vec4::new(0.0, 0.0, 1.0, 1.0)),
    ]
}

fn main() -> Result<()> {
    venus_core::init_logging();
    info!("Starting Venus");

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let mut clock = FrameClock::new(config.target_fps);
    let mut display = WinitDisplay::new();
    let mut engine = Engine::init(&mut display, config).context("Failed to initialize engine")?;

    let vertices = triangle();
    let vertex_buffer = create_buffer_with_data(
        engine.device().immediate(),
        engine.device().allocator(),
        BufferUsage::Vertex,
        &vertices,
    )?;
    let vertex_address = vertex_buffer
        .device_address()
        .context("Vertex buffer has no device address")?;

    let mut alt_clear = false;
    info!("Initialization complete, entering main loop");

    while !display.should_close() {
        display.poll_events();
        if display.take_resized() {
            engine.resize(display.resolution())?;
        }
        if display.input().is_key_pressed(KeyCode::Space) {
            alt_clear = !alt_clear;
        }

        let tick = clock.next_tick();
        let angle = tick.elapsed.as_secs_f32();

        let drawn = engine.draw_frame(|frame| {
            frame.set_clear_color(if alt_clear { ALT_CLEAR_COLOR } else { CLEAR_COLOR });

            let globals = frame.globals();
            let material = match frame.material_instance(
                globals.mesh_material(),
                globals.white_image(),
                globals.linear_sampler(),
            ) {
                Ok(material) => material,
                Err(e) => {
                    report_error("material_instance", e.code(), &e);
                    return;
                }
            };

            match RenderObject::mesh(
                material,
                Mat4::from_rotation_z(angle),
                vertex_buffer.handle(),
                vertex_address,
                vk::Buffer::null(),
                vertices.len() as u32,
            ) {
                Ok(object) => frame.draw(&object),
                Err(e) => report_error("render_object", e.code(), &e),
            }
        });

        if let Err(e) = drawn {
            report_error("draw_frame", e.code(), &e);
            return Err(e.into());
        }

        if tick.index > 0 && tick.index % 600 == 0 {
            info!("Frame {} ({:.2} ms)", tick.index, tick.delta.as_secs_f64() * 1000.0);
        }
    }

    engine.device().wait_idle()?;
    drop(vertex_buffer);
    info!("Shutting down");
    Ok(())
}
