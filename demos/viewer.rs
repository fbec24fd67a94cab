//! Interactive stage viewer
//!
//! Left click selects or deselects a mesh, `G` toggles the G-buffer view,
//! `Escape` quits.
//!
//! ```text
//! cargo run --example viewer -- [MODEL] [--shader-dir DIR] [--width W] [--height H] [--no-vsync]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use glam::{Mat4, Vec2, Vec3};
use winit::{
    dpi::{PhysicalPosition, PhysicalSize},
    event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{Key, NamedKey},
    window::WindowBuilder,
};

use stage_renderer::backend::{BackendError, GraphicsBackend};
use stage_renderer::import::local_path;
use stage_renderer::scene::primitives;
use stage_renderer::{
    load_model, pick, DeferredRenderer, Light, Material, PickFilter, RendererConfig, Scene, WgpuBackend,
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Deferred stage renderer viewer")]
struct Args {
    /// glTF model to add to the stage
    model: Option<String>,
    /// Directory containing the shader stages
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Present without waiting for vertical sync
    #[arg(long)]
    no_vsync: bool,
}

/// Truss heights and pan ranges of the moving heads
const HEADS: [(f32, f32); 4] = [(-6.0, 0.6), (-2.0, 0.4), (2.0, -0.4), (6.0, -0.6)];

fn stage_scene() -> Scene {
    let mut scene = Scene::new();
    scene.camera.set_position(Vec3::new(0.0, 4.0, 14.0));
    scene.camera.look_at(Vec3::new(0.0, 1.0, 0.0));
    scene.smoke_amount = 0.3;
    scene.ambient_intensity = 0.2;

    let mut floor = primitives::plane("floor", 30.0).with_material(Material::matte(Vec3::splat(0.4)));
    floor.selectable = false;
    scene.add_mesh(floor);

    let colors = [Vec3::new(0.8, 0.2, 0.2), Vec3::new(0.2, 0.7, 0.3), Vec3::new(0.2, 0.3, 0.8)];
    for (i, color) in colors.into_iter().enumerate() {
        let x = (i as f32 - 1.0) * 3.0;
        scene.add_mesh(
            primitives::cube(&format!("crate {}", i))
                .with_transform(Mat4::from_translation(Vec3::new(x, 0.5, 0.0)))
                .with_material(Material::plastic(color)),
        );
    }
    scene.add_mesh(
        primitives::sphere("mirror ball", 0.6, 16, 24)
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 5.0, -2.0)))
            .with_material(Material::metal(Vec3::splat(0.9), 0.1)),
    );

    scene.set_lights(stage_lights(0.0));
    scene
}

fn stage_lights(time: f32) -> Vec<Light> {
    let mut lights = vec![Light::directional(Vec3::new(-0.4, -1.0, -0.3))
        .with_intensity(0.3)
        .with_shadows(true)];

    for (i, (x, pan)) in HEADS.into_iter().enumerate() {
        let sweep = (time * 0.7 + i as f32).sin() * pan;
        let direction = Vec3::new(sweep - x * 0.08, -1.0, 0.15 * (time + i as f32).cos());
        let hue = i as f32 / HEADS.len() as f32;
        lights.push(
            Light::moving_head(Vec3::new(x, 7.0, 1.0), direction, 14.0, None)
                .with_color(Vec3::new(1.0 - hue, 0.4 + hue * 0.5, hue))
                .with_intensity(4.0),
        );
    }
    lights.push(Light::beam_bar(Vec3::new(0.0, 7.5, -4.0), Vec3::new(0.0, -0.6, 1.0), 25.0, 0.15));
    lights
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RendererConfig::from_env();
    if let Some(dir) = args.shader_dir {
        config.shader_dir = dir;
    }

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Stage Renderer")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)?,
    );

    let mut backend = WgpuBackend::new(window.clone(), !args.no_vsync, config.backend.as_deref())?;
    let mut scene = stage_scene();
    scene.camera.set_aspect(args.width, args.height);
    if let Some(model) = &args.model {
        if let Err(err) = load_model(local_path(model), &mut scene, true) {
            log::error!("Viewer: failed to load {}: {}", model, err);
        }
    }

    let mut renderer = DeferredRenderer::new(config);
    renderer.initialize();

    let start = std::time::Instant::now();
    let mut cursor = PhysicalPosition::new(0.0, 0.0);
    let mut closing = false;

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    closing = true;
                    renderer.shutdown(&mut backend, &mut scene);
                    elwt.exit();
                }
                WindowEvent::Resized(size) => {
                    renderer.resize(&mut backend, size.width, size.height);
                    scene.camera.set_aspect(size.width, size.height);
                }
                WindowEvent::CursorMoved { position, .. } => {
                    cursor = position;
                }
                WindowEvent::MouseInput {
                    state: ElementState::Pressed,
                    button: MouseButton::Left,
                    ..
                } => {
                    let size = window.inner_size();
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    let point = Vec2::new(
                        cursor.x as f32 / size.width as f32,
                        cursor.y as f32 / size.height as f32,
                    );
                    let clip = backend.clip_space();
                    match pick(&scene, &clip, point, PickFilter::SelectableOnly) {
                        Some(hit) => {
                            let mesh = &mut scene.meshes_mut()[hit.mesh_index];
                            mesh.selected = !mesh.selected;
                            log::info!(
                                "Viewer: {} '{}' at {:.2} units",
                                if mesh.selected { "selected" } else { "deselected" },
                                mesh.name,
                                hit.distance
                            );
                        }
                        None => {
                            for mesh in scene.meshes_mut() {
                                mesh.selected = false;
                            }
                        }
                    }
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key,
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => match logical_key {
                    Key::Named(NamedKey::Escape) => {
                        closing = true;
                        renderer.shutdown(&mut backend, &mut scene);
                        elwt.exit();
                    }
                    Key::Character(c) if c.as_str().eq_ignore_ascii_case("g") => {
                        let enabled = !renderer.config().debug_gbuffer_passthrough;
                        renderer.set_debug_gbuffer(enabled);
                        log::info!("Viewer: G-buffer view {}", if enabled { "on" } else { "off" });
                    }
                    _ => {}
                },
                WindowEvent::RedrawRequested if !closing => {
                    let time = start.elapsed().as_secs_f32();
                    scene.time_seconds = time;
                    scene.set_lights(stage_lights(time));

                    match renderer.render(&mut backend, &mut scene) {
                        Ok(_) => {}
                        Err(BackendError::SurfaceLost) => {
                            let size = window.inner_size();
                            renderer.resize(&mut backend, size.width, size.height);
                        }
                        Err(err) => log::warn!("Viewer: frame failed: {}", err),
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
