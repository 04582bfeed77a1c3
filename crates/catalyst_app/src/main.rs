use std::{process::ExitCode, sync::Arc};

use catalyst_assets::AssetServer;
use catalyst_core::{Camera, EngineConfig, FlyCamera, time::Time};
use catalyst_input::{ActionId, AxisId, InputMap, InputState};
use catalyst_renderer::{FrameOutcome, Renderer};
use catalyst_scene::LoadedScene;
use catalyst_window::{
    App, AppControl, Plugin, PluginResult, WindowSettings, key_id, run_catalyst_app,
};
use env_logger::Env;
use glam::{Mat4, Vec3};
use winit::{keyboard::KeyCode, window::Window};

pub const ACTION_QUIT: ActionId = ActionId(1);
pub const ACTION_TOGGLE_STRATEGY: ActionId = ActionId(2);

pub const AXIS_FORWARD: AxisId = AxisId(100);
pub const AXIS_RIGHT: AxisId = AxisId(101);
pub const AXIS_UP: AxisId = AxisId(102);

/// A broken scene file is not fatal. The viewer still opens, empty.
fn load_scene(config: &EngineConfig) -> LoadedScene {
    let data = match AssetServer::default().load_scene(&config.scene_path) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Failed to load {}: {e}", config.scene_path.display());
            return LoadedScene::default();
        }
    };

    match LoadedScene::from_scene_data(data) {
        Ok(scene) => scene,
        Err(e) => {
            log::error!("Invalid scene hierarchy in {}: {e}", config.scene_path.display());
            LoadedScene::default()
        }
    }
}

/// State the plugins share.
struct ViewerState {
    config: EngineConfig,
    camera: FlyCamera,
    scene: LoadedScene,
    // Dropped before the window it renders into.
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
}

impl ViewerState {
    fn new(config: EngineConfig, scene: LoadedScene) -> Self {
        let lens = Camera {
            fov: config.fov_degrees.to_radians(),
            aspect_ratio: config.window_width as f32 / config.window_height.max(1) as f32,
            near: config.near_plane,
            far: config.far_cull_distance,
        };
        let mut camera = FlyCamera::new(Vec3::from_array(config.camera_position), lens);
        camera.speed = config.camera_speed;
        camera.sensitivity = config.mouse_sensitivity;

        Self {
            config,
            camera,
            scene,
            renderer: None,
            window: None,
        }
    }
}

/// Escape quits.
struct ControlsPlugin;

impl Plugin<ViewerState> for ControlsPlugin {
    fn name(&self) -> &'static str {
        "controls"
    }

    fn build(&mut self, input_map: &mut InputMap) {
        input_map.bind_keyboard_button(key_id(KeyCode::Escape), ACTION_QUIT);
    }

    fn update(&mut self, _state: &mut ViewerState, _time: &Time, input: &InputState) -> PluginResult<AppControl> {
        Ok(if input.just_pressed(ACTION_QUIT) {
            AppControl::Exit
        } else {
            AppControl::Continue
        })
    }
}

/// WASD to move, Space and left Shift for up and down, mouse to look.
struct FlyCameraPlugin;

impl Plugin<ViewerState> for FlyCameraPlugin {
    fn name(&self) -> &'static str {
        "fly camera"
    }

    fn build(&mut self, input_map: &mut InputMap) {
        input_map
            .bind_keyboard_axis(key_id(KeyCode::KeyW), AXIS_FORWARD, 1.0)
            .bind_keyboard_axis(key_id(KeyCode::KeyS), AXIS_FORWARD, -1.0)
            .bind_keyboard_axis(key_id(KeyCode::KeyD), AXIS_RIGHT, 1.0)
            .bind_keyboard_axis(key_id(KeyCode::KeyA), AXIS_RIGHT, -1.0)
            .bind_keyboard_axis(key_id(KeyCode::Space), AXIS_UP, 1.0)
            .bind_keyboard_axis(key_id(KeyCode::ShiftLeft), AXIS_UP, -1.0);
    }

    fn startup(&mut self, state: &mut ViewerState, window: &Arc<Window>) -> PluginResult<()> {
        let size = window.inner_size();
        state.camera.lens.set_viewport(size.width, size.height);
        Ok(())
    }

    fn resized(&mut self, state: &mut ViewerState, width: u32, height: u32) {
        state.camera.lens.set_viewport(width, height);
    }

    fn update(&mut self, state: &mut ViewerState, time: &Time, input: &InputState) -> PluginResult<AppControl> {
        let axes = Vec3::new(input.axis(AXIS_RIGHT), input.axis(AXIS_UP), input.axis(AXIS_FORWARD));
        state.camera.apply_movement(axes, time.delta_seconds());
        let (dx, dy) = input.mouse_delta;
        state.camera.apply_look(dx, dy);
        Ok(AppControl::Continue)
    }
}

/// Owns the GPU side. Tab switches between the two draw strategies.
struct RenderPlugin;

impl Plugin<ViewerState> for RenderPlugin {
    fn name(&self) -> &'static str {
        "renderer"
    }

    fn build(&mut self, input_map: &mut InputMap) {
        input_map.bind_keyboard_button(key_id(KeyCode::Tab), ACTION_TOGGLE_STRATEGY);
    }

    fn startup(&mut self, state: &mut ViewerState, window: &Arc<Window>) -> PluginResult<()> {
        let size = window.inner_size();
        let mut renderer = Renderer::new(&**window, size.width, size.height, &state.config)?;
        let top = Mat4::from_translation(Vec3::from_array(state.config.scene_translation));
        renderer.upload_scene(&state.scene, top)?;
        log::info!("Draw strategy: {}", renderer.strategy());

        state.renderer = Some(renderer);
        state.window = Some(window.clone());
        Ok(())
    }

    fn resized(&mut self, state: &mut ViewerState, width: u32, height: u32) {
        if let Some(renderer) = &mut state.renderer {
            renderer.resize(width, height);
        }
    }

    fn update(&mut self, state: &mut ViewerState, time: &Time, input: &InputState) -> PluginResult<AppControl> {
        let Some(renderer) = &mut state.renderer else {
            return Ok(AppControl::Continue);
        };
        if input.just_pressed(ACTION_TOGGLE_STRATEGY) {
            renderer.toggle_strategy();
        }

        if renderer.draw_frame(&state.camera)? == FrameOutcome::SwapchainRecreated {
            log::debug!("Frame {} skipped for swapchain recreation", time.frame_count());
        }
        Ok(AppControl::Continue)
    }

    fn shutdown(&mut self, state: &mut ViewerState) {
        log::info!("Shutting down");
        state.renderer = None;
    }
}

/// Controls first so a quit skips the frame, the camera before the
/// renderer so a frame draws from this frame's view.
fn viewer_app(config: EngineConfig, scene: LoadedScene) -> App<ViewerState> {
    let mut app = App::new(ViewerState::new(config, scene));
    app.add_plugin(ControlsPlugin)
        .add_plugin(FlyCameraPlugin)
        .add_plugin(RenderPlugin);
    app
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let scene = load_scene(&config);
    let settings = WindowSettings {
        title: config.window_title.clone(),
        width: config.window_width,
        height: config.window_height,
    };

    match run_catalyst_app(viewer_app(config, scene), settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_input::PhysicalInputId;
    use catalyst_window::Application;

    fn default_bindings() -> InputMap {
        viewer_app(EngineConfig::default(), LoadedScene::default())
            .input_map()
            .clone()
    }

    #[test]
    fn plugins_run_controls_camera_then_renderer() {
        let app = viewer_app(EngineConfig::default(), LoadedScene::default());
        assert_eq!(app.plugin_names(), vec!["controls", "fly camera", "renderer"]);
    }

    #[test]
    fn escape_exits_before_anything_draws() {
        let mut app = viewer_app(EngineConfig::default(), LoadedScene::default());
        let mut input = InputState::default();
        input.press(PhysicalInputId::key(key_id(KeyCode::Escape)));
        input.apply_map(app.input_map());

        let control = app.update(&Time::default(), &input).unwrap();
        assert_eq!(control, AppControl::Exit);
    }

    #[test]
    fn camera_moves_without_a_renderer() {
        let mut app = viewer_app(EngineConfig::default(), LoadedScene::default());
        let start = app.state.camera.position;

        let mut input = InputState::default();
        input.press(PhysicalInputId::key(key_id(KeyCode::KeyW)));
        input.apply_map(app.input_map());
        let mut time = Time::default();
        std::thread::sleep(std::time::Duration::from_millis(5));
        time.update();

        assert_eq!(app.update(&time, &input).unwrap(), AppControl::Continue);
        assert_ne!(app.state.camera.position, start);
    }

    #[test]
    fn wasd_drive_the_movement_axes() {
        let map = default_bindings();
        let mut input = InputState::default();

        input.press(PhysicalInputId::key(key_id(KeyCode::KeyW)));
        input.press(PhysicalInputId::key(key_id(KeyCode::KeyA)));
        input.apply_map(&map);

        assert_eq!(input.axis(AXIS_FORWARD), 1.0);
        assert_eq!(input.axis(AXIS_RIGHT), -1.0);
        assert_eq!(input.axis(AXIS_UP), 0.0);
    }

    #[test]
    fn tab_toggles_only_on_the_press_frame() {
        let map = default_bindings();
        let mut input = InputState::default();

        input.press(PhysicalInputId::key(key_id(KeyCode::Tab)));
        input.apply_map(&map);
        assert!(input.just_pressed(ACTION_TOGGLE_STRATEGY));

        input.apply_map(&map);
        assert!(!input.just_pressed(ACTION_TOGGLE_STRATEGY));
    }
}
