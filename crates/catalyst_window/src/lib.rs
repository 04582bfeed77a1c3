use std::{error::Error, fmt::Display, sync::Arc};

use catalyst_core::time::Time;
use catalyst_input::{InputMap, InputState, MouseButtonId, PhysicalInputId};
use thiserror::Error;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    error::EventLoopError,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowId},
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("event loop failed: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("application failed: {0}")]
    Application(String),
}

/// What the application wants after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppControl {
    Continue,
    Exit,
}

#[derive(Clone, Debug)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Keyboard codes as the input map stores them.
pub fn key_id(code: KeyCode) -> u16 {
    code as u16
}

pub fn mouse_button_id(button: MouseButton) -> MouseButtonId {
    match button {
        MouseButton::Left => MouseButtonId::Left,
        MouseButton::Right => MouseButtonId::Right,
        MouseButton::Middle => MouseButtonId::Middle,
        MouseButton::Back => MouseButtonId::Back,
        MouseButton::Forward => MouseButtonId::Forward,
        MouseButton::Other(code) => MouseButtonId::Other(code),
    }
}

/// Driven by [`run_catalyst_app`]. Errors returned from any hook are fatal:
/// they are logged, the loop exits and the application is dropped.
pub trait Application {
    type Error: Display;

    fn input_map(&self) -> &InputMap;

    /// Called once, when the window exists.
    fn startup(&mut self, window: Arc<Window>) -> Result<(), Self::Error>;

    fn resized(&mut self, width: u32, height: u32);

    fn update(&mut self, time: &Time, input: &InputState) -> Result<AppControl, Self::Error>;

    fn shutdown(&mut self) {}
}

pub type PluginResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Error)]
#[error("{plugin} failed: {error}")]
pub struct PluginError {
    pub plugin: &'static str,
    pub error: Box<dyn Error>,
}

/// The Plugin Trait
/// Each part of an application (camera, renderer, controls) implements
/// this and reads or writes the shared state `S`.
pub trait Plugin<S> {
    fn name(&self) -> &'static str;

    /// Called once from [`App::add_plugin`].
    fn build(&mut self, _input_map: &mut InputMap) {}

    fn startup(&mut self, _state: &mut S, _window: &Arc<Window>) -> PluginResult<()> {
        Ok(())
    }

    fn resized(&mut self, _state: &mut S, _width: u32, _height: u32) {}

    fn update(&mut self, state: &mut S, time: &Time, input: &InputState) -> PluginResult<AppControl>;

    fn shutdown(&mut self, _state: &mut S) {}
}

/// Shared state plus the plugins that run over it, in the order they
/// were added. Shutdown runs in reverse.
pub struct App<S> {
    pub state: S,
    input_map: InputMap,
    plugins: Vec<Box<dyn Plugin<S>>>,
}

impl<S: 'static> App<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            input_map: InputMap::default(),
            plugins: Vec::new(),
        }
    }

    pub fn add_plugin<P: Plugin<S> + 'static>(&mut self, mut plugin: P) -> &mut Self {
        plugin.build(&mut self.input_map);
        log::debug!("Added plugin {}", plugin.name());
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }
}

impl<S: 'static> Application for App<S> {
    type Error = PluginError;

    fn input_map(&self) -> &InputMap {
        &self.input_map
    }

    fn startup(&mut self, window: Arc<Window>) -> Result<(), PluginError> {
        for plugin in &mut self.plugins {
            let name = plugin.name();
            plugin
                .startup(&mut self.state, &window)
                .map_err(|error| PluginError { plugin: name, error })?;
        }
        Ok(())
    }

    fn resized(&mut self, width: u32, height: u32) {
        for plugin in &mut self.plugins {
            plugin.resized(&mut self.state, width, height);
        }
    }

    /// The first plugin asking to exit ends the frame; later plugins do
    /// not run.
    fn update(&mut self, time: &Time, input: &InputState) -> Result<AppControl, PluginError> {
        for plugin in &mut self.plugins {
            let name = plugin.name();
            let control = plugin
                .update(&mut self.state, time, input)
                .map_err(|error| PluginError { plugin: name, error })?;
            if control == AppControl::Exit {
                log::info!("{name} requested exit");
                return Ok(AppControl::Exit);
            }
        }
        Ok(AppControl::Continue)
    }

    fn shutdown(&mut self) {
        for plugin in self.plugins.iter_mut().rev() {
            plugin.shutdown(&mut self.state);
        }
    }
}

// The State Machine that holds the App while waiting for the OS
struct CatalystRunner<A: Application> {
    app: A,
    settings: WindowSettings,
    window: Option<Arc<Window>>,
    time: Time,
    input: InputState,
    failure: Option<String>,
}

impl<A: Application> CatalystRunner<A> {
    fn new(app: A, settings: WindowSettings) -> Self {
        Self {
            app,
            settings,
            window: None,
            time: Time::default(),
            input: InputState::default(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, context: &str, error: impl Display) {
        log::error!("{context}: {error}");
        self.failure = Some(format!("{context}: {error}"));
        event_loop.exit();
    }

    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        self.time.update();
        self.input.apply_map(self.app.input_map());

        match self.app.update(&self.time, &self.input) {
            Ok(AppControl::Continue) => {}
            Ok(AppControl::Exit) => {
                log::info!("Exit requested");
                event_loop.exit();
            }
            Err(e) => self.fail(event_loop, "Frame failed", e),
        }

        self.input.end_frame();
    }
}

fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    match grabbed {
        Ok(()) => window.set_cursor_visible(false),
        Err(e) => log::warn!("Cursor grab unavailable: {e}"),
    }
}

impl<A: Application> ApplicationHandler for CatalystRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.settings.title.clone())
            .with_inner_size(LogicalSize::new(self.settings.width, self.settings.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, "Failed to create window", e),
        };
        grab_cursor(&window);

        if let Err(e) = self.app.startup(window.clone()) {
            return self.fail(event_loop, "Startup failed", e);
        }
        self.window = Some(window);
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.add_mouse_delta(dx as f32, dy as f32);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                let key = PhysicalInputId::key(key_id(code));
                match state {
                    ElementState::Pressed => self.input.press(key),
                    ElementState::Released => self.input.release(key),
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = PhysicalInputId::mouse(mouse_button_id(button));
                match state {
                    ElementState::Pressed => self.input.press(button),
                    ElementState::Released => self.input.release(button),
                }
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.app.resized(size.width, size.height);
            }
            WindowEvent::CloseRequested => {
                log::info!("The close button was pressed; stopping");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if self.window.is_some() && self.failure.is_none() {
                    self.frame(event_loop);
                }
            }
            _ => (),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.app.shutdown();
    }
}

/// Runs the event loop until the window closes, the application asks to
/// exit, or a hook fails. The application is dropped before returning.
pub fn run_catalyst_app<A: Application>(app: A, settings: WindowSettings) -> Result<(), RunError> {
    let event_loop = EventLoop::new()?;

    // Redraw continuously, even with no pending OS events.
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = CatalystRunner::new(app, settings);
    event_loop.run_app(&mut runner)?;

    let failure = runner.failure.take();
    drop(runner);
    match failure {
        Some(message) => Err(RunError::Application(message)),
        None => Ok(()),
    }
}
