use bevy::prelude::*;

/// Capture image state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    #[default]
    // State before the scene and its camera exist
    BuildScene,
    // Scene is up, nothing to render
    Idle,
    // Rendering state, stores the number of frames remaining before the readback is kept
    Render(u32),
    // Pre-roll is over, the latest readback holds the fully rendered scene
    Ready,
}

// Capture camera and pre-roll state
#[derive(Debug, Default, Resource)]
pub struct SceneController {
    pub state: SceneState,
    pub camera: Option<Entity>,
}

impl SceneController {
    /// Starts a render that is considered done after `pre_roll_frames` more frames.
    pub fn start_render(&mut self, pre_roll_frames: u32) {
        self.state = SceneState::Render(pre_roll_frames);
    }

    pub fn is_ready(&self) -> bool {
        self.state == SceneState::Ready
    }
}

/// Counts pre-roll frames down at the end of every frame.
pub fn advance_pre_roll(mut scene_controller: ResMut<SceneController>) {
    if let SceneState::Render(n) = scene_controller.state {
        scene_controller.state = if n == 0 {
            SceneState::Ready
        } else {
            SceneState::Render(n - 1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_roll_counts_down_to_ready() {
        let mut app = App::new();
        app.init_resource::<SceneController>()
            .add_systems(PostUpdate, advance_pre_roll);

        app.world_mut().resource_mut::<SceneController>().start_render(2);
        for _ in 0..2 {
            app.update();
            assert!(!app.world().resource::<SceneController>().is_ready());
        }
        app.update();
        assert!(app.world().resource::<SceneController>().is_ready());
    }

    #[test]
    fn idle_scene_stays_idle() {
        let mut app = App::new();
        app.insert_resource(SceneController {
            state: SceneState::Idle,
            camera: None,
        })
        .add_systems(PostUpdate, advance_pre_roll);
        app.update();
        assert_eq!(app.world().resource::<SceneController>().state, SceneState::Idle);
    }
}
