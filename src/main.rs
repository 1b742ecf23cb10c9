use bevy::prelude::*;
use gpu_flock::{FlockConfig, FlockPlugin};

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "GPU flock".into(),
                ..default()
            }),
            ..default()
        }))
        .insert_resource(ClearColor(Color::srgb(0.53, 0.81, 0.92)))
        .add_plugins(FlockPlugin {
            config: FlockConfig::default(),
        })
        .add_systems(Startup, setup_camera)
        .run();
}

fn setup_camera(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            fov: 75.0_f32.to_radians(),
            far: 3000.0,
            ..default()
        }),
        Transform::from_xyz(0.0, 0.0, 350.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}
