//! Cinder Engine Demo Viewer
//!
//! Renders a grid of textured, instanced cubes under an orbiting camera.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p cinder-viewer -- [OPTIONS]
//! ```
//!
//! ## Controls
//!
//! - `Space`: pause or resume the orbit
//! - Mouse wheel: zoom
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use cinder_app::{run_app, AppConfig};

use crate::app::Viewer;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(AppConfig::from_args()?)
}

fn print_help() {
    eprintln!(
        "Cinder Engine Demo Viewer

USAGE:
    cargo run -p cinder-viewer -- [OPTIONS]

RENDERING OPTIONS:
    --validation              Enable Vulkan validation layers (default in debug builds)
    --no-validation           Disable Vulkan validation layers
    --width <PX>              Initial window width (default: 1280)
    --height <PX>             Initial window height (default: 720)
    --frames-in-flight <N>    Frames recorded ahead of the GPU (default: 2)
    --shader-dir <DIR>        Directory with mesh.vert.spv and mesh.frag.spv
                              Default: assets/shaders/bin
    --wireframe               Draw in line mode when the GPU supports it
    --fps <N>                 Cap the frame rate

SCENE OPTIONS:
    --texture <FILE>          Image to texture the cubes with (default: checkerboard)
    --grid <N>                Cubes per side of the grid (default: 8)

OTHER:
    -h, --help                Print this help message

EXAMPLES:
    # Default scene
    cargo run -p cinder-viewer

    # Larger grid with a custom texture and validation on
    cargo run -p cinder-viewer -- --grid 32 --texture crate.png --validation

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log level (e.g., info, debug, trace)"
    );
}
