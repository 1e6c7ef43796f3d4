pub mod asset;
pub mod error;
pub mod renderer;
pub mod settings;

pub use error::{DrawError, DrawResult};
pub use renderer::DrawContext;
pub use settings::DrawContextSettings;

/// Installs `env_logger` at info level unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
