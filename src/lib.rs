// src/lib.rs
pub mod app;
pub mod config;
pub mod data;
pub mod depth;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod keyboard;
pub mod mediapipe_bridge;
pub mod touch;
pub mod tracking;

pub use app::{DisplaySnapshot, TapboardApp};
pub use config::TapboardConfig;
pub use keyboard::KeyboardLayout;
pub use touch::KeyEvent;
