//! texbot core library: renders LaTeX code blocks posted in Discord and replies with the image.

pub mod bot;
pub mod channels;
pub mod config;
pub mod exec;
pub mod init;
pub mod render;
