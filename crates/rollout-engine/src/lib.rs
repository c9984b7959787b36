mod engine;
mod fileops;
mod types;

pub use engine::{EngineHandle, UpdateEngine};
pub use fileops::FileOps;
pub use types::{EngineEvent, EngineShared, EventSender, Launcher, LockAction, Tone};

#[cfg(test)]
mod tests;
