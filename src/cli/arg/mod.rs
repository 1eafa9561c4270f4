mod duration;
mod instrumentation;

pub use duration::parse_duration;
pub use instrumentation::Instrumentation;
