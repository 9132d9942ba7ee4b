// displaycore
//
// Buffer exchange and display topology for a compositor stack.
// The platform render service is reached only through `platform::RenderService`;
// `platform::SimulatedRenderService` keeps everything in memory for tests
// and the demo binary.

pub mod config;
pub mod core;
pub mod platform;
pub mod prelude;
pub mod util;
